use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    instrument::AssetCode,
    ledger::{AccountId, serialize_canonical},
};

pub type OrderId = Uuid;

/// Represents which side of the market the order is on.
///
/// # Intuition
/// - `Buy` (Bid): The trader wants to purchase the asset. Buy orders are sorted from **highest to lowest price**
///   because a higher price means more willingness to buy — i.e., more aggressive.
/// - `Sell` (Ask): The trader wants to sell the asset. Sell orders are sorted from **lowest to highest price**
///   because a lower price means more willingness to sell — i.e., more aggressive.
///
/// This sorting ensures the matching engine always finds the **best price first**:
/// - Buyers match with the **lowest ask**
/// - Sellers match with the **highest bid**
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// Whether an order on this side at `limit` is willing to trade against a
    /// resting order at `resting`.
    pub fn crosses(self, limit: Decimal, resting: Decimal) -> bool {
        match self {
            Side::Buy => limit >= resting,
            Side::Sell => limit <= resting,
        }
    }
}

/// A limit order submitted by an account.
///
/// - `sequence` is assigned once by the engine at submission and is the only
///   tie-breaker between orders at the same price.
/// - `remaining_quantity` is the only field that changes after submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub asset: AssetCode,
    pub side: Side,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub sequence: u64,
}

impl Order {
    pub fn new(
        account_id: AccountId,
        asset: AssetCode,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        sequence: u64,
    ) -> Self {
        Order {
            id: Uuid::new_v4(),
            account_id,
            asset,
            side,
            price,
            original_quantity: quantity,
            remaining_quantity: quantity,
            sequence,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity.is_zero()
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.original_quantity - self.remaining_quantity
    }
}

/// Lifecycle of an order as clients see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    #[serde(rename = "full_filled")]
    Filled,
}

impl OrderStatus {
    fn of(filled: Decimal, total: Decimal) -> Self {
        if filled.is_zero() {
            OrderStatus::Open
        } else if filled < total {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        }
    }
}

/// What the book remembers about every order it was handed, resting or not.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub account_id: AccountId,
    pub asset_code: AssetCode,
    #[serde(rename = "type")]
    pub side: Side,
    pub status: OrderStatus,
    #[serde(serialize_with = "serialize_canonical")]
    pub price: Decimal,
    #[serde(serialize_with = "serialize_canonical")]
    pub total_quantity: Decimal,
    #[serde(serialize_with = "serialize_canonical")]
    pub filled_quantity: Decimal,
    pub sequence: u64,
}

impl OrderRecord {
    /// Snapshot of `order` right after it was matched on arrival.
    pub fn from_order(order: &Order) -> Self {
        let filled = order.filled_quantity();
        OrderRecord {
            id: order.id,
            account_id: order.account_id,
            asset_code: order.asset.clone(),
            side: order.side,
            status: OrderStatus::of(filled, order.original_quantity),
            price: order.price,
            total_quantity: order.original_quantity,
            filled_quantity: filled,
            sequence: order.sequence,
        }
    }

    /// Accounts for `quantity` more of this order having traded as maker.
    pub fn record_fill(&mut self, quantity: Decimal) {
        self.filled_quantity += quantity;
        self.status = OrderStatus::of(self.filled_quantity, self.total_quantity);
    }
}
