use rust_decimal::Decimal;

use crate::{
    instrument::AssetCode,
    ledger::AccountId,
    orders::{OrderId, Side},
};

/// A trade represents a matched transaction between two orders.
///
/// # Terminology
/// - **Maker**: The order that was already resting in the order book (providing liquidity).
///   - Can be either a Buy (bid) or Sell (ask) order.
/// - **Taker**: The incoming order that triggered the trade (taking liquidity).
///   - Can also be a Buy or Sell order.
///
/// # Behavior
/// - The trade always executes at the **maker's price** (book price).
/// - Partial fills may occur: multiple trades can be generated from one order.
///
/// Example:
/// - A limit buy at 105 (taker) matches a limit sell at 102 (maker).
/// - A trade is created at price 102.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Trade {
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_account_id: AccountId,
    pub taker_account_id: AccountId,
    pub taker_side: Side,
    pub asset: AssetCode,
    pub price: Decimal,
    pub quantity: Decimal,
    pub sequence: u64,
}
