use std::{collections::HashMap, sync::Mutex};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    errors::{EngineError, EngineResult},
    instrument::{AssetCode, Instrument, InstrumentError, Instruments},
    ledger::{
        AccountId, AccountView, AssetBalance, Ledger, Settlement, ensure_positive, exact_mul,
        exact_sub,
    },
    orderbook::{Fill, OrderBook},
    orders::{Order, OrderId, OrderRecord, OrderStatus, Side},
    trade::Trade,
    utils::lock,
};

/// What the engine trades: one quote asset and the base assets listed
/// against it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quote: AssetCode,
    pub assets: Vec<AssetCode>,
}

/// A limit order as it arrives from a client, before validation.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub asset_code: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Narrows an order listing; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub asset_code: Option<String>,
    pub account_id: Option<AccountId>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
}

/// Aggregated view of one book, best levels first.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub asset_code: AssetCode,
    pub quote: AssetCode,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Validates orders, routes them to their [`OrderBook`], and settles every
/// resulting trade on the [`Ledger`].
///
/// Each book sits behind its own mutex and an order's
/// reserve → match → settle sequence runs while holding it, so orders on one
/// asset are totally ordered while different assets proceed in parallel.
/// Locks are always taken book first, ledger second.
#[derive(Debug)]
pub struct MatchingEngine {
    ledger: Ledger,
    instruments: Instruments,
    books: HashMap<AssetCode, Mutex<OrderBook>>,
}

impl MatchingEngine {
    pub fn new(config: EngineConfig) -> Result<Self, InstrumentError> {
        let instruments = Instruments::new(config.quote, config.assets)?;
        let books = instruments
            .supported()
            .map(|ins| (ins.base.clone(), Mutex::new(OrderBook::new(ins))))
            .collect();
        info!(
            quote = %instruments.quote(),
            assets = ?instruments.bases(),
            "matching engine ready"
        );
        Ok(Self {
            ledger: Ledger::new(),
            instruments,
            books,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn create_account(&self, name: impl Into<String>) -> AccountId {
        self.ledger.create_account(name)
    }

    /// Credits `amount` of `asset_code` to the account. The asset must be the
    /// quote asset or a listed base asset.
    pub fn fund_account(
        &self,
        account_id: AccountId,
        asset_code: &str,
        amount: Decimal,
    ) -> EngineResult<()> {
        let asset = self.instruments.known_asset(asset_code)?;
        self.ledger.credit(account_id, &asset, amount)
    }

    /// Withdraws `amount` of `asset_code` from the account's available
    /// balance.
    pub fn withdraw(
        &self,
        account_id: AccountId,
        asset_code: &str,
        amount: Decimal,
    ) -> EngineResult<()> {
        let asset = self.instruments.known_asset(asset_code)?;
        self.ledger.debit(account_id, &asset, amount)
    }

    pub fn account(&self, account_id: AccountId) -> EngineResult<AccountView> {
        self.ledger.account(account_id)
    }

    pub fn balances(&self, account_id: AccountId) -> EngineResult<Vec<AssetBalance>> {
        self.ledger.balances(account_id)
    }

    /// Places a limit order and settles whatever it matches.
    ///
    /// # Steps
    /// 1. Validate price, quantity, asset and account.
    /// 2. Under the book lock, stage in one ledger transaction: the
    ///    commitment (`price * quantity` quote for a buy, `quantity` base for
    ///    a sell) and the settlement of every fill the book would produce.
    /// 3. Only if all of that succeeds, submit to the book and commit the
    ///    ledger changes.
    ///
    /// Any failure, `InsufficientFunds` included, leaves the book and every
    /// balance untouched. Returns once every balance effect is applied.
    pub fn place_order(&self, req: OrderRequest) -> EngineResult<PlacedOrder> {
        let price = ensure_positive("price", req.price)?;
        let quantity = ensure_positive("quantity", req.quantity)?;
        let instrument = self.instruments.resolve(&req.asset_code)?;
        if !self.ledger.contains(req.account_id) {
            return Err(EngineError::UnknownAccount(req.account_id));
        }
        let book = self
            .books
            .get(&instrument.base)
            .ok_or_else(|| EngineError::UnknownAsset(req.asset_code.clone()))?;

        let (commit_asset, commitment) = match req.side {
            Side::Buy => {
                let notional = exact_mul(price, quantity).ok_or(EngineError::InvalidAmount {
                    field: "price * quantity",
                    value: price,
                })?;
                (&instrument.quote, notional)
            }
            Side::Sell => (&instrument.base, quantity),
        };

        let mut book = lock(book);
        let placed = self.ledger.transact(|tx| {
            tx.reserve(req.account_id, commit_asset, commitment)?;
            for fill in book.preview(req.side, price, quantity) {
                let settlement = settlement_for(&instrument, &req, price, &fill)?;
                tx.settle(&settlement)?;
            }

            let order = Order::new(
                req.account_id,
                instrument.base.clone(),
                req.side,
                price,
                quantity,
                book.next_sequence(),
            );
            let order_id = order.id;
            let trades = book.submit(order);
            Ok(PlacedOrder { order_id, trades })
        });

        match placed {
            Ok(placed) => {
                info!(order = %placed.order_id, trades = placed.trades.len(), "order placed");
                Ok(placed)
            }
            Err(err) => {
                warn!(account = %req.account_id, %err, "order rejected");
                Err(err)
            }
        }
    }

    /// One order by id, resting or already filled.
    pub fn order(&self, asset_code: &str, order_id: OrderId) -> EngineResult<OrderRecord> {
        let instrument = self.instruments.resolve(asset_code)?;
        let book = self
            .books
            .get(&instrument.base)
            .ok_or_else(|| EngineError::UnknownAsset(asset_code.to_string()))?;
        lock(book)
            .order(order_id)
            .cloned()
            .ok_or(EngineError::UnknownOrder(order_id))
    }

    /// A page of orders matching `filter`, plus the number of matches.
    /// Orders come book by book in listing order, oldest first within a book.
    /// `page` is 1-based.
    pub fn orders(
        &self,
        filter: &OrderFilter,
        page: usize,
        size: usize,
    ) -> EngineResult<(Vec<OrderRecord>, usize)> {
        let bases = match &filter.asset_code {
            Some(code) => vec![self.instruments.resolve(code)?.base],
            None => self.instruments.bases().to_vec(),
        };
        let mut matching = Vec::new();
        for base in &bases {
            let Some(book) = self.books.get(base) else {
                continue;
            };
            let book = lock(book);
            matching.extend(
                book.orders()
                    .filter(|o| filter.account_id.is_none_or(|id| o.account_id == id))
                    .filter(|o| filter.status.is_none_or(|s| o.status == s))
                    .cloned(),
            );
        }
        let total = matching.len();
        let skip = page.saturating_sub(1).saturating_mul(size);
        let items = matching.into_iter().skip(skip).take(size).collect();
        Ok((items, total))
    }

    /// Aggregated depth of one asset's book.
    pub fn depth(&self, asset_code: &str, levels: usize) -> EngineResult<BookSnapshot> {
        let instrument = self.instruments.resolve(asset_code)?;
        let book = self
            .books
            .get(&instrument.base)
            .ok_or_else(|| EngineError::UnknownAsset(asset_code.to_string()))?;
        let (bids, asks) = lock(book).depth(levels);
        Ok(BookSnapshot {
            asset_code: instrument.base,
            quote: instrument.quote,
            bids,
            asks,
        })
    }
}

/// Translates one fill of the incoming order `req` into ledger movements.
/// `taker_limit` is the incoming order's own price: a buy taker reserved at
/// that price, so any gap to the maker's price is handed back to it.
fn settlement_for(
    instrument: &Instrument,
    req: &OrderRequest,
    taker_limit: Decimal,
    fill: &Fill,
) -> EngineResult<Settlement> {
    let too_large = |field: &'static str| EngineError::InvalidAmount {
        field,
        value: fill.quantity,
    };
    let quote_amount =
        exact_mul(fill.price, fill.quantity).ok_or_else(|| too_large("quote_amount"))?;
    let (buyer, seller, buyer_refund) = match req.side {
        Side::Buy => {
            let improvement =
                exact_sub(taker_limit, fill.price).ok_or_else(|| too_large("buyer_refund"))?;
            let refund =
                exact_mul(improvement, fill.quantity).ok_or_else(|| too_large("buyer_refund"))?;
            (req.account_id, fill.maker_account_id, refund)
        }
        Side::Sell => (fill.maker_account_id, req.account_id, Decimal::ZERO),
    };
    Ok(Settlement {
        buyer,
        seller,
        base: instrument.base.clone(),
        quote: instrument.quote.clone(),
        base_amount: fill.quantity,
        quote_amount,
        buyer_refund,
    })
}
