use crate::{
    instrument::Instrument,
    ledger::AccountId,
    orders::{Order, OrderId, OrderRecord, Side},
    trade::Trade,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

/// One side of the book: price level -> FIFO queue of resting orders.
type BookSide = BTreeMap<Decimal, VecDeque<Order>>;

/// An [`OrderBook`] stores **resting** buy and sell orders for one instrument
/// in two separate [`BTreeMap`]s:
/// - `bids` (buy orders)
/// - `asks` (sell orders)
///
/// Each price level (key) has a FIFO queue of orders stored in a [`VecDeque`]
/// to maintain **price-time** priority. Orders reach a queue in the order of
/// their `sequence`, so the front of a queue is always the earliest order at
/// that price.
#[derive(Debug, Clone)]
pub struct OrderBook {
    instrument: Instrument,

    /// Buy orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **in reverse** to find the highest bid first.
    bids: BookSide,

    /// Sell orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **forwards** to find the lowest ask first.
    asks: BookSide,

    /// Every order ever submitted, with its fill status.
    records: HashMap<OrderId, OrderRecord>,
    /// Submission order of `records`.
    history: Vec<OrderId>,

    next_order_seq: u64,
    next_trade_seq: u64,
}

/// One execution that an incoming order would produce, as reported by
/// [`OrderBook::preview`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub maker_order_id: OrderId,
    pub maker_account_id: AccountId,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Internal enum to unify forward (`IterMut`) and reverse (`Rev<IterMut>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] handles ascending iteration over prices.
/// - [`EitherIter::Rev`] handles descending iteration (used for matching sells against the highest bids).
enum EitherIter<'a> {
    /// Forward (ascending) iteration over the price levels.
    Fwd(std::collections::btree_map::IterMut<'a, Decimal, VecDeque<Order>>),
    /// Reverse (descending) iteration over the price levels.
    Rev(std::iter::Rev<std::collections::btree_map::IterMut<'a, Decimal, VecDeque<Order>>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a Decimal, &'a mut VecDeque<Order>);

    /// Retrieves the **next** `(price, VecDeque<Order>)` pair from the underlying iterator.
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

/// Matches an **incoming order** against the opposite side of the book,
/// producing a series of [`Trade`]s.
///
/// # Parameters
/// - `incoming`: the incoming [`Order`]; its `remaining_quantity` is reduced in place.
/// - `book_side`: the opposite side (`asks` for a buy, `bids` for a sell).
/// - `reversed`: iterate in descending (`true`) or ascending (`false`) price order.
/// - `next_trade_seq`: per-book trade counter.
///
/// # Notes
/// - Matching stops at the first level whose price does not cross the
///   incoming limit. Levels are visited best first, so no later level can cross.
/// - The fill quantity is `min(incoming.remaining, resting.remaining)`, so
///   neither order is overfilled and partial fills fall out naturally.
/// - Every trade executes at the resting (maker) price.
fn match_incoming_side(
    incoming: &mut Order,
    book_side: &mut BookSide,
    reversed: bool,
    next_trade_seq: &mut u64,
) -> Vec<Trade> {
    let mut trades = Vec::new();
    let mut levels_to_remove = Vec::new();

    // Choose iterator direction based on `reversed`
    let iter = if reversed {
        EitherIter::Rev(book_side.iter_mut().rev())
    } else {
        EitherIter::Fwd(book_side.iter_mut())
    };

    // Labeled loop to break out early once the incoming order is exhausted
    // or the book stops crossing.
    'outer: for (&price, orders_at_price) in iter {
        if !incoming.side.crosses(incoming.price, price) {
            break;
        }
        while let Some(resting) = orders_at_price.front_mut() {
            let trade_qty = incoming.remaining_quantity.min(resting.remaining_quantity);

            *next_trade_seq += 1;
            trades.push(Trade {
                maker_order_id: resting.id,
                taker_order_id: incoming.id,
                maker_account_id: resting.account_id,
                taker_account_id: incoming.account_id,
                taker_side: incoming.side,
                asset: incoming.asset.clone(),
                price,
                quantity: trade_qty,
                sequence: *next_trade_seq,
            });
            debug!(
                maker = %resting.id,
                taker = %incoming.id,
                %price,
                quantity = %trade_qty,
                "matched"
            );

            incoming.remaining_quantity -= trade_qty;
            resting.remaining_quantity -= trade_qty;

            // Remove the fully filled resting order from the queue front
            if resting.is_filled() {
                orders_at_price.pop_front();
            }

            // If all orders at this price were consumed, mark the level for cleanup
            if orders_at_price.is_empty() {
                levels_to_remove.push(price);
            }
            if incoming.is_filled() {
                break 'outer;
            }
        }
    }

    for price in levels_to_remove {
        debug!(%price, "removing empty level");
        book_side.remove(&price);
    }
    trades
}

/// Walks `levels` best first exactly as [`match_incoming_side`] would, without
/// touching them.
fn plan_fills<'a>(
    levels: impl Iterator<Item = (&'a Decimal, &'a VecDeque<Order>)>,
    side: Side,
    limit: Decimal,
    mut remaining: Decimal,
) -> Vec<Fill> {
    let mut fills = Vec::new();
    'outer: for (&price, orders) in levels {
        if !side.crosses(limit, price) {
            break;
        }
        for resting in orders {
            if remaining.is_zero() {
                break 'outer;
            }
            let quantity = remaining.min(resting.remaining_quantity);
            fills.push(Fill {
                maker_order_id: resting.id,
                maker_account_id: resting.account_id,
                price,
                quantity,
            });
            remaining -= quantity;
        }
    }
    fills
}

/// Sums the remaining quantity at each of the first `levels` price levels.
fn aggregate<'a>(
    levels: impl Iterator<Item = (&'a Decimal, &'a VecDeque<Order>)>,
    depth: usize,
) -> Vec<(Decimal, Decimal)> {
    levels
        .take(depth)
        .map(|(price, orders)| {
            let total: Decimal = orders.iter().map(|o| o.remaining_quantity).sum();
            (price.normalize(), total.normalize())
        })
        .collect()
}

impl OrderBook {
    /// Creates a new, empty [`OrderBook`] for `instrument`.
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            records: HashMap::new(),
            history: Vec::new(),
            next_order_seq: 0,
            next_trade_seq: 0,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Hands out the next submission sequence number. Strictly increasing
    /// for the lifetime of the book.
    pub fn next_sequence(&mut self) -> u64 {
        self.next_order_seq += 1;
        self.next_order_seq
    }

    /// The fills an order on `side` at `limit` for `quantity` would get if
    /// submitted now, in execution order. [`OrderBook::submit`] on an
    /// unchanged book produces exactly these.
    pub fn preview(&self, side: Side, limit: Decimal, quantity: Decimal) -> Vec<Fill> {
        match side {
            Side::Buy => plan_fills(self.asks.iter(), side, limit, quantity),
            Side::Sell => plan_fills(self.bids.iter().rev(), side, limit, quantity),
        }
    }

    /// Runs `incoming` against the book and rests whatever is left of it.
    ///
    /// # Behavior
    /// - A buy matches `asks` from lowest price up; a sell matches `bids`
    ///   from highest price down.
    /// - Within a price level the earliest order fills first.
    /// - Any unfilled remainder is queued behind existing orders at its own
    ///   price, keeping its original `sequence`.
    ///
    /// Returns the trades in the order they executed.
    pub fn submit(&mut self, mut incoming: Order) -> Vec<Trade> {
        info!(
            order = %incoming.id,
            side = ?incoming.side,
            price = %incoming.price,
            quantity = %incoming.remaining_quantity,
            instrument = %self.instrument,
            "submitting order"
        );
        let trades = match incoming.side {
            Side::Buy => match_incoming_side(
                &mut incoming,
                &mut self.asks,
                false,
                &mut self.next_trade_seq,
            ),
            Side::Sell => match_incoming_side(
                &mut incoming,
                &mut self.bids,
                true,
                &mut self.next_trade_seq,
            ),
        };
        for trade in &trades {
            if let Some(maker) = self.records.get_mut(&trade.maker_order_id) {
                maker.record_fill(trade.quantity);
            }
        }
        self.history.push(incoming.id);
        self.records
            .insert(incoming.id, OrderRecord::from_order(&incoming));

        if !incoming.is_filled() {
            debug!(order = %incoming.id, remaining = %incoming.remaining_quantity, "resting order");
            self.rest(incoming);
        }
        trades
    }

    /// Status of any order submitted to this book, filled ones included.
    pub fn order(&self, order_id: OrderId) -> Option<&OrderRecord> {
        self.records.get(&order_id)
    }

    /// Every order submitted to this book, oldest first.
    pub fn orders(&self) -> impl Iterator<Item = &OrderRecord> + '_ {
        self.history.iter().filter_map(|id| self.records.get(id))
    }

    fn rest(&mut self, order: Order) {
        let book_side = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = book_side.entry(order.price).or_default();
        debug_assert!(queue.back().is_none_or(|last| last.sequence < order.sequence));
        queue.push_back(order);
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Aggregated `(price, quantity)` levels, best first, at most `depth` per side.
    pub fn depth(&self, depth: usize) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        (
            aggregate(self.bids.iter().rev(), depth),
            aggregate(self.asks.iter(), depth),
        )
    }

    /// Looks up a resting order by id (linear scan).
    pub fn resting(&self, order_id: OrderId) -> Option<&Order> {
        self.bids
            .values()
            .chain(self.asks.values())
            .flat_map(|queue| queue.iter())
            .find(|o| o.id == order_id)
    }

    /// Number of orders currently resting, both sides together.
    pub fn len(&self) -> usize {
        self.bids
            .values()
            .chain(self.asks.values())
            .map(VecDeque::len)
            .sum()
    }

    /// True when no order rests on either side.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
