//! Per-account, per-asset balances and the primitives that move them.
//!
//! Each (account, asset) pair holds an `available` and a `reserved` amount.
//! Funds committed to open orders sit in `reserved` and still count toward
//! the balance an account reports.
//!
//! All accounts live behind one ledger-wide mutex. Changes are staged in a
//! [`Journal`] and written back in one step only after every staged change
//! succeeded, so a multi-leg operation such as [`Ledger::settle`] is never
//! observed, or left behind, half applied.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{EngineError, EngineResult},
    instrument::AssetCode,
    utils::lock,
};

pub type AccountId = Uuid;

/// Inputs finer than this are refused rather than silently rounded.
pub const MAX_SCALE: u32 = 12;

/// Largest mantissa a `Decimal` can hold (96 bits).
const MAX_MANTISSA: i128 = (1 << 96) - 1;

/// Checks that `value` is strictly positive, has at most [`MAX_SCALE`]
/// fractional digits and still fits a `Decimal` when written at that scale,
/// returning it normalized.
///
/// The last condition caps inputs at roughly 7.9e16 and keeps every
/// difference of two accepted amounts exact.
pub fn ensure_positive(field: &'static str, value: Decimal) -> EngineResult<Decimal> {
    let value = value.normalize();
    let fits = value.scale() <= MAX_SCALE
        && rescaled(value, MAX_SCALE).is_some_and(|m| m <= MAX_MANTISSA);
    if value <= Decimal::ZERO || !fits {
        return Err(EngineError::InvalidAmount { field, value });
    }
    Ok(value)
}

/// `a * b` with no rounding, or `None` when the exact product does not fit
/// in a `Decimal`.
pub fn exact_mul(a: Decimal, b: Decimal) -> Option<Decimal> {
    let mantissa = a.mantissa().checked_mul(b.mantissa())?;
    from_parts(mantissa, a.scale() + b.scale())
}

/// `a + b` with no rounding, or `None` when the exact sum does not fit.
///
/// `Decimal`'s own `+` rounds away low digits once the mantissa is full and
/// panics past `Decimal::MAX`; balances never go through it.
pub fn exact_add(a: Decimal, b: Decimal) -> Option<Decimal> {
    let scale = a.scale().max(b.scale());
    let sum = rescaled(a, scale)?.checked_add(rescaled(b, scale)?)?;
    from_parts(sum, scale)
}

/// `a - b` with no rounding, or `None` when the exact difference does not fit.
pub fn exact_sub(a: Decimal, b: Decimal) -> Option<Decimal> {
    exact_add(a, -b)
}

fn rescaled(d: Decimal, scale: u32) -> Option<i128> {
    let factor = 10i128.checked_pow(scale.checked_sub(d.scale())?)?;
    d.mantissa().checked_mul(factor)
}

/// Builds a normalized decimal from `mantissa * 10^-scale`, dropping only
/// trailing zeros.
fn from_parts(mut mantissa: i128, mut scale: u32) -> Option<Decimal> {
    while scale > 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        scale -= 1;
    }
    Decimal::try_from_i128_with_scale(mantissa, scale).ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub available: Decimal,
    pub reserved: Decimal,
}

impl Balance {
    /// What the account owns: free funds plus funds held by open orders.
    /// Saturates at `Decimal::MAX`.
    pub fn total(&self) -> Decimal {
        self.available.saturating_add(self.reserved)
    }
}

/// The balance of one asset as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetBalance {
    pub asset_code: AssetCode,
    #[serde(serialize_with = "serialize_canonical")]
    pub balance: Decimal,
}

/// Renders a decimal without trailing zeros: `90`, `0.5`, `494000`.
pub fn serialize_canonical<S: serde::Serializer>(v: &Decimal, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&v.normalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub name: String,
    pub balances: Vec<AssetBalance>,
}

/// The economic effect of one trade.
///
/// Applied by [`Journal::settle`] as a single unit:
/// - `quote_amount` leaves the buyer's reserved quote and lands in the
///   seller's available quote;
/// - `base_amount` leaves the seller's reserved base and lands in the buyer's
///   available base;
/// - `buyer_refund` moves from the buyer's reserved quote back to available
///   (price improvement when a buy taker pays less than its limit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub buyer: AccountId,
    pub seller: AccountId,
    pub base: AssetCode,
    pub quote: AssetCode,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub buyer_refund: Decimal,
}

#[derive(Debug)]
struct Account {
    id: AccountId,
    name: String,
    balances: BTreeMap<AssetCode, Balance>,
}

impl Account {
    fn balance(&self, asset: &AssetCode) -> Balance {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    fn view(&self) -> AccountView {
        AccountView {
            id: self.id,
            name: self.name.clone(),
            balances: self
                .balances
                .iter()
                .map(|(asset, b)| AssetBalance {
                    asset_code: asset.clone(),
                    balance: b.total().normalize(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Accounts {
    by_id: HashMap<AccountId, Account>,
    /// Creation order, for stable paging.
    order: Vec<AccountId>,
}

impl Accounts {
    fn get(&self, id: AccountId) -> EngineResult<&Account> {
        self.by_id.get(&id).ok_or(EngineError::UnknownAccount(id))
    }
}

fn insufficient(asset: &AssetCode, required: Decimal, available: Decimal) -> EngineError {
    EngineError::InsufficientFunds {
        asset: asset.clone(),
        required,
        available,
    }
}

fn positive(field: &'static str, value: Decimal) -> EngineResult<Decimal> {
    if value <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount { field, value });
    }
    Ok(value)
}

fn add(field: &'static str, balance: Decimal, amount: Decimal) -> EngineResult<Decimal> {
    exact_add(balance, amount).ok_or(EngineError::InvalidAmount {
        field,
        value: amount,
    })
}

/// `from - amount`, refused when `from` is short.
fn take(asset: &AssetCode, from: Decimal, amount: Decimal) -> EngineResult<Decimal> {
    if from < amount {
        return Err(insufficient(asset, amount, from));
    }
    exact_sub(from, amount).ok_or(EngineError::InvalidAmount {
        field: "amount",
        value: amount,
    })
}

/// Balance changes staged against the locked accounts.
///
/// Reads see earlier staged writes, so several legs touching the same
/// balance (a self-match, say) compose correctly. Nothing reaches the
/// accounts until the closure given to [`Ledger::transact`] returns `Ok`.
pub struct Journal<'a> {
    accounts: &'a Accounts,
    staged: BTreeMap<(AccountId, AssetCode), Balance>,
}

impl Journal<'_> {
    /// Current balance including staged changes; zero if never touched.
    pub fn balance(&self, id: AccountId, asset: &AssetCode) -> EngineResult<Balance> {
        if let Some(staged) = self.staged.get(&(id, asset.clone())) {
            return Ok(*staged);
        }
        Ok(self.accounts.get(id)?.balance(asset))
    }

    fn update(
        &mut self,
        id: AccountId,
        asset: &AssetCode,
        f: impl FnOnce(Balance) -> EngineResult<Balance>,
    ) -> EngineResult<()> {
        let next = f(self.balance(id, asset)?)?;
        self.staged.insert((id, asset.clone()), next);
        Ok(())
    }

    /// Adds `amount` to the available balance.
    pub fn credit(&mut self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        let amount = ensure_positive("amount", amount)?;
        self.update(id, asset, |b| {
            Ok(Balance {
                available: add("amount", b.available, amount)?,
                ..b
            })
        })
    }

    /// Removes `amount` from the available balance. Reserved funds can not
    /// be withdrawn.
    pub fn debit(&mut self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        let amount = ensure_positive("amount", amount)?;
        self.update(id, asset, |b| {
            Ok(Balance {
                available: take(asset, b.available, amount)?,
                ..b
            })
        })
    }

    /// Moves `amount` from available to reserved. Fails immediately if the
    /// available balance is short; never waits for funds.
    pub fn reserve(&mut self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        let amount = positive("amount", amount)?;
        self.update(id, asset, |b| {
            Ok(Balance {
                available: take(asset, b.available, amount)?,
                reserved: add("amount", b.reserved, amount)?,
            })
        })
    }

    /// Moves `amount` from reserved back to available.
    pub fn release(&mut self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        let amount = positive("amount", amount)?;
        self.update(id, asset, |b| {
            Ok(Balance {
                available: add("amount", b.available, amount)?,
                reserved: take(asset, b.reserved, amount)?,
            })
        })
    }

    /// Stages every leg of one trade.
    pub fn settle(&mut self, s: &Settlement) -> EngineResult<()> {
        positive("base_amount", s.base_amount)?;
        positive("quote_amount", s.quote_amount)?;
        if s.buyer_refund < Decimal::ZERO {
            return Err(EngineError::InvalidAmount {
                field: "buyer_refund",
                value: s.buyer_refund,
            });
        }
        let quote_needed = add("quote_amount", s.quote_amount, s.buyer_refund)?;

        self.update(s.buyer, &s.quote, |b| {
            Ok(Balance {
                available: add("buyer_refund", b.available, s.buyer_refund)?,
                reserved: take(&s.quote, b.reserved, quote_needed)?,
            })
        })?;
        self.update(s.buyer, &s.base, |b| {
            Ok(Balance {
                available: add("base_amount", b.available, s.base_amount)?,
                ..b
            })
        })?;
        self.update(s.seller, &s.base, |b| {
            Ok(Balance {
                reserved: take(&s.base, b.reserved, s.base_amount)?,
                ..b
            })
        })?;
        self.update(s.seller, &s.quote, |b| {
            Ok(Balance {
                available: add("quote_amount", b.available, s.quote_amount)?,
                ..b
            })
        })
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    accounts: Mutex<Accounts>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an account with no balances. Always succeeds.
    pub fn create_account(&self, name: impl Into<String>) -> AccountId {
        let id = Uuid::new_v4();
        let name = name.into();
        let mut accounts = lock(&self.accounts);
        info!(account = %id, %name, "account created");
        accounts.by_id.insert(
            id,
            Account {
                id,
                name,
                balances: BTreeMap::new(),
            },
        );
        accounts.order.push(id);
        id
    }

    pub fn contains(&self, id: AccountId) -> bool {
        lock(&self.accounts).by_id.contains_key(&id)
    }

    /// Runs `f` against a [`Journal`] under the ledger lock and writes its
    /// staged changes back only if `f` returns `Ok`. On `Err` (or a panic)
    /// no balance changes.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Journal<'_>) -> EngineResult<T>) -> EngineResult<T> {
        let mut accounts = lock(&self.accounts);
        let mut journal = Journal {
            accounts: &accounts,
            staged: BTreeMap::new(),
        };
        let out = f(&mut journal)?;
        let staged = journal.staged;
        for ((id, asset), balance) in staged {
            if let Some(account) = accounts.by_id.get_mut(&id) {
                account.balances.insert(asset, balance);
            }
        }
        Ok(out)
    }

    /// Adds `amount` to the available balance.
    pub fn credit(&self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        self.transact(|tx| tx.credit(id, asset, amount))?;
        info!(account = %id, %asset, %amount, "credited");
        Ok(())
    }

    /// Removes `amount` from the available balance.
    pub fn debit(&self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        self.transact(|tx| tx.debit(id, asset, amount))?;
        info!(account = %id, %asset, %amount, "debited");
        Ok(())
    }

    pub fn reserve(&self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        self.transact(|tx| tx.reserve(id, asset, amount))?;
        debug!(account = %id, %asset, %amount, "reserved");
        Ok(())
    }

    pub fn release(&self, id: AccountId, asset: &AssetCode, amount: Decimal) -> EngineResult<()> {
        self.transact(|tx| tx.release(id, asset, amount))?;
        debug!(account = %id, %asset, %amount, "released");
        Ok(())
    }

    /// Applies one trade completely or not at all.
    pub fn settle(&self, s: &Settlement) -> EngineResult<()> {
        self.transact(|tx| tx.settle(s))?;
        debug!(
            buyer = %s.buyer,
            seller = %s.seller,
            base = %s.base_amount,
            quote = %s.quote_amount,
            "settled"
        );
        Ok(())
    }

    /// Raw available/reserved split for one asset; zero if never touched.
    pub fn balance(&self, id: AccountId, asset: &AssetCode) -> EngineResult<Balance> {
        let accounts = lock(&self.accounts);
        Ok(accounts.get(id)?.balance(asset))
    }

    /// Totals per asset code, ordered by asset code.
    pub fn balances(&self, id: AccountId) -> EngineResult<Vec<AssetBalance>> {
        Ok(self.account(id)?.balances)
    }

    pub fn account(&self, id: AccountId) -> EngineResult<AccountView> {
        let accounts = lock(&self.accounts);
        Ok(accounts.get(id)?.view())
    }

    /// One page of accounts in creation order, plus the total count.
    /// `page` is 1-based.
    pub fn accounts(&self, page: usize, size: usize) -> (Vec<AccountView>, usize) {
        let accounts = lock(&self.accounts);
        let skip = page.saturating_sub(1).saturating_mul(size);
        let items = accounts
            .order
            .iter()
            .skip(skip)
            .take(size)
            .filter_map(|id| accounts.by_id.get(id).map(Account::view))
            .collect();
        (items, accounts.order.len())
    }

    /// Sum of `available + reserved` for `asset` over every account.
    pub fn total_supply(&self, asset: &AssetCode) -> Decimal {
        let accounts = lock(&self.accounts);
        accounts
            .by_id
            .values()
            .map(|a| a.balance(asset).total())
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}
