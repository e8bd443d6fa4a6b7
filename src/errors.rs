use rust_decimal::Decimal;
use thiserror::Error;

use crate::{instrument::AssetCode, ledger::AccountId, orders::OrderId};

/// Every way a ledger or matching operation can be refused.
///
/// A failed call leaves balances and books exactly as they were: ledger
/// changes are staged and only written once every check has passed, and an
/// order touches its book only after its whole settlement was staged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("account not found: {0}")]
    UnknownAccount(AccountId),

    #[error("unknown asset code: `{0}`")]
    UnknownAsset(String),

    #[error("order not found: {0}")]
    UnknownOrder(OrderId),

    #[error("invalid {field}: {value} (must be > 0, at most 12 decimal places, and fit the ledger exactly)")]
    InvalidAmount { field: &'static str, value: Decimal },

    #[error("insufficient funds: {asset} required {required}, available {available}")]
    InsufficientFunds {
        asset: AssetCode,
        required: Decimal,
        available: Decimal,
    },
}

impl EngineError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            EngineError::UnknownAsset(_) => "UNKNOWN_ASSET",
            EngineError::UnknownOrder(_) => "UNKNOWN_ORDER",
            EngineError::InvalidAmount { .. } => "INVALID_AMOUNT",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
