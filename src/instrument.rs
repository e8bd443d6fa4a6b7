use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::EngineError;

const MAX_CODE_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("invalid asset code: `{0}`")]
    InvalidAssetCode(String),
    #[error("unsupported instrument: `{0}`")]
    Unsupported(String),
}

/// A tradable unit such as `BTC` or `BRL`.
///
/// Codes are 1..=12 ASCII alphanumerics and are stored upper-cased, so
/// `"btc"` and `"BTC"` name the same asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetCode(String);

impl AssetCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AssetCode {
    type Err = InstrumentError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_CODE_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(InstrumentError::InvalidAssetCode(s.to_string()));
        }
        Ok(AssetCode(s.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for AssetCode {
    type Error = InstrumentError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AssetCode> for String {
    fn from(code: AssetCode) -> Self {
        code.0
    }
}

impl fmt::Display for AssetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//A Trading pair: base/quote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Instrument {
    /// The asset you buy or sell
    pub base: AssetCode,
    /// The asset you pay or receive
    pub quote: AssetCode,
}

impl Instrument {
    /// Returns the usual string code, e.g "BTC-BRL"
    pub fn code(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// The set of instruments an engine trades: every listed base asset against
/// one quote asset.
#[derive(Debug, Clone)]
pub struct Instruments {
    quote: AssetCode,
    bases: Vec<AssetCode>,
}

impl Instruments {
    /// Builds the registry. Duplicates are dropped and a base equal to the
    /// quote is refused, since an asset cannot trade against itself.
    pub fn new(
        quote: AssetCode,
        bases: impl IntoIterator<Item = AssetCode>,
    ) -> Result<Self, InstrumentError> {
        let mut listed: Vec<AssetCode> = Vec::new();
        for base in bases {
            if base == quote {
                return Err(InstrumentError::Unsupported(format!("{base}-{quote}")));
            }
            if !listed.contains(&base) {
                listed.push(base);
            }
        }
        Ok(Self {
            quote,
            bases: listed,
        })
    }

    pub fn quote(&self) -> &AssetCode {
        &self.quote
    }

    pub fn bases(&self) -> &[AssetCode] {
        &self.bases
    }

    /// Resolves a raw base asset code to its instrument.
    pub fn resolve(&self, code: &str) -> Result<Instrument, EngineError> {
        let base = self.known_asset(code)?;
        if base == self.quote {
            return Err(EngineError::UnknownAsset(code.to_string()));
        }
        Ok(Instrument {
            base,
            quote: self.quote.clone(),
        })
    }

    /// Parses `code` and checks that it is either the quote asset or a
    /// listed base asset.
    pub fn known_asset(&self, code: &str) -> Result<AssetCode, EngineError> {
        let asset: AssetCode = code
            .parse()
            .map_err(|_| EngineError::UnknownAsset(code.to_string()))?;
        if asset == self.quote || self.bases.contains(&asset) {
            Ok(asset)
        } else {
            Err(EngineError::UnknownAsset(code.to_string()))
        }
    }

    pub fn supported(&self) -> impl Iterator<Item = Instrument> + '_ {
        self.bases.iter().map(|base| Instrument {
            base: base.clone(),
            quote: self.quote.clone(),
        })
    }
}
