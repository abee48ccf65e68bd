//! A validated, normalized stock symbol.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a raw symbol was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTicker {
    #[error("ticker symbol is missing or blank")]
    Missing,

    #[error("ticker '{symbol}' must be at least 2 characters")]
    TooShort { symbol: String },

    #[error("ticker '{symbol}' is not a valid ticker symbol")]
    Malformed { symbol: String },
}

/// Trimmed, upper-cased symbol made of letter groups joined by single hyphens
/// (`AAPL`, `BRK-B`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub const MIN_LEN: usize = 2;

    /// Normalize and validate a raw symbol.
    pub fn parse(raw: &str) -> Result<Self, InvalidTicker> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidTicker::Missing);
        }

        let symbol = trimmed.to_uppercase();
        if symbol.chars().count() < Self::MIN_LEN {
            return Err(InvalidTicker::TooShort { symbol });
        }

        let well_formed = symbol
            .split('-')
            .all(|group| !group.is_empty() && group.bytes().all(|b| b.is_ascii_uppercase()));
        if !well_formed {
            return Err(InvalidTicker::Malformed { symbol });
        }

        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Ticker {
    type Error = InvalidTicker;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl std::str::FromStr for Ticker {
    type Err = InvalidTicker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
