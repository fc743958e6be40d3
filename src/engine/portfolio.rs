//! Portfolio data model (spec.md §3).
//!
//! Fetching, caching, and YAML persistence of portfolios are external collaborators'
//! responsibility (spec.md §1 Out-of-scope); this module owns only the shape, the
//! validation invariants, and the structural [`Portfolio::user_id`] hash that other
//! components key off of.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One brokerage/savings/exchange/vault account within a [`Portfolio`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Display name, e.g. `"Fidelity Brokerage"`.
    pub name: String,
    /// Account kind, e.g. `"brokerage"`, `"savings"`, `"exchange"`, `"vault"`.
    pub type_tag: String,
    /// ISO 4217 currency code the account's cash balance is denominated in.
    pub base_currency: String,
    /// Cash balance, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Holdings within this account.
    pub holdings: Vec<Holding>,
}

/// A single position within an [`Account`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// Ticker symbol. May be empty only when `asset_type == "cash"`.
    pub ticker: String,
    /// Number of units held. Must be non-negative.
    pub quantity: f64,
    /// Total cost basis in `currency`. Must be non-negative.
    pub cost_basis: f64,
    /// ISO 4217 currency code for `cost_basis`.
    pub currency: String,
    /// Asset classification, e.g. `"equity"`, `"bond"`, `"cash"`, `"crypto"`.
    pub asset_type: String,
    /// Human-readable security name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// GICS or similar sector classification, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    /// Geographic/market region, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// ISIN identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
}

/// An ordered sequence of accounts, as fetched from whatever external source the CLI
/// collaborator configures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    /// Timestamp of this snapshot. Must parse as `YYYY-MM-DD` or RFC3339 (enforced by
    /// [`Portfolio::validate`], not by the type itself — the field is a plain `String`
    /// because the two accepted formats are not unifiable into one `chrono` type without
    /// losing round-trip fidelity for callers that only supplied a calendar date).
    pub as_of: String,
    /// Accounts making up this portfolio, in a stable order.
    pub accounts: Vec<Account>,
}

/// A validation failure surfaced by [`Portfolio::validate`].
#[derive(Debug, Clone)]
pub enum PortfolioError {
    /// `as_of` didn't parse as `YYYY-MM-DD` or RFC3339.
    InvalidAsOf(String),
    /// A quantity or cost basis was negative.
    NegativeAmount {
        /// Account name the offending holding belongs to.
        account: String,
        /// Ticker of the offending holding (or empty, for a cash holding).
        ticker: String,
    },
    /// A non-cash holding had an empty ticker.
    EmptyTicker {
        /// Account name the offending holding belongs to.
        account: String,
    },
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortfolioError::InvalidAsOf(raw) => {
                write!(f, "as_of \"{raw}\" is neither YYYY-MM-DD nor RFC3339")
            }
            PortfolioError::NegativeAmount { account, ticker } => write!(
                f,
                "account \"{account}\" holding \"{ticker}\" has a negative quantity or cost basis"
            ),
            PortfolioError::EmptyTicker { account } => write!(
                f,
                "account \"{account}\" has a non-cash holding with an empty ticker"
            ),
        }
    }
}

impl std::error::Error for PortfolioError {}

impl Portfolio {
    /// Validate the invariants spec.md §3 places on a portfolio:
    /// - `as_of` parses as `YYYY-MM-DD` or RFC3339.
    /// - every holding's quantity and cost basis are non-negative.
    /// - a holding's ticker may only be empty when its asset type is `"cash"`.
    pub fn validate(&self) -> Result<(), PortfolioError> {
        let as_of_valid = NaiveDate::parse_from_str(&self.as_of, "%Y-%m-%d").is_ok()
            || DateTime::parse_from_rfc3339(&self.as_of).is_ok();
        if !as_of_valid {
            return Err(PortfolioError::InvalidAsOf(self.as_of.clone()));
        }
        for account in &self.accounts {
            for holding in &account.holdings {
                if holding.quantity < 0.0 || holding.cost_basis < 0.0 {
                    return Err(PortfolioError::NegativeAmount {
                        account: account.name.clone(),
                        ticker: holding.ticker.clone(),
                    });
                }
                if holding.ticker.is_empty() && holding.asset_type != "cash" {
                    return Err(PortfolioError::EmptyTicker {
                        account: account.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// A deterministic hash of the portfolio's *structure* — account type/currency and
    /// each holding's ticker/asset-type — independent of quantities, cost bases,
    /// balances, or display names, per the invariant in spec.md §8.
    ///
    /// Structural fields are hashed in account/holding order (the order already present
    /// in the portfolio) rather than sorted, so two portfolios that differ only in
    /// account/holding ordering intentionally produce different ids: reordering *is*
    /// a structural change (e.g. it would change `NormalizedForAI` bag output ordering).
    pub fn user_id(&self) -> String {
        let mut hasher = Sha256::new();
        for account in &self.accounts {
            hasher.update(account.type_tag.as_bytes());
            hasher.update([0u8]);
            hasher.update(account.base_currency.as_bytes());
            hasher.update([0u8]);
            for holding in &account.holdings {
                hasher.update(holding.ticker.as_bytes());
                hasher.update([0u8]);
                hasher.update(holding.asset_type.as_bytes());
                hasher.update([0u8]);
            }
            hasher.update([0xffu8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Current timestamp, used by the staleness check in the Out-of-scope fetch
    /// pipeline's caller; kept here since `as_of` parsing is this module's concern.
    pub fn as_of_datetime(&self) -> Option<DateTime<Utc>> {
        if let Ok(date) = NaiveDate::parse_from_str(&self.as_of, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
        DateTime::parse_from_rfc3339(&self.as_of).ok().map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Portfolio {
        Portfolio {
            as_of: "2024-01-01".to_string(),
            accounts: vec![Account {
                name: "Brokerage".to_string(),
                type_tag: "brokerage".to_string(),
                base_currency: "USD".to_string(),
                balance: Some(1000.0),
                holdings: vec![Holding {
                    ticker: "AAPL".to_string(),
                    quantity: 10.0,
                    cost_basis: 1500.0,
                    currency: "USD".to_string(),
                    asset_type: "equity".to_string(),
                    name: None,
                    sector: None,
                    region: None,
                    isin: None,
                }],
            }],
        }
    }

    #[test]
    fn calendar_date_as_of_validates() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rfc3339_as_of_validates() {
        let mut p = sample();
        p.as_of = "2024-01-01T00:00:00Z".to_string();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn malformed_as_of_is_rejected() {
        let mut p = sample();
        p.as_of = "not-a-date".to_string();
        assert!(matches!(p.validate(), Err(PortfolioError::InvalidAsOf(_))));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let mut p = sample();
        p.accounts[0].holdings[0].quantity = -1.0;
        assert!(matches!(p.validate(), Err(PortfolioError::NegativeAmount { .. })));
    }

    #[test]
    fn empty_ticker_allowed_only_for_cash() {
        let mut p = sample();
        p.accounts[0].holdings[0].ticker = String::new();
        assert!(matches!(p.validate(), Err(PortfolioError::EmptyTicker { .. })));
        p.accounts[0].holdings[0].asset_type = "cash".to_string();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn user_id_is_deterministic_and_value_independent() {
        let a = sample();
        let mut b = sample();
        b.accounts[0].holdings[0].quantity = 999.0;
        b.accounts[0].holdings[0].cost_basis = 1.0;
        b.accounts[0].balance = None;
        b.accounts[0].name = "Totally Different Name".to_string();
        assert_eq!(a.user_id(), b.user_id());
    }

    #[test]
    fn user_id_changes_with_structure() {
        let a = sample();
        let mut b = sample();
        b.accounts[0].holdings[0].asset_type = "bond".to_string();
        assert_ne!(a.user_id(), b.user_id());
    }

    #[test]
    fn round_trip_serialization_preserves_equality() {
        let p = sample();
        let json = serde_json::to_string(&p).unwrap();
        let back: Portfolio = serde_json::from_str(&json).unwrap();
        assert_eq!(p.user_id(), back.user_id());
        assert_eq!(p.as_of, back.as_of);
    }

    #[test]
    fn yaml_round_trip_preserves_equality() {
        let p = sample();
        let yaml = serde_yaml::to_string(&p).unwrap();
        let back: Portfolio = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(p.user_id(), back.user_id());
        assert_eq!(p.as_of, back.as_of);
        assert!(back.validate().is_ok());
    }
}
