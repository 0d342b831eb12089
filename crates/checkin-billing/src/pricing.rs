//! Term Price Schedule
//!
//! Maps a billing product to the price that applies in the current term.
//! The academic year is split in two halves, each with its own price per
//! product. The schedule is configured out of band as JSON:
//!
//! ```json
//! {
//!   "first_half_start_month": 4,
//!   "second_half_start_month": 10,
//!   "products": {
//!     "prod_A": { "first_half": "price_A1", "second_half": "price_A2" }
//!   }
//! }
//! ```

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Half of the academic year
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    FirstHalf,
    SecondHalf,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::FirstHalf => "first_half",
            Term::SecondHalf => "second_half",
        }
    }
}

/// Prices for one product
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermPrices {
    pub first_half: String,
    pub second_half: String,
}

impl TermPrices {
    fn for_term(&self, term: Term) -> &str {
        match term {
            Term::FirstHalf => &self.first_half,
            Term::SecondHalf => &self.second_half,
        }
    }
}

fn default_first_half_start() -> u32 { 4 }
fn default_second_half_start() -> u32 { 10 }

/// Product → term price mapping
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TermSchedule {
    #[serde(default = "default_first_half_start")]
    pub first_half_start_month: u32,

    #[serde(default = "default_second_half_start")]
    pub second_half_start_month: u32,

    #[serde(default)]
    pub products: HashMap<String, TermPrices>,
}

impl TermSchedule {
    /// Parse and validate a JSON schedule
    pub fn from_json(json: &str) -> Result<Self> {
        let schedule: Self = serde_json::from_str(json)
            .map_err(|e| BillingError::Config(format!("invalid term schedule: {e}")))?;
        schedule.validate()?;
        Ok(schedule)
    }

    /// Load from `TERM_SCHEDULE_PATH` (a JSON file) or `TERM_SCHEDULE_JSON`
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("TERM_SCHEDULE_PATH") {
            let json = std::fs::read_to_string(&path).map_err(|e| {
                BillingError::Config(format!("cannot read term schedule {path}: {e}"))
            })?;
            return Self::from_json(&json);
        }

        let json = std::env::var("TERM_SCHEDULE_JSON").map_err(|_| {
            BillingError::Config("TERM_SCHEDULE_PATH or TERM_SCHEDULE_JSON not set".into())
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        for month in [self.first_half_start_month, self.second_half_start_month] {
            if !(1..=12).contains(&month) {
                return Err(BillingError::Config(format!("term start month {month} out of range")));
            }
        }
        if self.first_half_start_month == self.second_half_start_month {
            return Err(BillingError::Config("term start months must differ".into()));
        }
        Ok(())
    }

    /// Term that contains `date`
    pub fn term_on(&self, date: NaiveDate) -> Term {
        let month = date.month();
        let first = self.first_half_start_month;
        let second = self.second_half_start_month;

        let in_first = if first < second {
            (first..second).contains(&month)
        } else {
            month >= first || month < second
        };

        if in_first { Term::FirstHalf } else { Term::SecondHalf }
    }

    /// Price ID for `product_id` on `date`
    ///
    /// A product missing from the schedule is a configuration error.
    pub fn price_for(&self, product_id: &str, date: NaiveDate) -> Result<&str> {
        let prices = self.products.get(product_id).ok_or_else(|| {
            BillingError::Config(format!("no price configured for product {product_id}"))
        })?;

        let price = prices.for_term(self.term_on(date));
        if price.is_empty() {
            return Err(BillingError::Config(format!(
                "empty {} price for product {product_id}",
                self.term_on(date).as_str()
            )));
        }
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> TermSchedule {
        TermSchedule::from_json(
            r#"{"products": {"prod_A": {"first_half": "price_A1", "second_half": "price_A2"}}}"#,
        )
        .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_term_boundaries() {
        let s = schedule();
        assert_eq!(s.term_on(date(2025, 4, 1)), Term::FirstHalf);
        assert_eq!(s.term_on(date(2025, 9, 30)), Term::FirstHalf);
        assert_eq!(s.term_on(date(2025, 10, 1)), Term::SecondHalf);
        assert_eq!(s.term_on(date(2026, 3, 31)), Term::SecondHalf);
    }

    #[test]
    fn test_price_follows_term() {
        let s = schedule();
        assert_eq!(s.price_for("prod_A", date(2025, 5, 10)).unwrap(), "price_A1");
        assert_eq!(s.price_for("prod_A", date(2025, 12, 1)).unwrap(), "price_A2");
    }

    #[test]
    fn test_unknown_product_is_config_error() {
        let err = schedule().price_for("prod_missing", date(2025, 5, 1)).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_wrapping_boundaries() {
        let s = TermSchedule::from_json(
            r#"{"first_half_start_month": 10, "second_half_start_month": 4}"#,
        )
        .unwrap();
        assert_eq!(s.term_on(date(2025, 11, 1)), Term::FirstHalf);
        assert_eq!(s.term_on(date(2025, 2, 1)), Term::FirstHalf);
        assert_eq!(s.term_on(date(2025, 6, 1)), Term::SecondHalf);
    }

    #[test]
    fn test_rejects_bad_months() {
        assert!(TermSchedule::from_json(r#"{"first_half_start_month": 13}"#).is_err());
        assert!(
            TermSchedule::from_json(
                r#"{"first_half_start_month": 5, "second_half_start_month": 5}"#
            )
            .is_err()
        );
    }
}
