//! Field validation for draft input.
//!
//! Every function here is pure: it takes raw text (plus the few knobs
//! that are configuration, like the amount ceiling and the current date)
//! and returns either a normalized value or a [`ValidationError`] with a
//! reason suitable for showing to the submitter. Nothing in this module
//! touches storage or the clock.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Default upper bound for request amounts, in whole currency units.
pub const DEFAULT_AMOUNT_CEILING: u64 = 1_000_000_000;

/// A field-level rule failure. The reason is human-readable and safe to
/// relay to the user as-is.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

/// Parse an amount accepting either `.` or `,` as the fractional
/// separator. Must be strictly positive and at most `ceiling`.
pub fn amount(raw: &str, ceiling: Decimal) -> Result<Decimal, ValidationError> {
    let normalized = raw.trim().replace(',', ".");
    let value = normalized
        .parse::<Decimal>()
        .map_err(|_| ValidationError::new("amount", "expected a number (dot or comma separator)"))?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }
    if value > ceiling {
        return Err(ValidationError::new("amount", format!("must not exceed {ceiling}")));
    }
    Ok(value)
}

/// Parse an expense date in `YYYY-MM-DD` or `DD.MM.YYYY` form. Dates
/// strictly before `today` are rejected; the result is a calendar date.
pub fn expense_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
        .map_err(|_| ValidationError::new("date", "expected YYYY-MM-DD or DD.MM.YYYY"))?;
    if parsed < today {
        return Err(ValidationError::new("date", "must not be in the past"));
    }
    Ok(parsed)
}

/// Periodicity of a request: a recurring label, a single payment date, or
/// an inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Period {
    OneTime,
    Monthly,
    Weekly,
    Single(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

const PERIOD_DATE_FORMAT: &str = "%d.%m.%Y";

impl Period {
    /// Accepts `one_time` / `monthly` / `weekly`, a `DD.MM.YYYY` date, or
    /// a `DD.MM.YYYY-DD.MM.YYYY` range with start <= end.
    pub fn parse(raw: &str) -> Result<Period, ValidationError> {
        let raw = raw.trim();
        match raw {
            "one_time" => return Ok(Period::OneTime),
            "monthly" => return Ok(Period::Monthly),
            "weekly" => return Ok(Period::Weekly),
            _ => {}
        }

        if let Some((start, end)) = raw.split_once('-') {
            let start = parse_period_date(start)?;
            let end = parse_period_date(end)?;
            if start > end {
                return Err(ValidationError::new("period", "start date is after end date"));
            }
            return Ok(Period::Range { start, end });
        }

        Ok(Period::Single(parse_period_date(raw)?))
    }
}

fn parse_period_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), PERIOD_DATE_FORMAT).map_err(|_| {
        ValidationError::new(
            "period",
            "expected one_time, monthly, weekly, DD.MM.YYYY, or DD.MM.YYYY-DD.MM.YYYY",
        )
    })
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::OneTime => f.write_str("one_time"),
            Period::Monthly => f.write_str("monthly"),
            Period::Weekly => f.write_str("weekly"),
            Period::Single(date) => write!(f, "{}", date.format(PERIOD_DATE_FORMAT)),
            Period::Range { start, end } => write!(
                f,
                "{}-{}",
                start.format(PERIOD_DATE_FORMAT),
                end.format(PERIOD_DATE_FORMAT)
            ),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Period::parse(raw)
    }
}

// Free-text rules. All of them trim, strip markup-dangerous characters,
// then enforce field-specific length bounds on what remains.

pub fn note(raw: &str) -> Result<String, ValidationError> {
    bounded("note", raw, 2, 1000)
}

pub fn comment(raw: &str) -> Result<String, ValidationError> {
    bounded("comment", raw, 1, 500)
}

pub fn rejection_reason(raw: &str) -> Result<String, ValidationError> {
    bounded("reason", raw, 2, 200)
}

pub fn partner_account(raw: &str) -> Result<String, ValidationError> {
    bounded("partner_account", raw, 2, 100)
}

pub fn document_ref(raw: &str) -> Result<String, ValidationError> {
    bounded("document", raw, 1, 255)
}

pub fn edit_value(raw: &str) -> Result<String, ValidationError> {
    bounded("value", raw, 1, 100)
}

/// Validate a raw value for one named field, producing a typed change the
/// store can apply. `ceiling` and `today` come from configuration and the
/// caller's clock so the function stays pure.
pub fn field_change(
    field: crate::domain::request::RequestField,
    raw: &str,
    ceiling: Decimal,
    today: NaiveDate,
) -> Result<crate::domain::request::FieldChange, ValidationError> {
    use crate::domain::request::{FieldChange, RequestField};

    Ok(match field {
        RequestField::Project => FieldChange::Project(raw.parse()?),
        RequestField::Amount => FieldChange::Amount(amount(raw, ceiling)?),
        RequestField::Currency => FieldChange::Currency(raw.parse()?),
        RequestField::Source => FieldChange::Source(raw.parse()?),
        RequestField::Note => FieldChange::Note(note(raw)?),
        RequestField::PartnerAccount => FieldChange::PartnerAccount(partner_account(raw)?),
        RequestField::DocumentRef => FieldChange::DocumentRef(document_ref(raw)?),
        RequestField::Period => FieldChange::Period(Period::parse(raw)?),
        RequestField::ExpenseDate => FieldChange::ExpenseDate(expense_date(raw, today)?),
    })
}

fn sanitize(raw: &str) -> String {
    raw.trim().chars().filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '`')).collect()
}

fn bounded(
    field: &'static str,
    raw: &str,
    min: usize,
    max: usize,
) -> Result<String, ValidationError> {
    let value = sanitize(raw);
    let length = value.chars().count();
    if length < min || length > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {min} and {max} characters"),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{DEFAULT_AMOUNT_CEILING, Period};

    fn ceiling() -> Decimal {
        Decimal::from(DEFAULT_AMOUNT_CEILING)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn amount_accepts_comma_separator() {
        assert_eq!(
            super::amount("12,50", ceiling()).expect("valid amount"),
            Decimal::new(1250, 2)
        );
    }

    #[test]
    fn amount_rejects_zero_and_negative() {
        assert!(super::amount("0", ceiling()).is_err());
        assert!(super::amount("-5", ceiling()).is_err());
    }

    #[test]
    fn amount_honors_the_ceiling() {
        assert!(super::amount("1000000001", ceiling()).is_err());
        assert!(super::amount("999999999.99", ceiling()).is_ok());
    }

    #[test]
    fn amount_rejects_garbage() {
        let error = super::amount("12.3.4", ceiling()).expect_err("must fail");
        assert_eq!(error.field, "amount");
    }

    #[test]
    fn date_accepts_both_formats_and_normalizes() {
        let today = date(2026, 1, 1);
        assert_eq!(
            super::expense_date("2026-03-01", today).expect("iso"),
            date(2026, 3, 1)
        );
        assert_eq!(
            super::expense_date("01.03.2026", today).expect("dotted"),
            date(2026, 3, 1)
        );
    }

    #[test]
    fn date_rejects_the_past_but_allows_today() {
        let today = date(2026, 1, 1);
        assert!(super::expense_date("01.01.2000", today).is_err());
        assert!(super::expense_date("2026-01-01", today).is_ok());
    }

    #[test]
    fn period_parses_labels_dates_and_ranges() {
        assert_eq!(Period::parse("monthly").expect("label"), Period::Monthly);
        assert_eq!(
            Period::parse("05.02.2026").expect("single"),
            Period::Single(date(2026, 2, 5))
        );
        assert_eq!(
            Period::parse("01.02.2026-28.02.2026").expect("range"),
            Period::Range { start: date(2026, 2, 1), end: date(2026, 2, 28) }
        );
    }

    #[test]
    fn period_rejects_inverted_ranges() {
        let error = Period::parse("28.02.2026-01.02.2026").expect_err("must fail");
        assert!(error.reason.contains("start date"));
    }

    #[test]
    fn period_display_round_trips() {
        for raw in ["one_time", "weekly", "05.02.2026", "01.02.2026-28.02.2026"] {
            let period = Period::parse(raw).expect("parse");
            assert_eq!(period.to_string(), raw);
        }
    }

    #[test]
    fn free_text_is_sanitized_before_length_check() {
        let value = super::comment("  <b>ok</b>  ").expect("valid comment");
        assert_eq!(value, "bok/b");
    }

    #[test]
    fn rejection_reason_bounds() {
        assert_eq!(super::rejection_reason("ok").expect("two chars"), "ok");
        assert!(super::rejection_reason("").is_err());
        assert!(super::rejection_reason(&"x".repeat(201)).is_err());
    }

    #[test]
    fn note_requires_two_characters() {
        assert!(super::note("a").is_err());
        assert!(super::note("ad spend").is_ok());
    }
}
