//! Fixed catalogs of projects, currencies, and funding sources.
//!
//! Requests are tagged with one value from each catalog. The sets are
//! deliberately closed: deployment-specific additions go through a code
//! change, not configuration, so the permission mappings keyed by source
//! and project can stay total.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Organizational unit a request is charged against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Project {
    MfRf,
    MfKz,
    MfAm,
    MfWorld,
}

impl Project {
    pub const ALL: [Project; 4] = [Project::MfRf, Project::MfKz, Project::MfAm, Project::MfWorld];

    pub fn as_str(&self) -> &'static str {
        match self {
            Project::MfRf => "mf_rf",
            Project::MfKz => "mf_kz",
            Project::MfAm => "mf_am",
            Project::MfWorld => "mf_world",
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Project {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|project| project.as_str() == raw.trim())
            .ok_or_else(|| unknown_value("project", raw, Self::ALL.iter().map(Project::as_str)))
    }
}

/// Settlement currency of a request amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Rub,
    Kzt,
    Amd,
    Usd,
    Eur,
    Usdt,
}

impl Currency {
    pub const ALL: [Currency; 6] = [
        Currency::Rub,
        Currency::Kzt,
        Currency::Amd,
        Currency::Usd,
        Currency::Eur,
        Currency::Usdt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Kzt => "KZT",
            Currency::Amd => "AMD",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|currency| currency.as_str() == normalized)
            .ok_or_else(|| unknown_value("currency", raw, Self::ALL.iter().map(Currency::as_str)))
    }
}

/// Funding channel an expense is paid from. `Crypto` is special-cased in
/// the permission model: visibility is scoped per project rather than per
/// source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    RsRf,
    RsTooKz,
    RsIpKz,
    CardTooKz,
    CardIpKz,
    RsOooAm,
    RsOooAmEur,
    CardOooAm,
    Crypto,
    Cash,
}

impl Source {
    pub const ALL: [Source; 10] = [
        Source::RsRf,
        Source::RsTooKz,
        Source::RsIpKz,
        Source::CardTooKz,
        Source::CardIpKz,
        Source::RsOooAm,
        Source::RsOooAmEur,
        Source::CardOooAm,
        Source::Crypto,
        Source::Cash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::RsRf => "rs_rf",
            Source::RsTooKz => "rs_too_kz",
            Source::RsIpKz => "rs_ip_kz",
            Source::CardTooKz => "card_too_kz",
            Source::CardIpKz => "card_ip_kz",
            Source::RsOooAm => "rs_ooo_am",
            Source::RsOooAmEur => "rs_ooo_am_eur",
            Source::CardOooAm => "card_ooo_am",
            Source::Crypto => "crypto",
            Source::Cash => "cash",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == raw.trim())
            .ok_or_else(|| unknown_value("source", raw, Self::ALL.iter().map(Source::as_str)))
    }
}

fn unknown_value<'a>(
    field: &'static str,
    raw: &str,
    allowed: impl Iterator<Item = &'a str>,
) -> ValidationError {
    let allowed = allowed.collect::<Vec<_>>().join(", ");
    ValidationError::new(field, format!("unknown {field} `{}` (expected one of: {allowed})", raw.trim()))
}

#[cfg(test)]
mod tests {
    use super::{Currency, Project, Source};

    #[test]
    fn catalog_codes_round_trip() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().expect("parse source"), source);
        }
        for project in Project::ALL {
            assert_eq!(project.as_str().parse::<Project>().expect("parse project"), project);
        }
        for currency in Currency::ALL {
            assert_eq!(currency.as_str().parse::<Currency>().expect("parse currency"), currency);
        }
    }

    #[test]
    fn currency_parse_is_case_insensitive() {
        assert_eq!("usdt".parse::<Currency>().expect("parse"), Currency::Usdt);
    }

    #[test]
    fn unknown_source_names_the_allowed_set() {
        let error = "paypal".parse::<Source>().expect_err("must fail");
        assert!(error.to_string().contains("crypto"));
        assert!(error.to_string().contains("paypal"));
    }
}
