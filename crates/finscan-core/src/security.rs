use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// International Securities Identification Number.
///
/// Only the shape `[A-Z]{2}[A-Z0-9]{9}[0-9]` is enforced. The check digit is
/// not validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isin(String);

impl Isin {
    pub const LEN: usize = 12;

    #[must_use]
    pub fn parse(candidate: &str) -> Option<Self> {
        if is_isin_shape(candidate) {
            Some(Self(candidate.to_string()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn country_code(&self) -> &str {
        &self.0[..2]
    }

    #[must_use]
    pub fn jurisdiction(&self) -> Jurisdiction {
        Jurisdiction::from_prefix(self.country_code())
    }
}

impl std::fmt::Display for Isin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Isin {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_isin_shape(&value) {
            Ok(Self(value))
        } else {
            Err(crate::Error::InvalidIsin(value))
        }
    }
}

impl From<Isin> for String {
    fn from(isin: Isin) -> Self {
        isin.0
    }
}

impl AsRef<str> for Isin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_isin_shape(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == Isin::LEN
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..11]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        && bytes[11].is_ascii_digit()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jurisdiction {
    InternationalBond,
    SwissSecurity,
    LuxembourgFund,
    Other,
}

impl Jurisdiction {
    /// Classifies by the first two characters. Total: unknown prefixes are `Other`.
    #[must_use]
    pub fn from_prefix(identifier: &str) -> Self {
        match identifier.get(..2) {
            Some("XS") => Self::InternationalBond,
            Some("CH") => Self::SwissSecurity,
            Some("LU") => Self::LuxembourgFund,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternationalBond => "international_bond",
            Self::SwissSecurity => "swiss_security",
            Self::LuxembourgFund => "luxembourg_fund",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InternationalBond => "international bond",
            Self::SwissSecurity => "Swiss security",
            Self::LuxembourgFund => "Luxembourg fund",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Jurisdiction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "international_bond" => Ok(Self::InternationalBond),
            "swiss_security" => Ok(Self::SwissSecurity),
            "luxembourg_fund" => Ok(Self::LuxembourgFund),
            "other" => Ok(Self::Other),
            _ => Err(crate::Error::InvalidJurisdiction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Validated,
    Acceptable,
    Failed,
    Incomplete,
}

impl ValidationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Acceptable => "acceptable",
            Self::Failed => "failed",
            Self::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validated" => Ok(Self::Validated),
            "acceptable" => Ok(Self::Acceptable),
            "failed" => Ok(Self::Failed),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub isin: Isin,
    pub jurisdiction: Jurisdiction,
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub market_value: Option<f64>,
    pub currency: Option<String>,
    pub confidence: f64,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<u32>,
}

impl SecurityRecord {
    /// A record with only the identifier bound.
    #[must_use]
    pub fn new(isin: Isin) -> Self {
        let jurisdiction = isin.jurisdiction();
        Self {
            isin,
            jurisdiction,
            name: None,
            quantity: None,
            price: None,
            market_value: None,
            currency: None,
            confidence: 0.0,
            status: ValidationStatus::Incomplete,
            pages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_market_value(mut self, value: f64) -> Self {
        self.market_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub security_count: usize,
    pub currencies: BTreeSet<String>,
    pub status_breakdown: BTreeMap<ValidationStatus, usize>,
    pub jurisdiction_breakdown: BTreeMap<Jurisdiction, usize>,
    pub average_confidence: f64,
}

impl PortfolioSummary {
    #[must_use]
    pub fn from_records(records: &[SecurityRecord]) -> Self {
        let mut summary = records.iter().fold(Self::default(), |mut acc, record| {
            acc.total_value += record.market_value.unwrap_or(0.0);
            acc.security_count += 1;
            if let Some(currency) = &record.currency {
                acc.currencies.insert(currency.clone());
            }
            *acc.status_breakdown.entry(record.status).or_insert(0) += 1;
            *acc.jurisdiction_breakdown.entry(record.jurisdiction).or_insert(0) += 1;
            acc.average_confidence += record.confidence;
            acc
        });

        if summary.security_count > 0 {
            summary.average_confidence /= summary.security_count as f64;
        }

        summary
    }

    pub fn count_with_status(&self, status: ValidationStatus) -> usize {
        self.status_breakdown.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isin_shape() {
        assert!(Isin::parse("XS2746319610").is_some());
        assert!(Isin::parse("CH1908490000").is_some());
        assert!(Isin::parse("DE000000000X").is_none());
        assert!(Isin::parse("xs2746319610").is_none());
        assert!(Isin::parse("XS274631961").is_none());
        assert!(Isin::parse("97%").is_none());
    }

    #[test]
    fn test_jurisdiction_from_prefix() {
        assert_eq!(
            Jurisdiction::from_prefix("XS2746319610"),
            Jurisdiction::InternationalBond
        );
        assert_eq!(
            Jurisdiction::from_prefix("CH1908490000"),
            Jurisdiction::SwissSecurity
        );
        assert_eq!(
            Jurisdiction::from_prefix("LU0123456789"),
            Jurisdiction::LuxembourgFund
        );
        assert_eq!(Jurisdiction::from_prefix("DE000000000X"), Jurisdiction::Other);
        assert_eq!(Jurisdiction::from_prefix(""), Jurisdiction::Other);
    }

    #[test]
    fn test_isin_country_code() {
        let isin = Isin::parse("CH0038863350").unwrap();
        assert_eq!(isin.country_code(), "CH");
        assert_eq!(isin.jurisdiction(), Jurisdiction::SwissSecurity);
    }

    #[test]
    fn test_jurisdiction_round_trip_str() {
        for j in [
            Jurisdiction::InternationalBond,
            Jurisdiction::SwissSecurity,
            Jurisdiction::LuxembourgFund,
            Jurisdiction::Other,
        ] {
            assert_eq!(j.as_str().parse::<Jurisdiction>().unwrap(), j);
        }
        assert!("bond".parse::<Jurisdiction>().is_err());
    }

    #[test]
    fn test_summary_fold() {
        let isin_a = Isin::parse("CH1908490000").unwrap();
        let isin_b = Isin::parse("XS2746319610").unwrap();

        let records = vec![
            SecurityRecord::new(isin_a)
                .with_market_value(1_000.0)
                .with_currency("CHF")
                .with_status(ValidationStatus::Acceptable)
                .with_confidence(0.5),
            SecurityRecord::new(isin_b)
                .with_currency("USD")
                .with_confidence(0.2),
        ];

        let summary = PortfolioSummary::from_records(&records);

        assert!((summary.total_value - 1_000.0).abs() < f64::EPSILON);
        assert_eq!(summary.security_count, 2);
        assert_eq!(summary.currencies.len(), 2);
        assert_eq!(summary.count_with_status(ValidationStatus::Acceptable), 1);
        assert_eq!(summary.count_with_status(ValidationStatus::Incomplete), 1);
        assert_eq!(summary.count_with_status(ValidationStatus::Validated), 0);
        assert!((summary.average_confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary() {
        let summary = PortfolioSummary::from_records(&[]);
        assert_eq!(summary.security_count, 0);
        assert!(summary.total_value.abs() < f64::EPSILON);
        assert!(summary.average_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_serializes_numbers() {
        let record = SecurityRecord::new(Isin::parse("XS2746319610").unwrap())
            .with_market_value(192_100.0);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["isin"], "XS2746319610");
        assert_eq!(json["jurisdiction"], "international_bond");
        assert_eq!(json["market_value"], 192_100.0);
        assert!(json["name"].is_null());
    }
}
