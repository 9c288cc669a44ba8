use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive range of amounts accepted as monetary values.
///
/// Anything outside is treated as noise: page numbers, percentages, years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlausibilityBand {
    pub min: f64,
    pub max: f64,
}

impl Default for PlausibilityBand {
    fn default() -> Self {
        Self {
            min: 1_000.0,
            max: 50_000_000.0,
        }
    }
}

impl PlausibilityBand {
    #[must_use]
    pub fn contains(&self, amount: f64) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// Contribution of each bound field to a record's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub identifier: f64,
    pub name: f64,
    pub quantity: f64,
    pub price: f64,
    pub market_value: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            identifier: 0.2,
            name: 0.2,
            quantity: 0.15,
            price: 0.15,
            market_value: 0.3,
        }
    }
}

impl ConfidenceWeights {
    fn all(&self) -> [f64; 5] {
        [
            self.identifier,
            self.name,
            self.quantity,
            self.price,
            self.market_value,
        ]
    }
}

/// Confidence cut-offs for validation status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    /// At or above: validated.
    pub validated: f64,
    /// At or above: acceptable.
    pub acceptable: f64,
    /// Below: failed.
    pub failed: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            validated: 0.85,
            acceptable: 0.65,
            failed: 0.6,
        }
    }
}

const DEFAULT_CURRENCIES: &[&str] = &[
    "CHF", "EUR", "USD", "GBP", "JPY", "CAD", "AUD", "SEK", "NOK", "DKK", "HKD", "SGD",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub plausibility: PlausibilityBand,
    pub weights: ConfidenceWeights,
    pub thresholds: StatusThresholds,
    /// Lines after an identifier searched for its amounts in free text.
    pub context_lines: usize,
    /// Currency codes recognized next to amounts.
    pub currencies: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            plausibility: PlausibilityBand::default(),
            weights: ConfidenceWeights::default(),
            thresholds: StatusThresholds::default(),
            context_lines: 3,
            currencies: DEFAULT_CURRENCIES.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

impl ExtractorConfig {
    pub const ENV_MIN_AMOUNT: &'static str = "FINSCAN_MIN_AMOUNT";
    pub const ENV_MAX_AMOUNT: &'static str = "FINSCAN_MAX_AMOUNT";
    pub const ENV_CONTEXT_LINES: &'static str = "FINSCAN_CONTEXT_LINES";

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Reads a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(min) = env_number::<f64>(Self::ENV_MIN_AMOUNT)? {
            self.plausibility.min = min;
        }
        if let Some(max) = env_number::<f64>(Self::ENV_MAX_AMOUNT)? {
            self.plausibility.max = max;
        }
        if let Some(lines) = env_number::<usize>(Self::ENV_CONTEXT_LINES)? {
            self.context_lines = lines;
        }
        self.validate()?;
        Ok(self)
    }

    #[must_use]
    pub fn with_plausibility(mut self, min: f64, max: f64) -> Self {
        self.plausibility = PlausibilityBand { min, max };
        self
    }

    pub fn validate(&self) -> Result<()> {
        let band = self.plausibility;
        if !band.min.is_finite() || !band.max.is_finite() || band.min > band.max {
            return Err(Error::InvalidConfig(format!(
                "plausibility band [{}, {}] is empty",
                band.min, band.max
            )));
        }

        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::InvalidConfig(
                "confidence weights must be non-negative".into(),
            ));
        }

        let t = self.thresholds;
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(t.validated) && in_unit(t.acceptable) && in_unit(t.failed)) {
            return Err(Error::InvalidConfig(
                "status thresholds must lie in [0, 1]".into(),
            ));
        }
        if t.failed > t.acceptable || t.acceptable > t.validated {
            return Err(Error::InvalidConfig(format!(
                "status thresholds out of order: failed {} <= acceptable {} <= validated {}",
                t.failed, t.acceptable, t.validated
            )));
        }

        if self.currencies.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::InvalidConfig("empty currency code".into()));
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{key}={raw} is not a number"))),
        Err(_) => Ok(None),
    }
}
