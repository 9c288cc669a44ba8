#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod ingest;
pub mod security;

pub use config::{ConfidenceWeights, ExtractorConfig, PlausibilityBand, StatusThresholds};
pub use error::{Error, Result};
pub use security::{Isin, Jurisdiction, PortfolioSummary, SecurityRecord, ValidationStatus};
