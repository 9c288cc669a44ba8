use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::extractor::{PartialExtraction, SecurityMention};
use crate::config::{ConfidenceWeights, ExtractorConfig, StatusThresholds};
use crate::security::{Isin, PortfolioSummary, SecurityRecord, ValidationStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub records: Vec<SecurityRecord>,
    pub summary: PortfolioSummary,
}

/// Merges per-page extractions into one record per identifier.
///
/// Pages are consumed in the order given. For every field the first bound
/// value wins; later mentions only fill fields that are still empty.
pub struct Reconciler {
    weights: ConfidenceWeights,
    thresholds: StatusThresholds,
}

impl Reconciler {
    #[must_use]
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            weights: config.weights,
            thresholds: config.thresholds,
        }
    }

    pub fn reconcile(&self, partials: &[PartialExtraction]) -> Reconciliation {
        let mut order: Vec<Isin> = Vec::new();
        let mut merged: HashMap<Isin, (SecurityRecord, BTreeSet<u32>)> = HashMap::new();

        for partial in partials {
            for mention in &partial.mentions {
                let (record, pages) = merged.entry(mention.isin.clone()).or_insert_with(|| {
                    order.push(mention.isin.clone());
                    (SecurityRecord::new(mention.isin.clone()), BTreeSet::new())
                });
                enrich(record, mention);
                pages.insert(mention.page);
            }

            for isin in &partial.identifiers {
                let (_, pages) = merged.entry(isin.clone()).or_insert_with(|| {
                    order.push(isin.clone());
                    (SecurityRecord::new(isin.clone()), BTreeSet::new())
                });
                pages.insert(partial.page);
            }
        }

        let records: Vec<SecurityRecord> = order
            .iter()
            .filter_map(|isin| merged.remove(isin))
            .map(|(mut record, pages)| {
                record.pages = pages.into_iter().collect();
                record.confidence = self.confidence(&record);
                record.status = self.status(&record);
                record
            })
            .collect();

        let summary = PortfolioSummary::from_records(&records);

        tracing::debug!(
            securities = summary.security_count,
            total_value = summary.total_value,
            "reconciled"
        );

        Reconciliation { records, summary }
    }

    /// Sum of the weights of the bound fields, clamped to `[0, 1]` and rounded
    /// to four decimals so threshold comparisons are exact.
    pub fn confidence(&self, record: &SecurityRecord) -> f64 {
        let w = &self.weights;
        let score = w.identifier
            + bound_weight(record.name.is_some(), w.name)
            + bound_weight(record.quantity.is_some(), w.quantity)
            + bound_weight(record.price.is_some(), w.price)
            + bound_weight(record.market_value.is_some(), w.market_value);
        (score.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
    }

    pub fn status(&self, record: &SecurityRecord) -> ValidationStatus {
        let t = &self.thresholds;
        if record.market_value.is_none() {
            ValidationStatus::Incomplete
        } else if record.confidence >= t.validated {
            ValidationStatus::Validated
        } else if record.confidence >= t.acceptable {
            ValidationStatus::Acceptable
        } else if record.confidence < t.failed {
            ValidationStatus::Failed
        } else {
            ValidationStatus::Incomplete
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(&ExtractorConfig::default())
    }
}

const fn bound_weight(bound: bool, weight: f64) -> f64 {
    if bound {
        weight
    } else {
        0.0
    }
}

fn enrich(record: &mut SecurityRecord, mention: &SecurityMention) {
    if record.name.is_none() {
        record.name.clone_from(&mention.name);
    }
    if record.quantity.is_none() {
        record.quantity = mention.quantity;
    }
    if record.price.is_none() {
        record.price = mention.price;
    }
    if record.market_value.is_none() {
        record.market_value = mention.market_value;
    }
    if record.currency.is_none() {
        record.currency.clone_from(&mention.currency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::extractor::MentionOrigin;

    fn isin(s: &str) -> Isin {
        Isin::parse(s).unwrap()
    }

    fn mention(id: &str, page: u32) -> SecurityMention {
        SecurityMention::new(isin(id), page, MentionOrigin::Text { line: 0 })
    }

    fn page(number: u32, mentions: Vec<SecurityMention>) -> PartialExtraction {
        let mut partial = PartialExtraction::new(number);
        partial.identifiers = mentions.iter().map(|m| m.isin.clone()).collect();
        partial.mentions = mentions;
        partial
    }

    #[test]
    fn test_dedup_first_name_wins() {
        let first = SecurityMention {
            name: Some("Nestle SA".into()),
            ..mention("CH0038863350", 1)
        };
        let second = SecurityMention {
            name: Some("Nestle Namen".into()),
            market_value: Some(157_350.0),
            ..mention("CH0038863350", 3)
        };

        let result = Reconciler::default().reconcile(&[page(1, vec![first]), page(3, vec![second])]);

        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.name.as_deref(), Some("Nestle SA"));
        assert_eq!(record.market_value, Some(157_350.0));
        assert_eq!(record.pages, vec![1, 3]);
    }

    #[test]
    fn test_record_order_follows_document() {
        let result = Reconciler::default().reconcile(&[
            page(1, vec![mention("XS2746319610", 1)]),
            page(2, vec![mention("CH1908490000", 2), mention("XS2746319610", 2)]),
        ]);

        let ids: Vec<&str> = result.records.iter().map(|r| r.isin.as_str()).collect();
        assert_eq!(ids, vec!["XS2746319610", "CH1908490000"]);
    }

    #[test]
    fn test_identifier_without_mention_still_recorded() {
        let mut partial = PartialExtraction::new(1);
        partial.identifiers.insert(isin("LU0123456789"));

        let result = Reconciler::default().reconcile(&[partial]);

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].status, ValidationStatus::Incomplete);
        assert!((result.records[0].confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_monotonic() {
        let reconciler = Reconciler::default();
        let mut record = SecurityRecord::new(isin("CH0038863350"));
        let mut last = reconciler.confidence(&record);

        record.market_value = Some(10_000.0);
        let with_value = reconciler.confidence(&record);
        assert!(with_value > last);
        last = with_value;

        record.name = Some("Nestle".into());
        let with_name = reconciler.confidence(&record);
        assert!(with_name > last);
        last = with_name;

        record.quantity = Some(1_000.0);
        record.price = Some(1_500.0);
        let full = reconciler.confidence(&record);
        assert!(full > last);
        assert!((full - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_thresholds() {
        let reconciler = Reconciler::default();
        let base = SecurityRecord::new(isin("CH0038863350"));

        let missing_value = SecurityRecord {
            confidence: 0.95,
            ..base.clone()
        };
        assert_eq!(reconciler.status(&missing_value), ValidationStatus::Incomplete);

        let high = SecurityRecord {
            confidence: 0.9,
            market_value: Some(1_000.0),
            ..base.clone()
        };
        assert_eq!(reconciler.status(&high), ValidationStatus::Validated);

        let mid = SecurityRecord {
            confidence: 0.7,
            market_value: Some(1_000.0),
            ..base.clone()
        };
        assert_eq!(reconciler.status(&mid), ValidationStatus::Acceptable);

        let low = SecurityRecord {
            confidence: 0.5,
            market_value: Some(1_000.0),
            ..base
        };
        assert_eq!(reconciler.status(&low), ValidationStatus::Failed);
    }

    #[test]
    fn test_gap_between_failed_and_acceptable_is_incomplete() {
        let mut config = ExtractorConfig::default();
        config.thresholds.failed = 0.3;
        config.thresholds.acceptable = 0.6;
        let reconciler = Reconciler::new(&config);

        let record = SecurityRecord::new(isin("CH0038863350"))
            .with_market_value(5_000.0)
            .with_confidence(0.5);

        assert_eq!(reconciler.status(&record), ValidationStatus::Incomplete);
    }

    #[test]
    fn test_summary_over_records() {
        let a = SecurityMention {
            name: Some("Nestle SA".into()),
            market_value: Some(157_350.0),
            currency: Some("CHF".into()),
            ..mention("CH0038863350", 1)
        };
        let b = SecurityMention {
            market_value: Some(42_650.0),
            currency: Some("USD".into()),
            ..mention("XS2746319610", 1)
        };

        let result = Reconciler::default().reconcile(&[page(1, vec![a, b])]);

        assert!((result.summary.total_value - 200_000.0).abs() < 1e-6);
        assert_eq!(result.summary.security_count, 2);
        assert_eq!(result.summary.currencies.len(), 2);
        assert_eq!(result.summary.count_with_status(ValidationStatus::Acceptable), 1);
        assert_eq!(result.summary.count_with_status(ValidationStatus::Failed), 1);
    }

    #[test]
    fn test_every_status_reachable_with_defaults() {
        let reconciler = Reconciler::default();
        let base = SecurityMention {
            currency: Some("CHF".into()),
            ..mention("CH0038863350", 1)
        };
        let status_of = |mention: SecurityMention| {
            let result = reconciler.reconcile(&[page(1, vec![mention])]);
            (result.records[0].confidence, result.records[0].status)
        };

        let identifier_only = status_of(base.clone());
        let value_only = status_of(SecurityMention {
            market_value: Some(157_350.0),
            ..base.clone()
        });
        let value_and_price = status_of(SecurityMention {
            price: Some(104_900.0),
            market_value: Some(157_350.0),
            ..base.clone()
        });
        let value_name_quantity = status_of(SecurityMention {
            name: Some("Nestle SA".into()),
            quantity: Some(1_500.0),
            market_value: Some(157_350.0),
            ..base
        });

        assert_eq!(identifier_only.1, ValidationStatus::Incomplete);
        assert_eq!(value_only, (0.5, ValidationStatus::Failed));
        assert_eq!(value_and_price, (0.65, ValidationStatus::Acceptable));
        assert_eq!(value_name_quantity, (0.85, ValidationStatus::Validated));
    }

    #[test]
    fn test_empty_input() {
        let result = Reconciler::default().reconcile(&[]);
        assert!(result.records.is_empty());
        assert_eq!(result.summary.security_count, 0);
    }
}
