use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::extractor::{PageExtractor, PartialExtraction, RuleBasedExtractor};
use super::parser::{
    CompositeReader, DocumentFormat, DocumentReader, PageContent, ParseError, ParsedDocument,
};
use super::reconciler::Reconciler;
use crate::config::ExtractorConfig;
use crate::security::{PortfolioSummary, SecurityRecord};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] crate::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub pages_with_text: usize,
    pub tables: usize,
    /// Distinct identifiers per page, summed over pages.
    pub identifier_occurrences: usize,
    pub amount_candidates: usize,
    pub duration_ms: u64,
}

impl ExtractionStats {
    fn from_partials(partials: &[PartialExtraction]) -> Self {
        partials.iter().fold(Self::default(), |mut stats, partial| {
            stats.tables += partial.tables.len();
            stats.identifier_occurrences += partial.identifiers.len();
            stats.amount_candidates += partial.amounts.len();
            stats
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub id: Uuid,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub format: DocumentFormat,
    pub page_count: u32,
    pub extracted_at: DateTime<Utc>,
    pub securities: Vec<SecurityRecord>,
    pub summary: PortfolioSummary,
    pub stats: ExtractionStats,
}

impl ExtractionReport {
    pub fn security(&self, isin: &str) -> Option<&SecurityRecord> {
        self.securities.iter().find(|s| s.isin.as_str() == isin)
    }
}

pub struct ExtractionPipeline {
    reader: Box<dyn DocumentReader>,
    extractor: Box<dyn PageExtractor>,
    reconciler: Reconciler,
}

impl ExtractionPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: Box::new(CompositeReader::default()),
            extractor: Box::new(RuleBasedExtractor::default()),
            reconciler: Reconciler::default(),
        }
    }

    /// Rebuilds the extractor and reconciler from `config`.
    pub fn with_config(mut self, config: &ExtractorConfig) -> PipelineResult<Self> {
        config.validate()?;
        self.extractor = Box::new(RuleBasedExtractor::new(config));
        self.reconciler = Reconciler::new(config);
        Ok(self)
    }

    pub fn extract_file(&self, path: &Path) -> PipelineResult<ExtractionReport> {
        let start = Instant::now();
        let document = self.reader.read_file(path)?;
        let document = match (document.title.is_some(), path.file_name()) {
            (false, Some(name)) => document.with_title(name.to_string_lossy().into_owned()),
            _ => document,
        };

        Ok(self.extract_document(path.display().to_string(), document, start))
    }

    pub fn extract_bytes(
        &self,
        data: &[u8],
        format: DocumentFormat,
        source: &str,
    ) -> PipelineResult<ExtractionReport> {
        let start = Instant::now();
        let document = self.reader.read_bytes(data, format)?;
        Ok(self.extract_document(source.to_string(), document, start))
    }

    /// Treats `text` as a single page.
    pub fn extract_text(&self, text: &str) -> ExtractionReport {
        let start = Instant::now();
        self.extract_document("text".into(), ParsedDocument::from_text(text), start)
    }

    /// Pages supplied directly by an upstream layout or transcription step.
    pub fn extract_pages(&self, source: &str, pages: Vec<PageContent>) -> ExtractionReport {
        let start = Instant::now();
        let document = ParsedDocument::new(DocumentFormat::PageDump, pages);
        self.extract_document(source.to_string(), document, start)
    }

    fn extract_document(
        &self,
        source: String,
        document: ParsedDocument,
        start: Instant,
    ) -> ExtractionReport {
        let ParsedDocument {
            title,
            format,
            pages,
        } = document;
        let page_count = u32::try_from(pages.len()).unwrap_or(u32::MAX);
        let pages_with_text = pages.iter().filter(|p| !p.is_blank()).count();

        let partials: Vec<PartialExtraction> = pages
            .iter()
            .map(|page| {
                let partial = self.extractor.extract_from_page(page);
                tracing::debug!(
                    page = page.number,
                    identifiers = partial.identifiers.len(),
                    amounts = partial.amounts.len(),
                    tables = partial.tables.len(),
                    "page extracted"
                );
                partial
            })
            .collect();
        drop(pages);

        let reconciliation = self.reconciler.reconcile(&partials);

        let mut stats = ExtractionStats::from_partials(&partials);
        stats.pages_with_text = pages_with_text;
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            source = %source,
            pages = page_count,
            securities = reconciliation.summary.security_count,
            total_value = reconciliation.summary.total_value,
            "document extracted"
        );

        ExtractionReport {
            id: Uuid::now_v7(),
            source,
            title,
            format,
            page_count,
            extracted_at: Utc::now(),
            securities: reconciliation.records,
            summary: reconciliation.summary,
            stats,
        }
    }
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Extracted(ExtractionReport),
    Failed { source: String, error: String },
}

impl DocumentOutcome {
    pub fn source(&self) -> &str {
        match self {
            Self::Extracted(report) => &report.source,
            Self::Failed { source, .. } => source,
        }
    }

    pub fn report(&self) -> Option<&ExtractionReport> {
        match self {
            Self::Extracted(report) => Some(report),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExtractionResult {
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchExtractionResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, source: String, result: PipelineResult<ExtractionReport>) {
        let outcome = match result {
            Ok(report) => DocumentOutcome::Extracted(report),
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "document failed");
                DocumentOutcome::Failed {
                    source,
                    error: e.to_string(),
                }
            }
        };
        self.outcomes.push(outcome);
    }

    pub fn reports(&self) -> impl Iterator<Item = &ExtractionReport> {
        self.outcomes.iter().filter_map(DocumentOutcome::report)
    }

    pub fn success_count(&self) -> usize {
        self.reports().count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

impl ExtractionPipeline {
    /// Extracts every readable file directly inside `dir`, in path order.
    /// Files whose extension maps to no supported format are skipped.
    pub fn extract_directory(&self, dir: &Path) -> PipelineResult<BatchExtractionResult> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && self.is_readable(path))
            .collect();
        paths.sort();

        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        Ok(self.extract_files(&refs))
    }

    pub fn extract_files(&self, paths: &[&Path]) -> BatchExtractionResult {
        let mut result = BatchExtractionResult::new();
        for path in paths {
            result.add(path.display().to_string(), self.extract_file(path));
        }
        result
    }

    fn is_readable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(DocumentFormat::from_extension)
            .is_some_and(|format| self.reader.can_read(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::Table;
    use crate::security::{Jurisdiction, ValidationStatus};

    #[test]
    fn test_single_identifier_with_value() {
        let report = ExtractionPipeline::new().extract_text("ISIN: XS2746319610\nValue: 192'100 CHF");

        assert_eq!(report.securities.len(), 1);
        let record = &report.securities[0];
        assert_eq!(record.jurisdiction, Jurisdiction::InternationalBond);
        assert_eq!(record.market_value, Some(192_100.0));
        assert_eq!(record.currency.as_deref(), Some("CHF"));
        assert!((record.confidence - 0.5).abs() < 1e-9);
        assert_eq!(record.status, ValidationStatus::Failed);

        assert!((report.summary.total_value - 192_100.0).abs() < 1e-6);
        assert_eq!(report.summary.security_count, 1);
        assert_eq!(report.page_count, 1);
    }

    #[test]
    fn test_empty_text() {
        let report = ExtractionPipeline::new().extract_text("");
        assert!(report.securities.is_empty());
        assert_eq!(report.summary.security_count, 0);
        assert_eq!(report.stats.pages_with_text, 0);
    }

    #[test]
    fn test_extract_pages_merges_across_pages() {
        let table = Table::from_strings(&[
            &["Name", "ISIN", "Quantity", "Price", "Market Value"],
            &["Nestle SA", "CH0038863350", "1'500", "104.90", "157'350.00"],
        ]);
        let pages = vec![
            PageContent::new(1, String::new()).with_table(table),
            PageContent::new(2, "Nestle Namen CH0038863350 160'000.00 CHF".into()),
        ];

        let report = ExtractionPipeline::new().extract_pages("statement", pages);

        assert_eq!(report.securities.len(), 1);
        let record = report.security("CH0038863350").unwrap();
        assert_eq!(record.name.as_deref(), Some("Nestle SA"));
        assert_eq!(record.market_value, Some(157_350.0));
        assert_eq!(record.pages, vec![1, 2]);
        assert_eq!(report.stats.tables, 1);
        assert_eq!(report.stats.identifier_occurrences, 2);
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let config = ExtractorConfig::default().with_plausibility(100.0, 1.0);
        let result = ExtractionPipeline::new().with_config(&config);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_with_config_narrows_band() {
        let config = ExtractorConfig::default().with_plausibility(1_000.0, 100_000.0);
        let pipeline = ExtractionPipeline::new().with_config(&config).unwrap();

        let report = pipeline.extract_text("ISIN: XS2746319610\nValue: 192'100 CHF");

        assert_eq!(report.securities[0].market_value, None);
        assert_eq!(report.securities[0].status, ValidationStatus::Incomplete);
    }

    #[test]
    fn test_extract_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.txt");
        std::fs::write(&path, "ISIN: CH0012032048\nMarket value: 52'340.00 CHF\n").unwrap();

        let report = ExtractionPipeline::new().extract_file(&path).unwrap();

        assert_eq!(report.format, DocumentFormat::PlainText);
        assert_eq!(report.title.as_deref(), Some("statement.txt"));
        assert_eq!(report.securities[0].jurisdiction, Jurisdiction::SwissSecurity);
        assert_eq!(report.securities[0].market_value, Some(52_340.0));
    }

    #[test]
    fn test_missing_file_fails() {
        let result = ExtractionPipeline::new().extract_file(Path::new("/nonexistent/statement.txt"));
        assert!(matches!(result, Err(PipelineError::Parse(_))));
    }

    #[test]
    fn test_extract_bytes_page_dump() {
        let dump = br#"{"pages": [{"text": "LU0123456789 Fund units 25'000.00 EUR"}]}"#;

        let report = ExtractionPipeline::new()
            .extract_bytes(dump, DocumentFormat::PageDump, "dump")
            .unwrap();

        assert_eq!(report.source, "dump");
        assert_eq!(report.securities[0].jurisdiction, Jurisdiction::LuxembourgFund);
        assert_eq!(report.securities[0].currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_extract_bytes_pdf() {
        let pdf = crate::ingest::fixtures::pdf_with_pages(&[
            "Portfolio statement\nXS2746319610 192'100 CHF",
            "CH0038863350 52'340.00 CHF",
        ]);

        let report = ExtractionPipeline::new()
            .extract_bytes(&pdf, DocumentFormat::Pdf, "statement.pdf")
            .unwrap();

        assert_eq!(report.format, DocumentFormat::Pdf);
        assert_eq!(report.page_count, 2);
        assert_eq!(report.stats.pages_with_text, 2);
        assert_eq!(report.securities.len(), 2);

        let bond = report.security("XS2746319610").unwrap();
        assert_eq!(bond.market_value, Some(192_100.0));
        assert_eq!(bond.pages, vec![1]);

        let share = report.security("CH0038863350").unwrap();
        assert_eq!(share.market_value, Some(52_340.0));
        assert_eq!(share.currency.as_deref(), Some("CHF"));
        assert_eq!(share.pages, vec![2]);
    }

    #[test]
    fn test_extract_pdf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.pdf");
        std::fs::write(&path, crate::ingest::fixtures::pdf_with_pages(&["LU0123456789 25'000.00 EUR"]))
            .unwrap();

        let report = ExtractionPipeline::new().extract_file(&path).unwrap();

        assert_eq!(report.format, DocumentFormat::Pdf);
        assert_eq!(report.securities[0].jurisdiction, Jurisdiction::LuxembourgFund);
        assert_eq!(report.securities[0].market_value, Some(25_000.0));
    }

    #[test]
    fn test_batch_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "XS2746319610 192'100 CHF").unwrap();
        std::fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.md"), "CH0038863350").unwrap();

        let result = ExtractionPipeline::new().extract_directory(dir.path()).unwrap();

        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert!(result.has_failures());
        assert!(result.outcomes[0].source().ends_with("a.txt"));
        assert!(matches!(result.outcomes[1], DocumentOutcome::Failed { .. }));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = DocumentOutcome::Failed {
            source: "x.pdf".into(),
            error: "PDF error: bad header".into(),
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["source"], "x.pdf");

        let report = ExtractionPipeline::new().extract_text("XS2746319610 192'100 CHF");
        let json = serde_json::to_value(DocumentOutcome::Extracted(report)).unwrap();
        assert_eq!(json["status"], "extracted");
        assert_eq!(json["securities"][0]["isin"], "XS2746319610");
        assert_eq!(json["format"], "plain_text");
    }
}
