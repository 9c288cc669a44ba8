mod extractor;
#[cfg(test)]
mod fixtures;
mod parser;
mod pipeline;
mod reconciler;

pub use extractor::{
    classify_jurisdiction, find_identifiers, parse_amount, FieldKind, MentionOrigin,
    PageExtractor, PartialExtraction, RuleBasedExtractor, SecurityMention, TableShape,
};
pub use parser::{
    CompositeReader, DocumentFormat, DocumentReader, PageContent, PageDumpReader, ParseError,
    ParseResult, ParsedDocument, PdfReader, PlainTextReader, Table,
};
pub use pipeline::{
    BatchExtractionResult, DocumentOutcome, ExtractionPipeline, ExtractionReport,
    ExtractionStats, PipelineError, PipelineResult,
};
pub use reconciler::{Reconciler, Reconciliation};
