use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("PDF error: {0}")]
    Pdf(String),
    #[error("Malformed document: {0}")]
    Malformed(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    PageDump,
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "json" => Some(Self::PageDump),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::PageDump => "page_dump",
            Self::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rectangular grid of cells. `None` marks a cell with no data, as opposed
/// to `Some("")`, an empty label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Pads ragged rows with `None` up to the widest row.
    #[must_use]
    pub fn new(mut rows: Vec<Vec<Option<String>>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, None);
        }
        Self { rows }
    }

    #[must_use]
    pub fn from_strings(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| {
                            if cell.is_empty() {
                                None
                            } else {
                                Some((*cell).to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        )
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().filter_map(Option::as_deref)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
    pub tables: Vec<Table>,
}

impl PageContent {
    #[must_use]
    pub fn new(number: u32, text: String) -> Self {
        Self {
            number,
            text,
            tables: Vec::new(),
        }
    }

    /// A page that failed to read. Carries no text and no tables.
    #[must_use]
    pub fn empty(number: u32) -> Self {
        Self::new(number, String::new())
    }

    #[must_use]
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    #[must_use]
    pub fn with_tables(mut self, tables: Vec<Table>) -> Self {
        self.tables = tables;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.tables.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub format: DocumentFormat,
    pub pages: Vec<PageContent>,
}

impl ParsedDocument {
    #[must_use]
    pub fn new(format: DocumentFormat, pages: Vec<PageContent>) -> Self {
        Self {
            title: None,
            format,
            pages,
        }
    }

    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::new(DocumentFormat::PlainText, vec![PageContent::new(1, text.to_string())])
    }

    #[must_use]
    pub fn with_title(mut self, title: String) -> Self {
        self.title = Some(title);
        self
    }

    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }
}

/// Supplies page text and tables. How they were produced (text layer, layout
/// analysis, transcription) is up to the implementation.
pub trait DocumentReader: Send + Sync {
    fn supported_formats(&self) -> &[DocumentFormat];

    fn can_read(&self, format: DocumentFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    fn read_bytes(&self, data: &[u8], format: DocumentFormat) -> ParseResult<ParsedDocument>;

    /// The file is held only for the duration of the read.
    fn read_file(&self, path: &Path) -> ParseResult<ParsedDocument> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ParseError::UnsupportedFormat("no extension".into()))?;

        let format = DocumentFormat::from_extension(ext)
            .ok_or_else(|| ParseError::UnsupportedFormat(ext.into()))?;

        if !self.can_read(format) {
            return Err(ParseError::UnsupportedFormat(format.to_string()));
        }

        let data = std::fs::read(path)?;
        self.read_bytes(&data, format)
    }
}

const PAGE_BREAK: char = '\u{c}';

static LAYOUT_GAP: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\t+|\s*\|\s*|\s{2,}").expect("static layout pattern")
});

/// Reads plain text, e.g. the output of a layout-preserving text dump.
///
/// Form feeds separate pages. Runs of whitespace-aligned lines become tables.
pub struct PlainTextReader {
    min_table_columns: usize,
}

impl PlainTextReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_table_columns: 3,
        }
    }

    #[must_use]
    pub fn page_from_text(&self, number: u32, text: &str) -> PageContent {
        PageContent::new(number, text.to_string())
            .with_tables(detect_layout_tables(text, self.min_table_columns))
    }
}

impl Default for PlainTextReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReader for PlainTextReader {
    fn supported_formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::PlainText]
    }

    fn read_bytes(&self, data: &[u8], format: DocumentFormat) -> ParseResult<ParsedDocument> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| ParseError::Encoding(e.to_string()))?;

        let mut chunks: Vec<&str> = text.split(PAGE_BREAK).collect();
        if chunks.len() > 1 && chunks.last().is_some_and(|c| c.trim().is_empty()) {
            chunks.pop();
        }

        let pages = chunks
            .iter()
            .zip(1u32..)
            .map(|(chunk, number)| self.page_from_text(number, chunk))
            .collect();

        Ok(ParsedDocument::new(format, pages))
    }
}

fn split_layout_row(line: &str) -> Vec<Option<String>> {
    LAYOUT_GAP
        .split(line.trim())
        .map(|cell| {
            let cell = cell.trim();
            if cell.is_empty() {
                None
            } else {
                Some(cell.to_string())
            }
        })
        .collect()
}

/// Groups consecutive lines with at least `min_columns` cells into tables.
/// A single aligned line is not a table.
fn detect_layout_tables(text: &str, min_columns: usize) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<Option<String>>> = Vec::new();

    let mut flush = |rows: &mut Vec<Vec<Option<String>>>| {
        if rows.len() >= 2 {
            tables.push(Table::new(std::mem::take(rows)));
        } else {
            rows.clear();
        }
    };

    for line in text.lines() {
        let cells = split_layout_row(line);
        let filled = cells.iter().filter(|c| c.is_some()).count();
        if filled >= min_columns {
            current.push(cells);
        } else {
            flush(&mut current);
        }
    }
    flush(&mut current);

    tables
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageDump {
    Wrapped { pages: Vec<PageDumpEntry> },
    Bare(Vec<PageDumpEntry>),
}

#[derive(Debug, Deserialize)]
struct PageDumpEntry {
    #[serde(default)]
    number: Option<u32>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tables: Vec<Vec<Vec<Option<String>>>>,
}

/// Reads JSON page dumps produced by an external layout or transcription
/// service:
///
/// ```json
/// {"pages": [{"text": "...", "tables": [[["Name", null, "Value"]]]}]}
/// ```
pub struct PageDumpReader;

impl PageDumpReader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PageDumpReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReader for PageDumpReader {
    fn supported_formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::PageDump]
    }

    fn read_bytes(&self, data: &[u8], format: DocumentFormat) -> ParseResult<ParsedDocument> {
        let dump: PageDump =
            serde_json::from_slice(data).map_err(|e| ParseError::Malformed(e.to_string()))?;

        let entries = match dump {
            PageDump::Wrapped { pages } | PageDump::Bare(pages) => pages,
        };

        let pages = entries
            .into_iter()
            .zip(1u32..)
            .map(|(entry, position)| {
                PageContent::new(
                    entry.number.unwrap_or(position),
                    entry.text.unwrap_or_default(),
                )
                .with_tables(entry.tables.into_iter().map(Table::new).collect())
            })
            .collect();

        Ok(ParsedDocument::new(format, pages))
    }
}

/// Reads the text layer of a PDF. Tables are recovered from aligned text
/// where the text layer keeps the layout.
pub struct PdfReader {
    text: PlainTextReader,
}

impl PdfReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            text: PlainTextReader::new(),
        }
    }
}

impl Default for PdfReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReader for PdfReader {
    fn supported_formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::Pdf]
    }

    fn read_bytes(&self, data: &[u8], format: DocumentFormat) -> ParseResult<ParsedDocument> {
        let document =
            lopdf::Document::load_mem(data).map_err(|e| ParseError::Pdf(e.to_string()))?;

        let mut pages = Vec::new();
        for page_number in document.get_pages().into_keys() {
            match document.extract_text(&[page_number]) {
                Ok(text) => pages.push(self.text.page_from_text(page_number, &text)),
                Err(e) => {
                    tracing::warn!(page = page_number, error = %e, "page text unreadable");
                    pages.push(PageContent::empty(page_number));
                }
            }
        }

        Ok(ParsedDocument::new(format, pages))
    }
}

pub struct CompositeReader {
    readers: Vec<Box<dyn DocumentReader>>,
}

impl CompositeReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, reader: Box<dyn DocumentReader>) -> Self {
        self.readers.push(reader);
        self
    }

    fn find_reader(&self, format: DocumentFormat) -> Option<&dyn DocumentReader> {
        self.readers
            .iter()
            .find(|r| r.can_read(format))
            .map(|r| r.as_ref())
    }
}

impl Default for CompositeReader {
    fn default() -> Self {
        Self::new()
            .with_reader(Box::new(PlainTextReader::new()))
            .with_reader(Box::new(PageDumpReader::new()))
            .with_reader(Box::new(PdfReader::new()))
    }
}

impl DocumentReader for CompositeReader {
    fn supported_formats(&self) -> &[DocumentFormat] {
        &[
            DocumentFormat::PlainText,
            DocumentFormat::PageDump,
            DocumentFormat::Pdf,
        ]
    }

    fn can_read(&self, format: DocumentFormat) -> bool {
        self.find_reader(format).is_some()
    }

    fn read_bytes(&self, data: &[u8], format: DocumentFormat) -> ParseResult<ParsedDocument> {
        let reader = self
            .find_reader(format)
            .ok_or_else(|| ParseError::UnsupportedFormat(format.to_string()))?;

        reader.read_bytes(data, format)
    }
}
