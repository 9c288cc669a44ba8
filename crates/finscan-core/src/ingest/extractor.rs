use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::parser::{PageContent, Table};
use crate::config::{ExtractorConfig, PlausibilityBand};
use crate::security::{Isin, Jurisdiction};

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:['’]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?").expect("static number pattern")
});

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let mut labels: Vec<&str> = FIELD_LABELS
        .iter()
        .flat_map(|(_, labels)| labels.iter().copied())
        .collect();
    labels.sort_by_key(|l| std::cmp::Reverse(l.len()));
    let alternation = labels
        .iter()
        .map(|l| regex::escape(l))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("static label pattern")
});

static FILLER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:isin|valor|valoren|valorennr|nr|no)\b\.?").expect("static filler pattern")
});

const TOTAL_MARKERS: &[&str] = &["total", "summe", "gesamt"];

/// Minimum fuzzy similarity for a table header cell to count as a field label.
const HEADER_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Quantity,
    Price,
    MarketValue,
    Currency,
}

const FIELD_LABELS: &[(FieldKind, &[&str])] = &[
    (
        FieldKind::Name,
        &["description", "bezeichnung", "designation", "security", "instrument", "titel", "name"],
    ),
    (
        FieldKind::Quantity,
        &["quantity", "qty", "nominal", "nennwert", "anzahl", "stück", "stueck", "menge"],
    ),
    (FieldKind::Price, &["price", "kurs", "preis", "cours", "prix"]),
    (
        FieldKind::MarketValue,
        &[
            "market value",
            "marktwert",
            "kurswert",
            "valuation",
            "bewertung",
            "gegenwert",
            "value",
            "wert",
            "valeur",
            "amount",
            "betrag",
        ],
    ),
    (FieldKind::Currency, &["currency", "währung", "whg", "ccy", "devise"]),
];

fn field_for_label(label: &str) -> Option<FieldKind> {
    let label = label.to_lowercase();
    FIELD_LABELS
        .iter()
        .find(|(_, labels)| labels.contains(&label.as_str()))
        .map(|(field, _)| *field)
}

/// Role of a table column, taken from its header cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Column {
    Field(FieldKind),
    /// ISIN or Valor numbers; never amounts.
    Reference,
    #[default]
    Unmapped,
}

fn header_column(cell: &str) -> Column {
    let trimmed = cell.trim();
    let is_reference = FILLER_PATTERN
        .find(trimmed)
        .is_some_and(|m| m.start() == 0 && trimmed[m.end()..].trim().is_empty());
    if is_reference {
        return Column::Reference;
    }
    header_field(trimmed).map_or(Column::Unmapped, Column::Field)
}

/// Maps a table header cell to the field it labels, tolerating OCR noise.
fn header_field(cell: &str) -> Option<FieldKind> {
    let normalized = cell.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    if let Some(m) = LABEL_PATTERN.find(&normalized) {
        return field_for_label(m.as_str());
    }

    FIELD_LABELS
        .iter()
        .flat_map(|(field, labels)| labels.iter().map(move |label| (*field, *label)))
        .map(|(field, label)| (field, strsim::normalized_levenshtein(&normalized, label)))
        .filter(|(_, score)| *score >= HEADER_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(field, _)| field)
}

/// Non-overlapping ISIN-shaped substrings, left to right.
///
/// Text layers often glue identifiers to neighbouring words
/// (`XS2746319610CHF`, `ISINXS2746319610`), so no word boundary is required.
/// A candidate is rejected when it continues a run of capitals or digits on
/// the left (except an `ISIN` label) or is followed by another digit, so
/// `XXS2746319610` and longer numbers do not yield shifted identifiers.
fn scan_identifiers(text: &str) -> impl Iterator<Item = Isin> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos + Isin::LEN <= text.len() {
            let start = pos;
            pos += text[start..].chars().next().map_or(1, char::len_utf8);

            let Some(isin) = text.get(start..start + Isin::LEN).and_then(Isin::parse) else {
                continue;
            };

            let before = &text[..start];
            let glued_before = before
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                && !before.to_ascii_uppercase().ends_with("ISIN");
            let glued_after = text[start + Isin::LEN..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());

            if !glued_before && !glued_after {
                pos = start + Isin::LEN;
                return Some(isin);
            }
        }
        None
    })
}

/// All ISIN-shaped tokens in `text`.
pub fn find_identifiers(text: &str) -> BTreeSet<Isin> {
    scan_identifiers(text).collect()
}

/// Identifiers in order of appearance, without repeats.
fn identifiers_in_order(text: &str) -> Vec<Isin> {
    let mut seen = HashSet::new();
    scan_identifiers(text)
        .filter(|isin| seen.insert(isin.clone()))
        .collect()
}

/// Parses a Swiss-formatted literal such as `1'234'567.89`.
///
/// Apostrophes and whitespace are dropped. A lone comma is a decimal
/// separator; next to a point it is a grouping separator. Anything else that
/// is not a digit makes the parse fail. No plausibility check is applied.
pub fn parse_amount(literal: &str) -> Option<f64> {
    let cleaned: String = literal
        .trim()
        .chars()
        .filter(|c| !matches!(*c, '\'' | '’') && !c.is_whitespace())
        .collect();

    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };

    let digits = normalized
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(&normalized);
    if !digits.chars().any(|c| c.is_ascii_digit())
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }

    normalized.parse::<f64>().ok()
}

pub fn classify_jurisdiction(identifier: &str) -> Jurisdiction {
    Jurisdiction::from_prefix(identifier)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumericToken {
    start: usize,
    value: f64,
}

/// Numeric tokens that stand on their own. Tokens glued to letters, to a
/// percent sign or to another digit group (dates, ISINs) are skipped.
fn numeric_tokens(text: &str) -> Vec<NumericToken> {
    NUMBER_PATTERN
        .find_iter(text)
        .filter(|m| {
            let before = text[..m.start()].chars().next_back();
            let mut after = text[m.end()..].chars();
            let next = after.next();
            let next_is_digit = after.next().is_some_and(|c| c.is_ascii_digit());

            let glued_before = before.is_some_and(|c| {
                c.is_alphanumeric() || matches!(c, '.' | ',' | '/' | '-' | '\'' | '’' | '_')
            });
            let glued_after = next.is_some_and(|c| {
                c.is_alphanumeric()
                    || c == '%'
                    || (matches!(c, '.' | ',' | '/' | '-') && next_is_digit)
            });

            !glued_before && !glued_after
        })
        .filter_map(|m| {
            parse_amount(m.as_str()).map(|value| NumericToken {
                start: m.start(),
                value,
            })
        })
        .collect()
}

/// `Valor: 3886335`, `Valoren-Nr. 3886335`: a number directly after a
/// security-number label identifies the security and is not an amount.
fn is_reference_number(line: &str, token_start: usize) -> bool {
    FILLER_PATTERN
        .find_iter(&line[..token_start])
        .last()
        .is_some_and(|m| {
            line[m.end()..token_start]
                .chars()
                .all(|c| c.is_whitespace() || matches!(c, ':' | '.' | '-' | '#'))
        })
}

fn is_total_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    TOTAL_MARKERS.iter().any(|marker| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == *marker)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    pub rows: usize,
    pub columns: usize,
}

impl From<&Table> for TableShape {
    fn from(table: &Table) -> Self {
        Self {
            rows: table.row_count(),
            columns: table.column_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MentionOrigin {
    Table { table: usize, row: usize },
    Text { line: usize },
}

/// One occurrence of an identifier together with whatever could be bound
/// next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMention {
    pub isin: Isin,
    pub page: u32,
    pub origin: MentionOrigin,
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub market_value: Option<f64>,
    pub currency: Option<String>,
}

impl SecurityMention {
    #[must_use]
    pub fn new(isin: Isin, page: u32, origin: MentionOrigin) -> Self {
        Self {
            isin,
            page,
            origin,
            name: None,
            quantity: None,
            price: None,
            market_value: None,
            currency: None,
        }
    }

    fn with_amounts(mut self, amounts: BoundAmounts) -> Self {
        self.quantity = amounts.quantity;
        self.price = amounts.price;
        self.market_value = amounts.market_value;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BoundAmounts {
    quantity: Option<f64>,
    price: Option<f64>,
    market_value: Option<f64>,
}

impl BoundAmounts {
    fn slot(&mut self, field: FieldKind) -> Option<&mut Option<f64>> {
        match field {
            FieldKind::Quantity => Some(&mut self.quantity),
            FieldKind::Price => Some(&mut self.price),
            FieldKind::MarketValue => Some(&mut self.market_value),
            FieldKind::Name | FieldKind::Currency => None,
        }
    }

    /// First value wins.
    fn bind(&mut self, field: FieldKind, value: f64) -> bool {
        match self.slot(field) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Unlabeled amounts follow the usual statement column order:
    /// quantity, price, then market value in the last column.
    fn assign_positional(&mut self, unlabeled: &[f64]) {
        match unlabeled {
            [] => {}
            [only] => {
                self.bind(FieldKind::MarketValue, *only);
            }
            [first, rest @ ..] => {
                self.bind(FieldKind::Quantity, *first);
                if let [second, _, ..] = rest {
                    self.bind(FieldKind::Price, *second);
                }
                if let Some(last) = rest.last() {
                    self.bind(FieldKind::MarketValue, *last);
                }
            }
        }
    }
}

/// Everything found on a single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialExtraction {
    pub page: u32,
    pub identifiers: BTreeSet<Isin>,
    /// Plausible amounts from table cells and free text.
    pub amounts: Vec<f64>,
    pub tables: Vec<TableShape>,
    /// Table rows first, then free text, each in reading order.
    pub mentions: Vec<SecurityMention>,
}

impl PartialExtraction {
    #[must_use]
    pub fn new(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }
}

pub trait PageExtractor: Send + Sync {
    fn extract_from_page(&self, page: &PageContent) -> PartialExtraction;
}

/// Pattern and heuristic based extraction of securities from statement pages.
pub struct RuleBasedExtractor {
    band: PlausibilityBand,
    context_lines: usize,
    currencies: HashSet<String>,
}

impl RuleBasedExtractor {
    #[must_use]
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            band: config.plausibility,
            context_lines: config.context_lines,
            currencies: config
                .currencies
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
        }
    }

    /// Plausible amounts anywhere in `text`.
    pub fn candidate_amounts(&self, text: &str) -> Vec<f64> {
        text.lines()
            .flat_map(numeric_tokens)
            .map(|t| t.value)
            .filter(|v| self.band.contains(*v))
            .collect()
    }

    fn is_currency(&self, token: &str) -> bool {
        self.currencies.contains(token)
    }

    fn currency_in(&self, text: &str) -> Option<String> {
        text.split(|c: char| !c.is_ascii_alphabetic())
            .find(|word| self.is_currency(word))
            .map(String::from)
    }

    /// A plausible amount from a single table cell.
    fn cell_amount(&self, cell: &str) -> Option<f64> {
        parse_amount(cell)
            .or_else(|| numeric_tokens(cell).first().map(|t| t.value))
            .filter(|v| self.band.contains(*v))
    }

    fn cell_amounts(&self, cell: &str) -> Vec<f64> {
        match parse_amount(cell) {
            Some(value) if self.band.contains(value) => vec![value],
            Some(_) => Vec::new(),
            None => self.candidate_amounts(cell),
        }
    }

    /// Strips identifiers, labels, numbers and currency codes. Returns `None`
    /// unless something name-like is left.
    fn clean_name(&self, text: &str) -> Option<String> {
        let without_labels = LABEL_PATTERN.replace_all(text, " ");
        let without_filler = FILLER_PATTERN.replace_all(&without_labels, " ");

        let words: Vec<&str> = without_filler
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| matches!(c, ':' | ';' | '|' | ',' | '-')))
            .filter(|w| w.chars().any(char::is_alphabetic))
            .filter(|w| find_identifiers(w).is_empty() && !self.is_currency(w))
            .collect();

        let name = words.join(" ");
        if name.chars().filter(|c| c.is_alphabetic()).count() >= 3 {
            Some(name)
        } else {
            None
        }
    }

    fn table_mentions(&self, page: u32, table_index: usize, table: &Table) -> Vec<SecurityMention> {
        let row_ids: Vec<Vec<Isin>> = table
            .rows
            .iter()
            .map(|row| {
                let mut ids = Vec::new();
                for cell in row.iter().flatten() {
                    for isin in identifiers_in_order(cell) {
                        if !ids.contains(&isin) {
                            ids.push(isin);
                        }
                    }
                }
                ids
            })
            .collect();

        let first_data_row = row_ids
            .iter()
            .position(|ids| !ids.is_empty())
            .unwrap_or(table.row_count());

        let columns: Vec<Column> = table.rows[..first_data_row]
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_deref().map_or(Column::Unmapped, header_column))
                    .collect::<Vec<_>>()
            })
            .find(|mapped| {
                mapped
                    .iter()
                    .filter(|c| matches!(c, Column::Field(_)))
                    .count()
                    >= 2
            })
            .unwrap_or_default();

        let mut mentions = Vec::new();
        for (row_index, ids) in row_ids.iter().enumerate() {
            let origin = MentionOrigin::Table {
                table: table_index,
                row: row_index,
            };
            match ids.as_slice() {
                [] => {}
                [isin] => mentions.push(self.bind_table_row(
                    SecurityMention::new(isin.clone(), page, origin),
                    &table.rows[row_index],
                    &columns,
                )),
                many => mentions.extend(
                    many.iter()
                        .map(|isin| SecurityMention::new(isin.clone(), page, origin)),
                ),
            }
        }

        mentions
    }

    fn bind_table_row(
        &self,
        mention: SecurityMention,
        row: &[Option<String>],
        columns: &[Column],
    ) -> SecurityMention {
        let mut amounts = BoundAmounts::default();
        let mut unlabeled = Vec::new();
        let mut name = None;
        let mut currency = None;

        for (column, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_deref() else {
                continue;
            };
            match columns.get(column).copied().unwrap_or_default() {
                Column::Field(FieldKind::Name) => {
                    name = name.or_else(|| self.clean_name(text));
                }
                Column::Field(FieldKind::Currency) => {
                    currency = currency.or_else(|| self.currency_in(text));
                }
                Column::Field(field) => {
                    if let Some(value) = self.cell_amount(text) {
                        amounts.bind(field, value);
                    }
                }
                Column::Reference => {}
                Column::Unmapped => {
                    if let Some(value) = self.cell_amount(text) {
                        unlabeled.push(value);
                    }
                }
            }
        }
        amounts.assign_positional(&unlabeled);

        let name = name.or_else(|| {
            row.iter()
                .enumerate()
                .filter(|(column, _)| {
                    !matches!(
                        columns.get(*column).copied().unwrap_or_default(),
                        Column::Reference
                            | Column::Field(
                                FieldKind::Quantity | FieldKind::Price | FieldKind::MarketValue
                            )
                    )
                })
                .find_map(|(_, cell)| cell.as_deref().and_then(|c| self.clean_name(c)))
        });
        let currency =
            currency.or_else(|| row.iter().flatten().find_map(|c| self.currency_in(c)));

        SecurityMention {
            name,
            currency,
            ..mention.with_amounts(amounts)
        }
    }

    fn text_mentions(&self, page: u32, text: &str) -> Vec<SecurityMention> {
        let lines: Vec<&str> = text.lines().collect();
        let line_ids: Vec<Vec<Isin>> = lines.iter().map(|l| identifiers_in_order(l)).collect();

        let mut mentions = Vec::new();
        for (index, ids) in line_ids.iter().enumerate() {
            let origin = MentionOrigin::Text { line: index };
            match ids.as_slice() {
                [] => {}
                [isin] => mentions.push(self.bind_text_block(
                    SecurityMention::new(isin.clone(), page, origin),
                    &lines,
                    &line_ids,
                    index,
                )),
                many => mentions.extend(
                    many.iter()
                        .map(|isin| SecurityMention::new(isin.clone(), page, origin)),
                ),
            }
        }

        mentions
    }

    fn bind_text_block(
        &self,
        mention: SecurityMention,
        lines: &[&str],
        line_ids: &[Vec<Isin>],
        index: usize,
    ) -> SecurityMention {
        let end = index
            .saturating_add(1)
            .saturating_add(self.context_lines)
            .min(lines.len());
        let mut block = vec![lines[index]];
        for next in index + 1..end {
            if !line_ids[next].is_empty() || is_total_line(lines[next]) {
                break;
            }
            block.push(lines[next]);
        }

        let name = self.clean_name(lines[index]).or_else(|| {
            let previous = index.checked_sub(1)?;
            if line_ids[previous].is_empty() && !is_total_line(lines[previous]) {
                self.clean_name(lines[previous])
            } else {
                None
            }
        });

        let mut amounts = BoundAmounts::default();
        let mut unlabeled = Vec::new();
        for line in &block {
            let labels: Vec<(usize, Option<FieldKind>)> = LABEL_PATTERN
                .find_iter(line)
                .map(|m| (m.end(), field_for_label(m.as_str())))
                .collect();

            for token in numeric_tokens(line) {
                if !self.band.contains(token.value) || is_reference_number(line, token.start) {
                    continue;
                }
                let label = labels
                    .iter()
                    .rev()
                    .find(|(end, _)| *end <= token.start)
                    .and_then(|(_, field)| *field);
                match label {
                    Some(field @ (FieldKind::Quantity | FieldKind::Price | FieldKind::MarketValue)) => {
                        amounts.bind(field, token.value);
                    }
                    _ => unlabeled.push(token.value),
                }
            }
        }
        amounts.assign_positional(&unlabeled);

        let currency = block.iter().find_map(|line| self.currency_in(line));

        SecurityMention {
            name,
            currency,
            ..mention.with_amounts(amounts)
        }
    }
}

impl Default for RuleBasedExtractor {
    fn default() -> Self {
        Self::new(&ExtractorConfig::default())
    }
}

impl PageExtractor for RuleBasedExtractor {
    fn extract_from_page(&self, page: &PageContent) -> PartialExtraction {
        let mut partial = PartialExtraction::new(page.number);

        partial.identifiers = find_identifiers(&page.text);
        partial.amounts = self.candidate_amounts(&page.text);

        for (index, table) in page.tables.iter().enumerate() {
            for cell in table.cells() {
                partial.identifiers.extend(find_identifiers(cell));
                partial.amounts.extend(self.cell_amounts(cell));
            }
            partial.tables.push(TableShape::from(table));
            partial
                .mentions
                .extend(self.table_mentions(page.number, index, table));
        }

        partial
            .mentions
            .extend(self.text_mentions(page.number, &page.text));

        partial
    }
}
