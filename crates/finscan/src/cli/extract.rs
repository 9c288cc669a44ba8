use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use console::style;

use finscan_core::ingest::{
    BatchExtractionResult, DocumentOutcome, ExtractionPipeline, ExtractionReport,
};
use finscan_core::{SecurityRecord, ValidationStatus};

pub fn run(paths: &[PathBuf], json: bool, pretty: bool, config: Option<&Path>) -> Result<()> {
    let config = super::config::load(config)?;
    let pipeline = ExtractionPipeline::new().with_config(&config)?;

    let mut batch = BatchExtractionResult::new();
    for path in paths {
        if !path.is_dir() {
            batch.outcomes.extend(pipeline.extract_files(&[path.as_path()]).outcomes);
            continue;
        }
        match pipeline.extract_directory(path) {
            Ok(result) => batch.outcomes.extend(result.outcomes),
            Err(e) => batch.outcomes.push(DocumentOutcome::Failed {
                source: path.display().to_string(),
                error: e.to_string(),
            }),
        }
    }

    tracing::debug!(
        documents = batch.outcomes.len(),
        failed = batch.failure_count(),
        "extraction finished"
    );

    if json {
        let out = if pretty {
            serde_json::to_string_pretty(&batch.outcomes)?
        } else {
            serde_json::to_string(&batch.outcomes)?
        };
        println!("{out}");
    } else {
        for outcome in &batch.outcomes {
            print_outcome(outcome);
        }
    }

    let failed = batch.failure_count();
    if failed > 0 {
        bail!("{failed} of {} document(s) failed", batch.outcomes.len());
    }

    Ok(())
}

fn print_outcome(outcome: &DocumentOutcome) {
    match outcome {
        DocumentOutcome::Extracted(report) => print_report(report),
        DocumentOutcome::Failed { source, error } => {
            println!("{} {}", style("✗").red().bold(), style(source).red());
            println!("    {}", style(error).dim());
        }
    }
}

fn print_report(report: &ExtractionReport) {
    println!(
        "{} {} {}",
        style("✓").green(),
        style(&report.source).bold(),
        style(format!("({}, {} pages)", report.format, report.page_count)).dim()
    );

    for record in &report.securities {
        print_record(record);
    }

    let summary = &report.summary;
    let currencies: Vec<&str> = summary.currencies.iter().map(String::as_str).collect();
    println!(
        "    Total: {} {} across {} securities",
        style(format_amount(summary.total_value)).bold(),
        currencies.join("/"),
        summary.security_count
    );
}

fn print_record(record: &SecurityRecord) {
    let status = match record.status {
        ValidationStatus::Validated => style(record.status.as_str()).green(),
        ValidationStatus::Acceptable => style(record.status.as_str()).cyan(),
        ValidationStatus::Incomplete => style(record.status.as_str()).yellow(),
        ValidationStatus::Failed => style(record.status.as_str()).red(),
    };
    let value = record
        .market_value
        .map_or_else(|| "-".to_string(), format_amount);

    println!(
        "    {}  {:<32} {:>16} {:<3}  {} {:.2}",
        record.isin,
        record.name.as_deref().unwrap_or("-"),
        value,
        record.currency.as_deref().unwrap_or(""),
        status,
        record.confidence
    );
}

/// Swiss notation: apostrophe thousands separator, two decimals.
fn format_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('\'');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}
