use anyhow::{bail, Result};
use console::style;

use finscan_core::Isin;

pub fn run(identifiers: &[String]) -> Result<()> {
    let mut invalid = 0;

    for raw in identifiers {
        let candidate = raw.trim();
        match Isin::parse(candidate) {
            Some(isin) => {
                let jurisdiction = isin.jurisdiction();
                println!(
                    "{}  {}  {}",
                    isin,
                    style(jurisdiction.as_str()).cyan(),
                    style(jurisdiction.label()).dim()
                );
            }
            None => {
                invalid += 1;
                eprintln!("{} {raw}: not an ISIN", style("✗").red().bold());
            }
        }
    }

    if invalid > 0 {
        bail!("{invalid} invalid identifier(s)");
    }

    Ok(())
}
