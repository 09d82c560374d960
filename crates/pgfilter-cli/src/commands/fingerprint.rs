//! `pgfilterproxy fingerprint` - compute the allow-list entry for a query.

use anyhow::Context;
use pgfilter_core::ProxyConfig;
use pgfilter_sql::Fingerprinter;
use std::io::Read;
use std::path::Path;

pub fn run_fingerprint(
    sql: Option<String>,
    ignore_unix_timestamps: bool,
    config: Option<&Path>,
    canonical: bool,
) -> anyhow::Result<()> {
    let sql = match sql {
        Some(sql) => sql,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read SQL from stdin")?;
            buf
        }
    };

    let ignore_unix_timestamps = match config {
        Some(path) => ProxyConfig::from_path(path)?.ignore_unix_timestamps,
        None => ignore_unix_timestamps,
    };

    let fingerprinter = Fingerprinter::new().ignore_unix_timestamps(ignore_unix_timestamps);
    for line in describe(&fingerprinter, &sql, canonical)? {
        println!("{line}");
    }
    Ok(())
}

/// Output lines for one query: the normalized text if requested, then the
/// fingerprint.
pub fn describe(
    fingerprinter: &Fingerprinter,
    sql: &str,
    canonical: bool,
) -> anyhow::Result<Vec<String>> {
    let fingerprint = fingerprinter
        .fingerprint(sql)
        .context("Failed to fingerprint query")?;

    let mut lines = Vec::new();
    if canonical {
        lines.push(fingerprinter.canonicalize(sql)?);
    }
    lines.push(fingerprint.to_string());
    Ok(lines)
}
