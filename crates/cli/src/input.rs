//! Identifier list input.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use oagr_core::Identifier;

/// Read identifiers from `path`, or stdin when it is `-`.
pub fn read_identifiers(path: &Path) -> Result<Vec<Identifier>> {
    if path == Path::new("-") {
        return parse_identifiers(io::stdin().lock());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_identifiers(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))
}

/// One identifier per line; blank lines and `#` comments are skipped.
pub fn parse_identifiers<R: BufRead>(reader: R) -> Result<Vec<Identifier>> {
    let mut out = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let id = Identifier::parse(trimmed).with_context(|| format!("line {}", n + 1))?;
        out.push(id);
    }
    if out.is_empty() {
        bail!("no identifiers supplied");
    }
    Ok(out)
}
