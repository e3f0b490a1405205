use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use log::warn;

/// Reads the address file: one hostname or literal address per line.
///
/// Blank lines and `#` comments are skipped, order is preserved. A line that
/// is not valid UTF-8 after stripping its comment is logged and skipped.
pub fn read_specifications(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open address list at {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut specs = Vec::new();

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line.with_context(|| {
            format!(
                "failed to read line {} of address list {}",
                line_no + 1,
                path.display()
            )
        })?;
        let content = match line.iter().position(|b| *b == b'#') {
            Some(hash) => &line[..hash],
            None => &line[..],
        };
        let Ok(text) = std::str::from_utf8(content) else {
            warn!(
                "skipping line {} of {}: not valid UTF-8",
                line_no + 1,
                path.display()
            );
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        specs.push(trimmed.to_string());
    }

    Ok(specs)
}
