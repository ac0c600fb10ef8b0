//! Manifest files enumerating the objects of a run.
//!
//! One object per line, tab separated:
//!
//! ```text
//! <key>\t<size>\t<etag>
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.  The key is taken
//! as everything before the last two tabs, so keys may contain tabs.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use thiserror::Error;

use super::SourceObjectRef;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("manifest read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Iterator over the entries of a manifest.
pub struct ManifestReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl ManifestReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<SourceObjectRef, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let trimmed = line.trim_end_matches('\r');
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(parse_line(trimmed, self.line_no));
        }
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<SourceObjectRef, ManifestError> {
    let malformed = |reason: &str| ManifestError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut fields = line.rsplitn(3, '\t');
    let etag = fields.next().unwrap_or_default();
    let size = fields.next().ok_or_else(|| malformed("expected key, size and etag"))?;
    let key = fields.next().ok_or_else(|| malformed("expected key, size and etag"))?;

    if key.is_empty() {
        return Err(malformed("empty key"));
    }
    let size: u64 = size
        .trim()
        .parse()
        .map_err(|_| malformed(&format!("invalid size {size:?}")))?;

    Ok(SourceObjectRef::new(key, size, etag.trim()))
}
