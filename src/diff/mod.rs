pub mod parse;
pub mod types;

pub use parse::parse_diff;
pub use types::{DiffLine, DiffSet, DiffSummary, Language, LineKind};

use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Failed to read diff: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse diff: {0}")]
    Unparseable(String),
}

/// Where the raw patch text comes from. Fetching it from a ticket or PR host
/// is left to whoever invokes the tool.
#[derive(Debug, Clone)]
pub enum DiffSource {
    File(PathBuf),
    Stdin,
    Embedded(&'static str),
}

impl DiffSource {
    /// `-` selects stdin, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            DiffSource::Stdin
        } else {
            DiffSource::File(PathBuf::from(arg))
        }
    }
}

/// Read the raw diff text from its source.
#[instrument(skip_all)]
pub async fn read_source(source: &DiffSource) -> Result<String, DiffError> {
    let text = match source {
        DiffSource::File(path) => {
            debug!(path = %path.display(), "reading diff file");
            tokio::fs::read_to_string(path).await?
        }
        DiffSource::Stdin => {
            debug!("reading diff from stdin");
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
        DiffSource::Embedded(text) => text.to_string(),
    };
    debug!(diff_bytes = text.len(), "read diff");
    Ok(text)
}
