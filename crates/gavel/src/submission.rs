//! Submissions
//!
//! A submission is immutable once accepted: identifier, source payload,
//! declared language, and owning team. Validation happens before any
//! workspace exists, so an oversize submission never touches the sandbox.

use std::path::Path;

use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("source is {actual_kb} KB, exceeding the {limit_kb} KB limit")]
    SourceTooLarge { actual_kb: u64, limit_kb: u64 },

    #[error("source is empty")]
    EmptySource,

    #[error("submission id '{0}' must not contain path separators")]
    BadId(String),

    #[error("invalid submission file name '{0}', expected <id>.<language>")]
    BadFileName(String),

    #[error("failed to read submission file: {0}")]
    Io(#[from] std::io::Error),
}

/// One accepted submission
#[derive(Debug, Clone)]
pub struct Submission {
    id: String,
    source: Vec<u8>,
    language: String,
    team: Option<String>,
}

impl Submission {
    pub fn new(
        id: impl Into<String>,
        source: Vec<u8>,
        language: impl Into<String>,
        team: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            language: language.into(),
            team,
        }
    }

    /// Read a submission from a queue file named `<id>.<language>`.
    ///
    /// The directory queue carries no team attribution; intakes that know
    /// the team use [`Submission::new`] directly.
    pub fn from_queue_file(path: &Path) -> Result<Self, SubmissionError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SubmissionError::BadFileName(path.display().to_string()))?;

        let (id, language) = file_name
            .rsplit_once('.')
            .filter(|(id, language)| !id.is_empty() && !language.is_empty())
            .ok_or_else(|| SubmissionError::BadFileName(file_name.to_string()))?;

        let source = std::fs::read(path)?;

        Ok(Self::new(id, source, language, None))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn team(&self) -> Option<&str> {
        self.team.as_deref()
    }

    /// Source size rounded up to whole kilobytes
    pub fn size_kb(&self) -> u64 {
        (self.source.len() as u64).div_ceil(1024)
    }

    /// Pre-workspace validation against the configured limits.
    ///
    /// Rejection here is a property of the submission, not of the judging
    /// infrastructure; nothing has been created on disk yet.
    pub fn validate(&self, config: &Config) -> Result<(), SubmissionError> {
        if self.id.is_empty() || self.id.contains(['/', '\\']) || self.id.contains("..") {
            return Err(SubmissionError::BadId(self.id.clone()));
        }
        if self.source.is_empty() {
            return Err(SubmissionError::EmptySource);
        }
        if self.source.len() as u64 > config.max_source_bytes() {
            return Err(SubmissionError::SourceTooLarge {
                actual_kb: self.size_kb(),
                limit_kb: config.source_size,
            });
        }
        Ok(())
    }
}
