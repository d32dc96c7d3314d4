use thiserror::Error;

use crate::analysis::{RejectionKind, ValidationIssue};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("image processing failed: {0}")]
    ProcessingFailed(String),

    #[error("analysis rejected ({kind}): {}", summarize(.errors))]
    ValidationFailed {
        kind: RejectionKind,
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
    },
}

impl EngineError {
    /// Stable identifier for reports and event logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidImage(_) => "invalid_image",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::ProcessingFailed(_) => "processing_failed",
            Self::ValidationFailed { .. } => "validation_failed",
        }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
