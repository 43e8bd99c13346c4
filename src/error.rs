use crate::types::Role;
use thiserror::Error;

/// Failures of the schema-inference and metric pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("MissingRequiredRole(\"{0}\"): no column looks like {0}")]
    MissingRequiredRole(Role),

    #[error("EmptyFrame: the file has a header but no data rows")]
    EmptyFrame,

    #[error("CoercionTotalZero: every revenue cell coerced to 0, check the revenue column")]
    CoercionTotalZero,

    #[error("UnexpectedFailure: {0}")]
    UnexpectedFailure(String),
}

/// Failures while turning an upload into a raw frame.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("The file has no header row")]
    MissingHeader,
}

impl From<calamine::Error> for LoadError {
    fn from(e: calamine::Error) -> Self {
        LoadError::Spreadsheet(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Advisor is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Advisor returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed advisor response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("An upload is already being processed")]
    Busy,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}
