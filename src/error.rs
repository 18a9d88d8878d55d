use thiserror::Error;

use crate::models::PayloadKind;

/// Structural failures of the extraction step. Malformed individual rows are
/// not errors; they are dropped and counted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no schedule table found in HTML payload")]
    NoTable,

    #[error("no row array at JSON pointer `{pointer}`")]
    NoRows { pointer: String },

    #[error("payload is {found}, expected {expected}")]
    PayloadMismatch { expected: PayloadKind, found: PayloadKind },

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
