//! Error taxonomy surfaced to the host.
//!
//! Most of this crate's internal plumbing still propagates through
//! `anyhow::Error` with `ensure!` and `bail!`, but callers that need a
//! *typed* kind to switch on get `AggError`, which wraps the taxonomy in a
//! `thiserror`-derived enum. It still converts into `anyhow::Error` via the
//! blanket `From<std::error::Error>` impl, so `?` keeps working the same
//! way throughout.

use std::fmt;

/// Where in a document or aggregation an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorLocation {
    pub source_file: Option<String>,
    pub source_line: Option<u64>,
    pub member_location: Option<String>,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source_file, self.source_line, &self.member_location) {
            (Some(file), Some(line), _) => write!(f, " ({}:{})", file, line),
            (Some(file), None, _) => write!(f, " ({})", file),
            (None, _, Some(loc)) => write!(f, " (member: {})", loc),
            _ => Ok(()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AggError {
    #[error("parse error: {message}{location}")]
    Parse {
        message: String,
        location: ErrorLocation,
    },

    #[error("syntax error: {message}{location}")]
    SyntaxUser {
        message: String,
        location: ErrorLocation,
    },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("not implemented: {message}")]
    Unimplemented { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("dimension not found: {dim} on {member}")]
    DimensionNotFound { dim: String, member: String },

    #[error("aggregation error: {message}{location}")]
    Aggregation {
        message: String,
        location: ErrorLocation,
    },
}

impl AggError {
    pub fn parse(message: impl Into<String>) -> AggError {
        AggError::Parse {
            message: message.into(),
            location: ErrorLocation::default(),
        }
    }

    pub fn parse_at(message: impl Into<String>, file: &str, line: u64) -> AggError {
        AggError::Parse {
            message: message.into(),
            location: ErrorLocation {
                source_file: Some(file.to_string()),
                source_line: Some(line),
                member_location: None,
            },
        }
    }

    pub fn syntax(message: impl Into<String>) -> AggError {
        AggError::SyntaxUser {
            message: message.into(),
            location: ErrorLocation::default(),
        }
    }

    pub fn aggregation(message: impl Into<String>) -> AggError {
        AggError::Aggregation {
            message: message.into(),
            location: ErrorLocation::default(),
        }
    }

    pub fn aggregation_at(message: impl Into<String>, member_location: impl Into<String>) -> AggError {
        AggError::Aggregation {
            message: message.into(),
            location: ErrorLocation {
                source_file: None,
                source_line: None,
                member_location: Some(member_location.into()),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> AggError {
        AggError::NotFound {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> AggError {
        AggError::Internal {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> AggError {
        AggError::Cache {
            message: message.into(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> AggError {
        AggError::Unimplemented {
            message: message.into(),
        }
    }

    pub fn dimension_not_found(dim: impl Into<String>, member: impl Into<String>) -> AggError {
        AggError::DimensionNotFound {
            dim: dim.into(),
            member: member.into(),
        }
    }
}

pub type AggResult<T> = Result<T, AggError>;
