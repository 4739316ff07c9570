//! Error types for the `mongogen` library.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Coarse error categories surfaced to the user and mapped to exit codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid configuration or CLI parameters.
    Config,
    /// Failed to reach or authenticate against the source database.
    SourceConnection,
    /// Failed to read or write a local file.
    FileIo,
    /// Failed to parse an input document stream.
    InputRead,
    /// Failure while sampling documents from the source.
    Sampling,
    /// Failure while inferring a schema from samples.
    Inference,
    /// Failure while composing the generation schema.
    Synthesis,
    /// Failure while validating a document stream.
    Validation,
    /// Everything else.
    General,
}

impl ErrorCode {
    /// The process exit code reported for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCode::Config => 2,
            ErrorCode::FileIo | ErrorCode::InputRead => 4,
            _ => 1,
        }
    }
}

/// Errors produced by the `mongogen` library.
#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A dynamic-key pattern in the configuration failed to compile.
    #[error("invalid key pattern '{pattern}'")]
    InvalidKeyPattern {
        /// The offending pattern source.
        pattern: String,
        /// Source of the error.
        source: regex::Error,
    },

    /// A custom pattern could not be compiled into a string generator.
    #[error("invalid generator pattern")]
    InvalidGeneratorPattern(#[from] rand_regex::Error),

    /// Operation ratios are unusable (all zero or negative).
    #[error("operation ratios must contain at least one positive weight")]
    InvalidRatios,

    /// Unsupported CLI parameter.
    #[error("unsupported {kind} {value}")]
    UnsupportedCliParameter {
        /// The parameter name.
        kind: &'static str,
        /// Value provided by user.
        value: String,
    },

    /// Failed to establish the initial database connection.
    #[error("failed to connect to {uri}")]
    SourceConnection {
        /// The redacted connection string.
        uri: String,
        /// Source of the error.
        source: mongodb::error::Error,
    },

    /// A driver operation failed while sampling.
    #[error("failed to {action} while sampling {collection}")]
    Sampling {
        /// Action causing the error.
        action: &'static str,
        /// The sampled collection.
        collection: String,
        /// Source of the error.
        source: mongodb::error::Error,
    },

    /// The sample was empty, nothing can be inferred.
    #[error("collection {collection} produced an empty sample")]
    EmptySample {
        /// The sampled collection.
        collection: String,
    },

    /// A non-recoverable driver failure outside of sampling.
    #[error("driver failure during {action}")]
    Driver {
        /// Action causing the error.
        action: &'static str,
        /// Source of the error.
        source: mongodb::error::Error,
    },

    /// Generic IO error.
    #[error("failed to {action} at {path}")]
    Io {
        /// Action causing the error.
        action: &'static str,
        /// File path causing the I/O error.
        path: PathBuf,
        /// Source of error.
        source: std::io::Error,
    },

    /// A line of an input document stream failed to parse.
    #[error("failed to parse input line {line}: {prefix}…")]
    InputRead {
        /// 1-based line number in the stream.
        line: u64,
        /// Prefix of the offending line.
        prefix: String,
        /// Source of the error.
        source: serde_json::Error,
    },

    /// An artifact file did not deserialize into the expected shape.
    #[error("malformed {what}")]
    Artifact {
        /// Which artifact failed to parse.
        what: &'static str,
        /// Source of the error.
        source: serde_json::Error,
    },

    /// Inference could not produce a usable schema.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The generation schema could not be composed.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// The generation schema did not compile into a validator.
    #[error("generation schema did not compile: {0}")]
    SchemaCompile(String),

    /// Validation could not run to completion.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    /// The category this error belongs to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidKeyPattern { .. }
            | Error::InvalidGeneratorPattern(_)
            | Error::InvalidRatios
            | Error::UnsupportedCliParameter { .. } => ErrorCode::Config,
            Error::SourceConnection { .. } => ErrorCode::SourceConnection,
            Error::Io { .. } | Error::Artifact { .. } => ErrorCode::FileIo,
            Error::InputRead { .. } => ErrorCode::InputRead,
            Error::Sampling { .. } | Error::EmptySample { .. } => ErrorCode::Sampling,
            Error::Inference(_) => ErrorCode::Inference,
            Error::Synthesis(_) => ErrorCode::Synthesis,
            Error::SchemaCompile(_) | Error::Validation(_) => ErrorCode::Validation,
            Error::Driver { .. } => ErrorCode::General,
        }
    }

    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }
}

/// The single JSON object emitted to the error channel on failure.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    /// Always `"error"`.
    pub status: &'static str,
    /// Pipeline phase that failed (`infer`, `generate`, `validate`, `mutate`).
    pub phase: &'static str,
    /// The error payload.
    pub error: ErrorBody,
}

/// Payload of an [`ErrorReport`].
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Error category.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Underlying cause chain, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cause: Vec<String>,
}

impl ErrorReport {
    /// Builds the report for an error raised in `phase`.
    pub fn new(phase: &'static str, error: &Error) -> Self {
        let mut cause = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(inner) = source {
            cause.push(inner.to_string());
            source = inner.source();
        }
        ErrorReport {
            status: "error",
            phase,
            error: ErrorBody {
                code: error.code(),
                message: error.to_string(),
                cause,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_category() {
        assert_eq!(Error::InvalidRatios.exit_code(), 2);
        assert_eq!(
            Error::Io {
                action: "open",
                path: "x.ndjson".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            }
            .exit_code(),
            4
        );
        assert_eq!(Error::Inference("no fields".into()).exit_code(), 1);
    }

    #[test]
    fn report_carries_code_and_cause() {
        let err = Error::Io {
            action: "read",
            path: "profile.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let report = ErrorReport::new("validate", &err);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["code"], "FILE_IO");
        assert_eq!(json["error"]["cause"][0], "denied");
    }
}
