use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::Category;

/// Errors produced while setting up or running a conversion batch.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("no files selected for conversion")]
    NoFiles,

    #[error("'{format}' is not a supported {category} output format (expected one of: {allowed})")]
    UnsupportedTarget {
        category: Category,
        format: String,
        allowed: String,
    },

    #[error("unsupported input format '{extension}' for {path}")]
    UnsupportedInput { path: PathBuf, extension: String },

    #[error("unknown category '{0}' (expected images, documents, audio or video)")]
    UnknownCategory(String),

    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),

    #[error("cannot encode character {ch:?} as {encoding}")]
    Encoding { encoding: &'static str, ch: char },

    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spreadsheet read error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("spreadsheet write error: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("invalid document in {path}: {reason}")]
    Document { path: PathBuf, reason: String },

    #[error("{tool} was not found; install it and make sure it is in your PATH")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("converter panicked on {path}: {message}")]
    ConverterPanicked { path: PathBuf, message: String },

    #[error("a conversion batch is already running")]
    BatchInFlight,

    #[error("conversion worker panicked")]
    WorkerPanicked,

    #[error("config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl ConvertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the external transcoder (absent binary or non-zero exit).
    pub fn is_tool_error(&self) -> bool {
        matches!(self, Self::ToolMissing { .. } | Self::ToolFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_are_distinguished() {
        let missing = ConvertError::ToolMissing {
            tool: "ffmpeg".into(),
        };
        let failed = ConvertError::ToolFailed {
            tool: "ffmpeg".into(),
            status: "exit status: 1".into(),
            stderr: "Invalid data found when processing input".into(),
        };
        assert!(missing.is_tool_error());
        assert!(failed.is_tool_error());
        assert!(!ConvertError::NoFiles.is_tool_error());
    }

    #[test]
    fn unsupported_target_lists_allowed_formats() {
        let err = ConvertError::UnsupportedTarget {
            category: Category::Audio,
            format: "png".into(),
            allowed: "mp3, wav".into(),
        };
        assert_eq!(
            err.to_string(),
            "'png' is not a supported audio output format (expected one of: mp3, wav)"
        );
    }
}
