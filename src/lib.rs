//! # fileconv - Local File Conversion Library
//!
//! `fileconv` converts batches of local files between formats in four fixed
//! categories: images, tabular documents, audio and video.
//!
//! ## Features
//!
//! - Image conversion with optional resizing and JPEG quality control
//! - CSV / XLSX / XLS / JSON / TXT table conversion with header and encoding options
//! - Audio and video transcoding through an external `ffmpeg` binary
//! - Per-file failure isolation: one bad file never stops the rest of a batch
//! - Progress events for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use fileconv::{BatchConverter, Category, ConversionOptions, ConversionRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = BatchConverter::new();
//! let request = ConversionRequest::new(Category::Images, "png", "converted")
//!     .with_inputs(["photo.jpg", "scan.bmp"])
//!     .with_options(ConversionOptions::default().with_size(Some(800), Some(600)));
//!
//! let summary = converter.run(&request, |_event| {})?;
//! println!("{}", summary.status_line());
//! # Ok(())
//! # }
//! ```
//!
//! ## Background batches
//!
//! A [`Session`] keeps the per-category selections and runs each batch on a
//! worker thread, handing updates back over a channel:
//!
//! ```no_run
//! use fileconv::{BatchEvent, Category, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::default();
//! session.add_files(Category::Documents, ["report.csv"]);
//! let handle = session.start(Category::Documents, "json")?;
//! for event in handle.events() {
//!     if let BatchEvent::Progress(p) = event {
//!         println!("{:.0}%", p.percentage);
//!     }
//! }
//! let summary = session.finish(handle)?;
//! println!("{}", summary.status_line());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod image_convert;
pub mod media;
pub mod session;

pub use batch::{BatchConverter, BatchEvent, BatchPhase, BatchSummary, FileOutcome, Progress};
pub use config::AppConfig;
pub use document::TextEncoding;
pub use error::{ConvertError, Result};
pub use media::Transcoder;
pub use session::{BatchHandle, History, HistoryEntry, Selection, Session};

/// One of the four fixed conversion domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Images,
    Documents,
    Audio,
    Video,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Images,
        Category::Documents,
        Category::Audio,
        Category::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Documents => "documents",
            Category::Audio => "audio",
            Category::Video => "video",
        }
    }

    /// Human label used in user-facing messages ("Image conversion requires ...").
    pub fn label(&self) -> &'static str {
        match self {
            Category::Images => "Image",
            Category::Documents => "Document",
            Category::Audio => "Audio",
            Category::Video => "Video",
        }
    }

    /// Extensions accepted as input for this category.
    pub fn input_extensions(&self) -> &'static [&'static str] {
        match self {
            Category::Images => &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"],
            Category::Documents => &["csv", "xlsx", "xls", "json", "txt"],
            Category::Audio => &["mp3", "wav", "ogg", "flac", "aac", "m4a"],
            Category::Video => &["mp4", "avi", "mkv", "mov", "webm"],
        }
    }

    /// Output formats this category can produce.
    pub fn target_formats(&self) -> &'static [&'static str] {
        match self {
            Category::Images => &["jpg", "png", "gif", "bmp", "tiff", "webp"],
            Category::Documents => &["csv", "xlsx", "json", "txt"],
            Category::Audio => &["mp3", "wav", "ogg", "flac"],
            Category::Video => &["mp4", "avi", "mkv", "mov"],
        }
    }

    pub fn supports_target(&self, format: &str) -> bool {
        self.target_formats().iter().any(|f| f.eq_ignore_ascii_case(format))
    }

    pub fn accepts_input(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.input_extensions().contains(&ext.as_str()))
    }

    /// Guess the category of a file from its extension.
    pub fn from_path(path: &Path) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.accepts_input(path))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "images" | "image" | "img" => Ok(Category::Images),
            "documents" | "document" | "docs" | "doc" => Ok(Category::Documents),
            "audio" => Ok(Category::Audio),
            "video" => Ok(Category::Video),
            _ => Err(ConvertError::UnknownCategory(s.to_string())),
        }
    }
}

/// Format specific options shared by every file of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOptions {
    /// Encoder quality (1-100), used by lossy image formats
    pub quality: u8,
    /// Target width in pixels
    pub width: Option<u32>,
    /// Target height in pixels
    pub height: Option<u32>,
    /// Text encoding for reading and writing delimited documents
    pub encoding: TextEncoding,
    /// Whether tabular outputs start with a header row
    pub include_headers: bool,
    /// Codec passed to the transcoder
    pub codec: Option<String>,
    /// Bitrate passed to the transcoder (e.g. "192k")
    pub bitrate: Option<String>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: 95,
            width: None,
            height: None,
            encoding: TextEncoding::Utf8,
            include_headers: true,
            codec: None,
            bitrate: None,
        }
    }
}

impl ConversionOptions {
    /// Set encoder quality, clamped to 1-100
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Resize images to the given dimensions
    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width.filter(|w| *w > 0);
        self.height = height.filter(|h| *h > 0);
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_headers(mut self, include_headers: bool) -> Self {
        self.include_headers = include_headers;
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        let codec: String = codec.into();
        self.codec = (!codec.trim().is_empty()).then_some(codec);
        self
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        let bitrate: String = bitrate.into();
        self.bitrate = (!bitrate.trim().is_empty()).then_some(bitrate);
        self
    }

    /// Options seeded from configured defaults
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            quality: config.quality.clamp(1, 100),
            encoding: config.encoding,
            include_headers: config.include_headers,
            ..Self::default()
        }
    }
}

/// Everything needed to run one batch.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub category: Category,
    pub inputs: Vec<PathBuf>,
    pub target_format: String,
    pub output_dir: PathBuf,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(category: Category, target_format: &str, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            category,
            inputs: Vec::new(),
            target_format: target_format.trim().to_ascii_lowercase(),
            output_dir: output_dir.into(),
            options: ConversionOptions::default(),
        }
    }

    pub fn with_inputs<I, P>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// `{output_dir}/{input_stem}.{target_format}`
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        output_path(&self.output_dir, input, &self.target_format)
    }
}

pub fn output_path(output_dir: &Path, input: &Path, target_format: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}.{}", stem, target_format))
}

/// Lower-cased extension of a path, if any.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
