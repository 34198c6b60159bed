//! The batch conversion dispatcher.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::document::convert_document;
use crate::error::{ConvertError, Result};
use crate::image_convert::convert_image;
use crate::media::Transcoder;
use crate::{Category, ConversionOptions, ConversionRequest};

/// Represents the current phase of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    /// Output directory prepared, nothing converted yet
    Starting,
    /// Working through the input list
    Converting,
    /// Every input has been attempted
    Complete,
}

/// Progress information for a running batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: BatchPhase,
    /// Index of the file about to be converted (equals `total` once complete)
    pub completed: usize,
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

impl Progress {
    pub fn starting(total: usize) -> Self {
        Self {
            phase: BatchPhase::Starting,
            completed: 0,
            total,
            percentage: 0.0,
            message: "Converting...".to_string(),
        }
    }

    /// Progress before converting file `index`: `index / total`, never `index + 1`.
    pub fn converting(index: usize, total: usize, input: &Path) -> Self {
        let percentage = if total > 0 {
            (index as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase: BatchPhase::Converting,
            completed: index,
            total,
            percentage,
            message: format!("Converting {} ({} of {})", display_name(input), index + 1, total),
        }
    }

    pub fn complete(succeeded: usize, total: usize) -> Self {
        Self {
            phase: BatchPhase::Complete,
            completed: total,
            total,
            percentage: 100.0,
            message: format!("Conversion complete: {}/{} successful", succeeded, total),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Per-file result of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `None` on success, the error message otherwise
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub category: Category,
    pub target_format: String,
    pub output_dir: PathBuf,
    pub succeeded: usize,
    pub total: usize,
    pub outcomes: Vec<FileOutcome>,
    pub warnings: Vec<String>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    pub fn status_line(&self) -> String {
        format!("Conversion complete: {}/{} successful", self.succeeded, self.total)
    }

    /// Completion notice, only when at least one file converted.
    pub fn notification(&self) -> Option<String> {
        (self.succeeded > 0).then(|| {
            format!(
                "Successfully converted {} out of {} files.\nFiles saved to: {}",
                self.succeeded,
                self.total,
                self.output_dir.display()
            )
        })
    }
}

/// Everything a batch reports while it runs.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress(Progress),
    FileConverted { input: PathBuf, output: PathBuf },
    FileFailed { input: PathBuf, error: String },
    /// User-facing remediation hint, sent at most once per batch
    Warning(String),
    Finished(BatchSummary),
}

/// Remediation shown when the external transcoder is absent or fails.
pub fn tool_warning(category: Category) -> String {
    format!(
        "{} conversion requires FFmpeg to be installed and in your PATH.",
        category.label()
    )
}

/// Runs conversion batches: validates the request, then converts each file in order.
pub struct BatchConverter {
    config: AppConfig,
    transcoder: Transcoder,
}

impl BatchConverter {
    /// Create a converter with default configuration
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Create a converter with custom configuration
    pub fn with_config(config: AppConfig) -> Self {
        let transcoder = config
            .ffmpeg_path
            .clone()
            .map(Transcoder::with_program)
            .unwrap_or_default();
        Self { config, transcoder }
    }

    /// Load configuration from a file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::with_config(AppConfig::from_file(path)?))
    }

    pub fn with_transcoder(mut self, transcoder: Transcoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Convert a single file with the converter for `category`.
    ///
    /// A panic inside the converter is caught and returned as
    /// [`ConvertError::ConverterPanicked`] for this file alone.
    pub fn convert_file(
        &self,
        category: Category,
        input: &Path,
        output: &Path,
        target: &str,
        options: &ConversionOptions,
    ) -> Result<()> {
        isolate_panics(input, || match category {
            Category::Images => convert_image(input, output, target, options),
            Category::Documents => convert_document(input, output, target, options),
            Category::Audio | Category::Video => {
                self.transcoder.convert(category, input, output, options)
            }
        })
    }

    /// Setup checks that abort the whole batch before anything is converted.
    pub fn prepare(&self, request: &ConversionRequest) -> Result<()> {
        if request.inputs.is_empty() {
            return Err(ConvertError::NoFiles);
        }
        if !request.category.supports_target(&request.target_format) {
            return Err(ConvertError::UnsupportedTarget {
                category: request.category,
                format: request.target_format.clone(),
                allowed: request.category.target_formats().join(", "),
            });
        }
        if !request.output_dir.is_dir() {
            fs::create_dir_all(&request.output_dir).map_err(|source| ConvertError::OutputDir {
                path: request.output_dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run a whole batch, reporting every step to `on_event`.
    ///
    /// Setup failures return `Err` with no file touched. Per-file failures are
    /// logged, reported as [`BatchEvent::FileFailed`] and counted; they never
    /// stop the remaining files.
    pub fn run<F>(&self, request: &ConversionRequest, mut on_event: F) -> Result<BatchSummary>
    where
        F: FnMut(BatchEvent),
    {
        self.prepare(request)?;

        let total = request.inputs.len();
        let target = request.target_format.as_str();
        info!(
            category = %request.category,
            format = target,
            total,
            output_dir = %request.output_dir.display(),
            "starting batch"
        );
        on_event(BatchEvent::Progress(Progress::starting(total)));

        let mut succeeded = 0;
        let mut outcomes = Vec::with_capacity(total);
        let mut warnings = Vec::new();

        for (i, input) in request.inputs.iter().enumerate() {
            on_event(BatchEvent::Progress(Progress::converting(i, total, input)));
            let output = request.output_path_for(input);

            match self.convert_file(request.category, input, &output, target, &request.options) {
                Ok(()) => {
                    debug!(input = %input.display(), output = %output.display(), "converted");
                    succeeded += 1;
                    on_event(BatchEvent::FileConverted {
                        input: input.clone(),
                        output: output.clone(),
                    });
                    outcomes.push(FileOutcome {
                        input: input.clone(),
                        output,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(input = %input.display(), error = %e, "conversion failed");
                    if e.is_tool_error() && warnings.is_empty() {
                        let warning = tool_warning(request.category);
                        on_event(BatchEvent::Warning(warning.clone()));
                        warnings.push(warning);
                    }
                    let error = e.to_string();
                    on_event(BatchEvent::FileFailed {
                        input: input.clone(),
                        error: error.clone(),
                    });
                    outcomes.push(FileOutcome {
                        input: input.clone(),
                        output,
                        error: Some(error),
                    });
                }
            }
        }

        on_event(BatchEvent::Progress(Progress::complete(succeeded, total)));
        let summary = BatchSummary {
            category: request.category,
            target_format: request.target_format.clone(),
            output_dir: request.output_dir.clone(),
            succeeded,
            total,
            outcomes,
            warnings,
        };
        info!(succeeded, total, "batch finished");
        on_event(BatchEvent::Finished(summary.clone()));
        Ok(summary)
    }
}

fn isolate_panics<F>(input: &Path, convert: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    panic::catch_unwind(AssertUnwindSafe(convert)).unwrap_or_else(|payload| {
        Err(ConvertError::ConverterPanicked {
            path: input.to_path_buf(),
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Default for BatchConverter {
    fn default() -> Self {
        Self::new()
    }
}
