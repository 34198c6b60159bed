use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcCommand, Stdio};
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::{Category, ConversionOptions};

const DEFAULT_FFMPEG: &str = "ffmpeg";
const STDERR_TAIL_LINES: usize = 3;

/// External media transcoder invoked as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoder {
    program: PathBuf,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_FFMPEG),
        }
    }
}

impl Transcoder {
    /// Use a specific binary (absolute path or a name looked up on `PATH`).
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_FFMPEG.to_string())
    }

    /// Resolve the binary on disk, failing with `ToolMissing` when it is absent.
    pub fn locate(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|_| ConvertError::ToolMissing {
            tool: self.tool_name(),
        })
    }

    /// Arguments for one conversion: `-y -i <input> [codec] [bitrate] <output>`.
    pub fn build_args(
        &self,
        category: Category,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
    ) -> Vec<OsString> {
        let (codec_flag, bitrate_flag) = match category {
            Category::Video => ("-vcodec", "-b:v"),
            _ => ("-acodec", "-b:a"),
        };

        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.as_os_str().to_owned()];
        if let Some(codec) = options.codec.as_deref() {
            args.push(codec_flag.into());
            args.push(codec.into());
        }
        if let Some(bitrate) = options.bitrate.as_deref() {
            args.push(bitrate_flag.into());
            args.push(bitrate.into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }

    pub fn convert(
        &self,
        category: Category,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
    ) -> Result<()> {
        let program = self.locate()?;
        let args = self.build_args(category, input, output, options);
        debug!(program = %program.display(), ?args, "running transcoder");

        let result = ProcCommand::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ConvertError::ToolMissing {
                    tool: self.tool_name(),
                },
                _ => ConvertError::io(&program, e),
            })?;

        if !result.status.success() {
            return Err(ConvertError::ToolFailed {
                tool: self.tool_name(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
