//! The extraction collaborator: everything that turns a URL into a file on
//! disk happens behind [`MediaExtractor`]. Production uses the `yt-dlp`
//! executable; tests plug in fakes.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

use crate::files::resolve_within;

/// Best mp4 video + m4a audio, falling back to the best single mp4, then to
/// whatever is best.
pub const FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The collaborator ran and refused or failed to fetch the media.
    #[error("{0}")]
    Download(String),
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("extraction tool unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("downloaded file was not found in the download directory")]
    MissingOutput,
}

impl ExtractError {
    pub fn is_download_failure(&self) -> bool {
        matches!(self, Self::Download(_) | Self::TimedOut(_))
    }
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Fetches `url` into `output_dir` and returns the path of the written
    /// file, which must be a regular file inside `output_dir`.
    async fn download(&self, url: &str, output_dir: &Path) -> Result<PathBuf, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl YtDlpExtractor {
    pub fn new(bin: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    fn build_args(url: &str, output_dir: &Path) -> Vec<String> {
        let output_template = output_dir.join(OUTPUT_TEMPLATE);

        vec![
            "--format".to_string(),
            FORMAT_SELECTOR.to_string(),
            "--output".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-simulate".to_string(),
            "--newline".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--".to_string(),
            url.to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output, ExtractError> {
        let command_future = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let result = match self.timeout {
            Some(limit) => timeout(limit, command_future)
                .await
                .map_err(|_| ExtractError::TimedOut(limit))?,
            None => command_future.await,
        };

        let output = result.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExtractError::Unavailable(format!("{} is not installed", self.bin.display()))
            } else {
                ExtractError::Io(error)
            }
        })?;

        if !output.status.success() {
            return Err(ExtractError::Download(collaborator_message(
                &output.stderr,
                output.status.code(),
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn download(&self, url: &str, output_dir: &Path) -> Result<PathBuf, ExtractError> {
        info!("Starting yt-dlp for {url:?}");
        let output = self.run(Self::build_args(url, output_dir)).await?;

        let printed_path = extract_printed_path(&output.stdout).ok_or(ExtractError::MissingOutput)?;
        debug!("yt-dlp reported output {printed_path:?}");

        // A relative print is relative to our working directory, which the
        // child inherits; bare names are tried against `output_dir` second.
        let as_printed = PathBuf::from(&printed_path);
        if let Some(path) = resolve_within(output_dir, &as_printed).await? {
            return Ok(path);
        }

        if as_printed.is_relative()
            && let Some(path) = resolve_within(output_dir, &output_dir.join(&as_printed)).await?
        {
            return Ok(path);
        }

        Err(ExtractError::MissingOutput)
    }
}

/// Last meaningful stderr line, without yt-dlp's `ERROR:` tag.
fn collaborator_message(stderr: &[u8], code: Option<i32>) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let last_line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back();

    match last_line {
        Some(line) => line
            .strip_prefix("ERROR:")
            .map(str::trim_start)
            .unwrap_or(line)
            .to_string(),
        None => match code {
            Some(code) => format!("yt-dlp exited with status {code}"),
            None => "yt-dlp was terminated by a signal".to_string(),
        },
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
