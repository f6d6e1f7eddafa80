//! Text extraction adapter
//!
//! Runs an external extraction tool against a staged presentation:
//!
//! ```text
//! <program> [script] <absolute deck path> [count_only]
//! ```
//!
//! The tool prints one JSON document on stdout, either
//! `{"data": [...slides]}`, `{"data": {"slideCount": N}}` or `{"error": "..."}`.
//! Diagnostics go to stderr and are only logged.

use crate::errors::ExtractionError;
use async_trait::async_trait;
use deckforge_common::config::ExtractorConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// One slide's extracted content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// 1-based slide number
    pub slide: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub stats: Option<SlideStats>,
}

/// Image and OCR counters reported per slide
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideStats {
    #[serde(default)]
    pub total_images: u32,
    #[serde(default)]
    pub ocr_successful: u32,
}

impl Slide {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
            || self.notes.as_deref().map(|n| !n.trim().is_empty()).unwrap_or(false)
    }
}

/// Source of slide counts and slide text
#[async_trait]
pub trait SlideExtractor: Send + Sync {
    /// Fast path: count slides without extracting text
    async fn count_slides(&self, path: &Path) -> Result<u32, ExtractionError>;

    /// Full per-slide text and notes, in slide order
    async fn extract_slides(&self, path: &Path) -> Result<Vec<Slide>, ExtractionError>;
}

/// Extractor that shells out to a separate program
#[derive(Debug, Clone)]
pub struct ProcessExtractor {
    program: String,
    script: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    timeout: Duration,
}

struct ProcessOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ProcessExtractor {
    pub fn new(program: impl Into<String>, script: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            script,
            working_dir: None,
            env: HashMap::new(),
            timeout,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            program: config.program.clone(),
            script: config.script.clone(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run the tool once and collect its output
    async fn run(&self, path: &Path, count_only: bool) -> Result<ProcessOutput, ExtractionError> {
        // The tool may run elsewhere, so it always gets an absolute path
        let deck = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let mut cmd = Command::new(&self.program);
        if let Some(ref script) = self.script {
            cmd.arg(script);
        }
        cmd.arg(&deck);
        if count_only {
            cmd.arg("count_only");
        }
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ExtractionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the pending future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout.as_secs()))??;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(target: "deckforge::extractor", "{}", line);
        }

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    /// Run the tool and return the `data` member of its envelope
    async fn run_for_data(&self, path: &Path, count_only: bool) -> Result<(Value, String), ExtractionError> {
        let output = self.run(path, count_only).await?;
        let success = output.code == Some(0);

        let Some(document) = parse_document(&output.stdout) else {
            return Err(if success {
                ExtractionError::InvalidOutput("no JSON document on stdout".to_string())
            } else {
                ExtractionError::ProcessFailed(output.code.unwrap_or(-1))
            });
        };

        if let Some(error) = document.get("error").filter(|e| !e.is_null()) {
            return Err(ExtractionError::Reported(value_to_message(error)));
        }

        if !success {
            warn!(code = ?output.code, "Extractor exited non-zero but produced a result");
        }

        match document.get("data") {
            Some(data) if !data.is_null() => Ok((data.clone(), output.stderr)),
            _ => Err(ExtractionError::InvalidOutput("missing 'data' member".to_string())),
        }
    }
}

#[async_trait]
impl SlideExtractor for ProcessExtractor {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn count_slides(&self, path: &Path) -> Result<u32, ExtractionError> {
        let (data, _) = self.run_for_data(path, true).await?;

        let count = data
            .get("slideCount")
            .and_then(Value::as_u64)
            .ok_or_else(|| ExtractionError::InvalidOutput("missing 'slideCount'".to_string()))?;

        let count = u32::try_from(count)
            .map_err(|_| ExtractionError::InvalidOutput(format!("slide count {} out of range", count)))?;

        debug!(slide_count = count, "Slides counted");
        Ok(count)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn extract_slides(&self, path: &Path) -> Result<Vec<Slide>, ExtractionError> {
        let (data, stderr) = self.run_for_data(path, false).await?;

        let mut slides: Vec<Slide> = serde_json::from_value(data)
            .map_err(|e| ExtractionError::InvalidOutput(format!("bad slide list: {}", e)))?;

        // The tool reports some failures on stderr and still prints an empty list
        if slides.is_empty() {
            let reason = parse_document(&stderr)
                .and_then(|doc| doc.get("error").map(value_to_message));
            return Err(ExtractionError::NoSlides(reason));
        }

        slides.sort_by_key(|s| s.slide);

        let images: u32 = slides.iter().filter_map(|s| s.stats).map(|s| s.total_images).sum();
        let ocr: u32 = slides.iter().filter_map(|s| s.stats).map(|s| s.ocr_successful).sum();
        let empty = slides.iter().filter(|s| !s.has_content()).count();
        info!(
            slides = slides.len(),
            images,
            ocr_successful = ocr,
            empty_slides = empty,
            "Slide text extracted"
        );

        if empty == slides.len() {
            warn!(slides = slides.len(), "No slide yielded text; scoring will see empty slides");
        }

        Ok(slides)
    }
}

/// Find the JSON object in tool output: the whole text first, then the last
/// line that parses as an object
fn parse_document(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    trimmed
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

fn value_to_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
