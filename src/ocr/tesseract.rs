//! Tesseract OCR provider.
//!
//! Runs the `tesseract` binary with the image on stdin and reads the text
//! from stdout, so no temp files are needed.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{OcrError, OcrInput, OcrOutput, OcrProvider};

pub struct TesseractProvider {
    binary: String,
}

impl TesseractProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        let start = Instant::now();

        let spawned = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", input.language.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::BackendNotAvailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary
                )));
            }
            Err(e) => return Err(OcrError::Io(e)),
        };

        // Dropping stdin at the end of this block closes the pipe (EOF).
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&input.png).await,
            None => Ok(()),
        };

        // Collect output even if the write failed: an early exit (e.g. missing
        // language data) shows up as a broken pipe, and stderr says why.
        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(OcrError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = written {
            return Err(OcrError::OcrFailed(format!(
                "failed to send image to tesseract ({}): {}",
                e,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        let elapsed = start.elapsed();
        debug!(
            "TesseractProvider: {} chars in {} ms (lang={})",
            text.len(),
            elapsed.as_millis(),
            input.language
        );

        Ok(OcrOutput {
            text,
            provider_name: "tesseract".to_string(),
            processing_time_ms: elapsed.as_millis() as u64,
        })
    }
}
