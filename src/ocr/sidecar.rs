//! OCR sidecar provider (HTTP service wrapping an OCR engine).

use std::time::Instant;

use serde::Deserialize;
use tracing::info;

use super::{OcrError, OcrInput, OcrOutput, OcrProvider};

/// Sidecar response (private deserialization type).
#[derive(Debug, Deserialize)]
struct SidecarResponse {
    text: String,
}

pub struct SidecarProvider {
    url: String,
    client: reqwest::Client,
}

impl SidecarProvider {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for SidecarProvider {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        use reqwest::multipart::{Form, Part};

        let start = Instant::now();
        info!(
            "SidecarProvider: sending {} bytes to {}/ocr",
            input.png.len(),
            self.url
        );

        let part = Part::bytes(input.png.clone())
            .file_name("image.png")
            .mime_str("image/png")?;

        let form = Form::new()
            .part("file", part)
            .text("lang", input.language.clone());

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OcrError::OcrFailed(format!(
                "OCR sidecar error ({}): {}",
                status, error_text
            )));
        }

        let result: SidecarResponse = response.json().await?;

        Ok(OcrOutput {
            text: result.text,
            provider_name: "sidecar".to_string(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
