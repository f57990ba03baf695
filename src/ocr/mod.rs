//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait so the import pipeline can run against
//! a local Tesseract binary or a remote OCR sidecar, picked at startup.

pub mod sidecar;
pub mod tesseract;

use thiserror::Error;

/// Image handed to a provider. Always PNG, whatever the source format was.
#[derive(Debug, Clone)]
pub struct OcrInput {
    pub png: Vec<u8>,
    /// Tesseract-style language hint, e.g. `fra+eng`.
    pub language: String,
}

/// Unified OCR result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub provider_name: String,
    pub processing_time_ms: u64,
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR sidecar request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError>;
}

/// Known provider identifiers used for startup selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    Tesseract,
    Sidecar,
}

impl OcrProviderKind {
    /// Parse a config string into a provider kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Some(Self::Tesseract),
            "sidecar" => Some(Self::Sidecar),
            _ => None,
        }
    }
}
