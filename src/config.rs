//! Service configuration.
//!
//! Built once at startup from the environment (after `.env` is loaded) and
//! handed to the router. The recipe parser itself takes no configuration.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::ocr::OcrProviderKind;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_OCR_LANG: &str = "fra+eng";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Expected `x-internal-secret` header value. `None` disables the check.
    pub shared_secret: Option<String>,
    pub ocr: OcrSettings,
    pub fetch_timeout_secs: u64,
    /// Cap on image bytes, also used as the request body limit.
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub provider: OcrProviderKind,
    pub language: String,
    pub tesseract_bin: String,
    pub sidecar_url: Option<String>,
    /// Upper bound for one sidecar OCR call.
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = SocketAddr::from_str(&bind_addr)
            .with_context(|| format!("Invalid BIND_ADDR: {}", bind_addr))?;

        let provider = match get("OCR_PROVIDER") {
            Some(name) => OcrProviderKind::from_str(&name).with_context(|| {
                format!("Unknown OCR_PROVIDER: {} (expected tesseract or sidecar)", name)
            })?,
            None => OcrProviderKind::Tesseract,
        };

        let sidecar_url = get("OCR_SIDECAR_URL");
        if provider == OcrProviderKind::Sidecar && sidecar_url.is_none() {
            anyhow::bail!("OCR_SIDECAR_URL must be set when OCR_PROVIDER=sidecar");
        }

        let ocr = OcrSettings {
            provider,
            language: get("OCR_LANG").unwrap_or_else(|| DEFAULT_OCR_LANG.to_string()),
            tesseract_bin: get("TESSERACT_BIN").unwrap_or_else(|| "tesseract".to_string()),
            sidecar_url,
            timeout_secs: parse_or(
                get("OCR_TIMEOUT_SECS"),
                "OCR_TIMEOUT_SECS",
                DEFAULT_OCR_TIMEOUT_SECS,
            )?,
        };

        let fetch_timeout_secs = parse_or(
            get("FETCH_TIMEOUT_SECS"),
            "FETCH_TIMEOUT_SECS",
            DEFAULT_FETCH_TIMEOUT_SECS,
        )?;
        let max_image_bytes = parse_or(
            get("MAX_IMAGE_BYTES"),
            "MAX_IMAGE_BYTES",
            DEFAULT_MAX_IMAGE_BYTES,
        )?;

        Ok(Self {
            bind_addr,
            shared_secret: get("RECIPE_API_SECRET"),
            ocr,
            fetch_timeout_secs,
            max_image_bytes,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {}", key, v)),
        None => Ok(default),
    }
}
