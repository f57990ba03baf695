//! Image acquisition: remote URL download or inline `data:` URI decoding,
//! followed by validation with the `image` crate.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::GenericImageView;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unsupported image reference: expected an http(s) URL or a data:image/...;base64 URI")]
    InvalidReference,

    #[error("Unable to download image: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Unable to download image (HTTP {0})")]
    Status(u16),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Where the image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef<'a> {
    Remote(&'a str),
    Inline { mime: &'a str, payload: &'a str },
}

impl<'a> ImageRef<'a> {
    /// Classify an `image_url` value from the request body.
    pub fn parse(reference: &'a str) -> Result<Self, FetchError> {
        let reference = reference.trim();

        if let Some(rest) = reference.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',').ok_or(FetchError::InvalidReference)?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or(FetchError::InvalidReference)?;
            if !mime.to_ascii_lowercase().starts_with("image/") {
                return Err(FetchError::InvalidReference);
            }
            return Ok(Self::Inline { mime, payload });
        }

        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Remote(reference));
        }

        Err(FetchError::InvalidReference)
    }
}

/// Fetches and normalizes images for OCR.
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }

    /// Resolve a reference to raw image bytes.
    pub async fn fetch(&self, image: &ImageRef<'_>) -> Result<Vec<u8>, FetchError> {
        let bytes = match image {
            ImageRef::Remote(url) => {
                debug!("Downloading image from {}", url);
                let mut resp = self.client.get(*url).send().await?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    warn!("Image download returned {}", status);
                    return Err(FetchError::Status(status.as_u16()));
                }

                if let Some(len) = resp.content_length() {
                    let size = usize::try_from(len).unwrap_or(usize::MAX);
                    if size > self.max_bytes {
                        warn!("Image download announces {} bytes, refusing", len);
                        return Err(FetchError::TooLarge {
                            size,
                            max: self.max_bytes,
                        });
                    }
                }

                // Content-Length may be absent or wrong, so count as we go.
                let mut bytes = Vec::new();
                while let Some(chunk) = resp.chunk().await? {
                    bytes.extend_from_slice(&chunk);
                    if bytes.len() > self.max_bytes {
                        return Err(FetchError::TooLarge {
                            size: bytes.len(),
                            max: self.max_bytes,
                        });
                    }
                }
                bytes
            }
            ImageRef::Inline { mime, payload } => {
                debug!("Decoding inline {} image ({} base64 chars)", mime, payload.len());
                decode_base64(payload)?
            }
        };

        if bytes.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        Ok(bytes)
    }
}

/// Decode base64, tolerating whitespace and line breaks inside the payload.
fn decode_base64(payload: &str) -> Result<Vec<u8>, FetchError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(BASE64.decode(compact)?)
}

/// Check the bytes really are an image and re-encode them as PNG.
pub fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    let img = image::load_from_memory(bytes)?;
    debug!("Decoded image {}x{}", img.width(), img.height());

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)?;
    Ok(png)
}

/// Minimal one-shot HTTP server: accepts a single connection, waits for the
/// request headers, writes `response` verbatim and closes.
#[cfg(test)]
pub(crate) async fn serve_once(response: Vec<u8>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        // The client may hang up early (e.g. oversized body); that is fine.
        let _ = socket.write_all(&response).await;
        let _ = socket.shutdown().await;
    });

    format!("http://{}/recipe.png", addr)
}

/// Build a raw HTTP/1.1 response with an explicit Content-Length.
#[cfg(test)]
pub(crate) fn http_response(status_line: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status_line,
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
