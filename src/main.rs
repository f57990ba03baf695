//! Recipe OCR Import - turns a photo of a recipe into a structured recipe
//! and ingredient list.

mod config;
mod error;
mod image_source;
mod ocr;
mod recipe;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use config::{OcrSettings, ServiceConfig};
use error::ApiError;
use image_source::{ImageFetcher, ImageRef};
use ocr::{
    sidecar::SidecarProvider, tesseract::TesseractProvider, OcrInput, OcrProvider, OcrProviderKind,
};
use recipe::{Ingredient, Recipe};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SECRET_HEADER: &str = "x-internal-secret";
const NO_TEXT_MESSAGE: &str = "no readable text detected";
const NO_INGREDIENTS_MESSAGE: &str = "text detected but no reliable ingredient block found";

/// Application state shared across handlers. Immutable after startup.
#[derive(Clone)]
struct AppState {
    config: Arc<ServiceConfig>,
    fetcher: ImageFetcher,
    ocr: Arc<dyn OcrProvider>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "recipe_ocr_import=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let ocr = build_ocr_provider(&config.ocr)?;
    info!(
        "OCR provider: {} (lang={}), shared secret {}",
        ocr.name(),
        config.ocr.language,
        if config.shared_secret.is_some() { "enabled" } else { "disabled" }
    );

    let bind_addr = config.bind_addr;
    let state = AppState {
        fetcher: ImageFetcher::new(http, config.max_image_bytes),
        config: Arc::new(config),
        ocr,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_ocr_provider(settings: &OcrSettings) -> anyhow::Result<Arc<dyn OcrProvider>> {
    let provider: Arc<dyn OcrProvider> = match settings.provider {
        OcrProviderKind::Tesseract => {
            Arc::new(TesseractProvider::new(settings.tesseract_bin.clone()))
        }
        OcrProviderKind::Sidecar => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()
                .context("Failed to build OCR sidecar client")?;
            Arc::new(SidecarProvider::new(
                settings.sidecar_url.clone().unwrap_or_default(),
                client,
            ))
        }
    };
    Ok(provider)
}

fn create_router(state: AppState) -> Router {
    // base64 inflates inline images by a third
    let body_limit = state.config.max_image_bytes.saturating_mul(2);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/import-recipe-from-image", post(import_recipe_from_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    /// http(s) URL or `data:image/...;base64,...` URI.
    image_url: String,
    #[serde(default)]
    household_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImportResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipe: Option<Recipe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingredients: Option<Vec<Ingredient>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ImportResponse {
    fn imported(recipe: Recipe, ingredients: Vec<Ingredient>) -> Self {
        Self {
            ok: true,
            recipe: Some(recipe),
            ingredients: Some(ingredients),
            error: None,
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            ok: false,
            recipe: None,
            ingredients: None,
            error: Some(message.to_string()),
        }
    }
}

/// OCR an image and guess the recipe it shows.
async fn import_recipe_from_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ImagePayload>, JsonRejection>,
) -> Result<Json<ImportResponse>, ApiError> {
    if let Some(expected) = state.config.shared_secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("Rejected import: missing or wrong {} header", SECRET_HEADER);
            return Err(ApiError::Unauthorized);
        }
    }

    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("import", %request_id);
    run_import(&state, payload).instrument(span).await.map(Json)
}

async fn run_import(state: &AppState, payload: ImagePayload) -> Result<ImportResponse, ApiError> {
    info!(
        "Import requested (household: {})",
        payload.household_id.as_deref().unwrap_or("-")
    );

    // 1) Fetch the image
    let image_ref = ImageRef::parse(&payload.image_url)?;
    let bytes = state.fetcher.fetch(&image_ref).await?;

    let png = tokio::task::spawn_blocking(move || image_source::normalize_to_png(&bytes))
        .await
        .map_err(|e| ApiError::Internal(format!("image decoding task failed: {}", e)))??;

    // 2) OCR
    let input = OcrInput {
        png,
        language: state.config.ocr.language.clone(),
    };
    let output = state.ocr.recognize(&input).await.map_err(|e| {
        error!("OCR failed ({}): {}", state.ocr.name(), e);
        e
    })?;
    info!(
        "OCR produced {} chars in {} ms via {}",
        output.text.len(),
        output.processing_time_ms,
        output.provider_name
    );

    if output.text.trim().is_empty() {
        return Ok(ImportResponse::failed(NO_TEXT_MESSAGE));
    }

    // 3) Parse recipe + ingredients
    let parsed = recipe::parse_recipe_from_text(&output.text);
    if parsed.ingredients.is_empty() {
        info!("No ingredient block found in \"{}\"", parsed.recipe.name);
        return Ok(ImportResponse::failed(NO_INGREDIENTS_MESSAGE));
    }

    info!(
        "Imported \"{}\" with {} ingredients",
        parsed.recipe.name,
        parsed.ingredients.len()
    );
    Ok(ImportResponse::imported(parsed.recipe, parsed.ingredients))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrError, OcrOutput};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::io::Cursor;
    use tower::ServiceExt;

    /// Returns canned text, or fails when `text` is `None`.
    struct FakeOcr {
        text: Option<String>,
    }

    #[async_trait::async_trait]
    impl OcrProvider for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }

        async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
            assert!(input.png.starts_with(b"\x89PNG"));
            match &self.text {
                Some(text) => Ok(OcrOutput {
                    text: text.clone(),
                    provider_name: "fake".to_string(),
                    processing_time_ms: 0,
                }),
                None => Err(OcrError::OcrFailed("engine crashed".to_string())),
            }
        }
    }

    fn test_app(ocr_text: Option<&str>, secret: Option<&str>) -> Router {
        let secret = secret.map(str::to_string);
        let config = ServiceConfig::from_lookup(|key| match key {
            "RECIPE_API_SECRET" => secret.clone(),
            _ => None,
        })
        .unwrap();

        let state = AppState {
            fetcher: ImageFetcher::new(reqwest::Client::new(), config.max_image_bytes),
            config: Arc::new(config),
            ocr: Arc::new(FakeOcr {
                text: ocr_text.map(str::to_string),
            }),
        };
        create_router(state)
    }

    fn jpeg_data_uri() -> String {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Jpeg(90))
            .unwrap();
        format!("data:image/jpeg;base64,{}", BASE64.encode(buf))
    }

    fn import_request(image_url: &str, secret: Option<&str>) -> Request<Body> {
        let body = serde_json::json!({ "image_url": image_url, "household_id": "h-1" });
        let mut builder = Request::builder()
            .method("POST")
            .uri("/import-recipe-from-image")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    const TARTE: &str = "Tarte aux pommes\nIngrédients\n200g farine\n3 pommes\n\
                         Préparation\nÉplucher les pommes\n";

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, json) = send(
            test_app(None, None),
            Request::builder().uri("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let response = test_app(None, None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_import_success() {
        let app = test_app(Some(TARTE), None);
        let (status, json) = send(app, import_request(&jpeg_data_uri(), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["recipe"]["name"], "Tarte aux pommes");
        assert!(json["recipe"]["servings"].is_null());

        let ingredients = json["ingredients"].as_array().unwrap();
        assert_eq!(ingredients.len(), 2);
        assert_eq!(ingredients[0]["name"], "farine");
        assert_eq!(ingredients[0]["quantity"], 200.0);
        assert_eq!(ingredients[0]["unit"], "g");
        assert_eq!(ingredients[0]["category"], "principal");
        assert_eq!(ingredients[1]["name"], "pommes");
        assert!(ingredients[1]["unit"].is_null());
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_import_no_text() {
        let app = test_app(Some("  \n \u{0c}"), None);
        let (status, json) = send(app, import_request(&jpeg_data_uri(), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], NO_TEXT_MESSAGE);
        assert!(json.get("recipe").is_none());
    }

    #[tokio::test]
    async fn test_import_no_ingredients() {
        let app = test_app(Some("Gratin\nPréparation\nCuire 40 minutes"), None);
        let (status, json) = send(app, import_request(&jpeg_data_uri(), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], NO_INGREDIENTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_ocr_failure_is_500() {
        let app = test_app(None, None);
        let (status, json) = send(app, import_request(&jpeg_data_uri(), None)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["detail"].as_str().unwrap().contains("engine crashed"));
    }

    #[tokio::test]
    async fn test_secret_required_when_configured() {
        let (status, json) = send(
            test_app(Some(TARTE), Some("s3cret")),
            import_request(&jpeg_data_uri(), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["detail"], "Unauthorized");

        let (status, _) = send(
            test_app(Some(TARTE), Some("s3cret")),
            import_request(&jpeg_data_uri(), Some("wrong")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, json) = send(
            test_app(Some(TARTE), Some("s3cret")),
            import_request(&jpeg_data_uri(), Some("s3cret")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_secret_ignored_when_not_configured() {
        let (status, _) = send(
            test_app(Some(TARTE), None),
            import_request(&jpeg_data_uri(), Some("anything")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_inputs_are_400() {
        let garbage = format!("data:image/png;base64,{}", BASE64.encode(b"not an image"));
        for image_url in [
            "ftp://example.com/recipe.png",
            "data:image/png;base64,@@@",
            garbage.as_str(),
            // nothing listens on the discard port
            "http://127.0.0.1:9/recipe.png",
        ] {
            let (status, json) =
                send(test_app(Some(TARTE), None), import_request(image_url, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "for {}", image_url);
            assert!(json["detail"].is_string());
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let request = Request::builder()
            .method("POST")
            .uri("/import-recipe-from-image")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"household_id": "h-1"}"#))
            .unwrap();
        let (status, json) = send(test_app(Some(TARTE), None), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].is_string());
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_import_from_remote_url() {
        let response = image_source::http_response("200 OK", "image/png", &png_bytes());
        let url = image_source::serve_once(response).await;

        let (status, json) = send(test_app(Some(TARTE), None), import_request(&url, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["recipe"]["name"], "Tarte aux pommes");
        assert_eq!(json["ingredients"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_not_found_is_400() {
        let response = image_source::http_response("404 Not Found", "text/plain", b"gone");
        let url = image_source::serve_once(response).await;

        let (status, json) = send(test_app(Some(TARTE), None), import_request(&url, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Unable to download image (HTTP 404)");
    }

    #[test]
    fn test_build_ocr_provider() {
        let config = ServiceConfig::from_lookup(|key| match key {
            "OCR_PROVIDER" => Some("sidecar".to_string()),
            "OCR_SIDECAR_URL" => Some("http://127.0.0.1:3001".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(build_ocr_provider(&config.ocr).unwrap().name(), "sidecar");

        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(build_ocr_provider(&config.ocr).unwrap().name(), "tesseract");
    }
}
