//! HTTP surface for the listing-submission pipeline.
//!
//! One inbound endpoint accepts the listing payload, validates it
//! before any browser session exists, and hands the normalized listing
//! to the pipeline. A companion read-only endpoint serves static
//! capability metadata.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use redbridge_core::{
    ListingSubmission, ListingSubmitter, SubmissionOutcome, SubmissionStatus,
};

pub struct AppState {
    pub submitter: Arc<dyn ListingSubmitter>,
    pub production: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/listings", post(submit_listing_handler))
        .route("/api/listings/capabilities", get(capabilities_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "redbridge server listening");
    axum::serve(listener, router(state)).await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionData {
    local_id: Uuid,
    /// The portal returns no identifier of its own; always null.
    redremax_id: Option<String>,
    status: SubmissionStatus,
    formatted_data: serde_json::Value,
    automation_result: SubmissionOutcome,
}

fn status_message(status: SubmissionStatus) -> &'static str {
    match status {
        SubmissionStatus::Completed => "listing created in the back-office portal",
        SubmissionStatus::LoginFailed => "portal login failed",
        SubmissionStatus::NavigationFailed => "could not reach the listing form",
        SubmissionStatus::FormFillFailed => "listing form could not be completed",
    }
}

async fn submit_listing_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    // Decoding by hand keeps shape errors on the same 400 contract as
    // range errors.
    let submission: ListingSubmission = match serde_json::from_value(body) {
        Ok(submission) => submission,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "errors": [format!("invalid payload: {err}")],
                })),
            )
                .into_response();
        }
    };

    if let Err(errors) = submission.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "errors": errors })),
        )
            .into_response();
    }

    let normalized = submission.normalize();
    let formatted = serde_json::to_value(&normalized).unwrap_or_default();
    let outcome = state.submitter.submit(normalized).await;

    let success = outcome.status.is_completed();
    let mut message = status_message(outcome.status).to_string();
    if !success && !state.production {
        if let Some(failed) = outcome.stages.iter().find(|stage| !stage.succeeded) {
            message = format!("{message}: {}", failed.message);
        }
    }

    let data = SubmissionData {
        local_id: outcome.correlation_id,
        redremax_id: None,
        status: outcome.status,
        formatted_data: formatted,
        automation_result: outcome,
    };
    (
        StatusCode::OK,
        Json(json!({ "success": success, "message": message, "data": data })),
    )
        .into_response()
}

/// Static capability metadata; documentation only, no side effects.
async fn capabilities_handler() -> impl IntoResponse {
    Json(json!({
        "service": "redbridge",
        "target": "redremax back-office portal",
        "operations": ["Venta", "Alquiler", "Alquiler temporario"],
        "property_types": [
            "Departamento Estándar",
            "Casa",
            "PH",
            "Terreno y Lote",
            "Oficina",
            "Local Comercial",
            "Cochera"
        ],
        "required_fields": [
            "operation_type", "property_type", "title", "description",
            "address", "latitude", "longitude", "street", "street_number",
            "locality", "province", "country", "covered_surface",
            "price", "price_currency"
        ],
        "limits": {
            "latitude": [-90, 90],
            "longitude": [-180, 180],
            "covered_surface": "> 0",
            "price": "> 0",
            "dropdown_option_scan": 20
        },
        "notes": "completion reflects the pipeline's own stage history; the portal emits no confirmation"
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use redbridge_core::{NormalizedListing, StageResult, StageId};

    use super::*;

    struct FakeSubmitter {
        calls: AtomicUsize,
        status: SubmissionStatus,
    }

    impl FakeSubmitter {
        fn new(status: SubmissionStatus) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status,
            }
        }
    }

    #[async_trait]
    impl ListingSubmitter for FakeSubmitter {
        async fn submit(&self, _listing: NormalizedListing) -> SubmissionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stages = match self.status {
                SubmissionStatus::Completed => vec![StageResult {
                    stage: StageId::Description,
                    succeeded: true,
                    message: "description completed".to_string(),
                    screenshot: None,
                }],
                _ => vec![StageResult {
                    stage: StageId::PropertyType,
                    succeeded: false,
                    message: "no rendered option matched".to_string(),
                    screenshot: None,
                }],
            };
            SubmissionOutcome {
                status: self.status,
                correlation_id: Uuid::new_v4(),
                stages,
            }
        }
    }

    fn app(status: SubmissionStatus) -> (Router, Arc<FakeSubmitter>) {
        let submitter = Arc::new(FakeSubmitter::new(status));
        let state = Arc::new(AppState {
            submitter: submitter.clone(),
            production: false,
        });
        (router(state), submitter)
    }

    fn valid_payload() -> serde_json::Value {
        json!({
            "operation_type": "sale",
            "property_type": "apartment",
            "title": "Departamento 3 ambientes",
            "description": "Luminoso, al frente.",
            "address": "Av. Santa Fe 1234, Palermo",
            "latitude": -34.59,
            "longitude": -58.39,
            "street": "Av. Santa Fe",
            "street_number": "1234",
            "locality": "Palermo",
            "province": "Buenos Aires",
            "postal_code": "C1425",
            "country": "Argentina",
            "covered_surface": 72.5,
            "price": 145000.0,
            "price_currency": "USD"
        })
    }

    async fn post_listing(
        app: Router,
        payload: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/listings")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn invalid_latitude_returns_400_without_touching_automation() {
        let (app, submitter) = app(SubmissionStatus::Completed);
        let mut payload = valid_payload();
        payload["latitude"] = json!(95.0);
        let (status, body) = post_listing(app, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        let errors = body["errors"].as_array().unwrap();
        assert!(errors.iter().any(|e| e.as_str().unwrap().contains("latitude")));
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_price_returns_400() {
        let (app, submitter) = app(SubmissionStatus::Completed);
        let mut payload = valid_payload();
        payload["price"] = json!(0.0);
        let (status, body) = post_listing(app, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors = body["errors"].as_array().unwrap();
        assert!(errors
            .iter()
            .any(|e| e.as_str().unwrap().contains("price must be greater than zero")));
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_field_returns_400() {
        let (app, submitter) = app(SubmissionStatus::Completed);
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("title");
        let (status, body) = post_listing(app, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_payload_reaches_the_pipeline_once() {
        let (app, submitter) = app(SubmissionStatus::Completed);
        let (status, body) = post_listing(app, valid_payload()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["redremaxId"], json!(null));
        assert_eq!(body["data"]["status"], json!("completed"));
        assert!(body["data"]["localId"].as_str().is_some());
        assert_eq!(
            body["data"]["formattedData"]["operation"],
            json!("Venta")
        );
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pipeline_failure_is_reported_with_stage_detail() {
        let (app, _submitter) = app(SubmissionStatus::FormFillFailed);
        let (status, body) = post_listing(app, valid_payload()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["data"]["status"], json!("form_fill_failed"));
        let message = body["message"].as_str().unwrap();
        assert!(message.contains("no rendered option matched"));
        let stages = body["data"]["automationResult"]["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0]["succeeded"], json!(false));
    }

    #[tokio::test]
    async fn capabilities_endpoint_is_static() {
        let (app, _submitter) = app(SubmissionStatus::Completed);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/listings/capabilities")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["operations"]
            .as_array()
            .unwrap()
            .contains(&json!("Venta")));
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let (app, _submitter) = app(SubmissionStatus::Completed);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
