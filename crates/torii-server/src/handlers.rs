use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use torii_core::{Issue, WireFormat, operation_outcome};

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Torii FHIR Gateway",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ready" }))
}

/// Preprocesses a bundle and merges the validation engine's report with
/// the locally generated issues, local issues first. Always answers 200
/// with an OperationOutcome; the only exception is an unsupported
/// Content-Type. The inbound Content-Type travels to the engine verbatim.
pub async fn validate(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let Some(format) = WireFormat::from_content_type(content_type) else {
        return unsupported_media_type(content_type);
    };

    tracing::debug!(format = %format, bytes = body.len(), "preprocessing bundle");
    let processed = state.pipeline.preprocess(&body, format);

    let mut issues: Vec<Value> = processed.issues.iter().map(Issue::to_json).collect();
    if processed.should_validate {
        match state.validator.validate(processed.body, content_type).await {
            Ok(engine_issues) => issues.extend(engine_issues),
            Err(error) => {
                tracing::warn!(error = %error, "validation engine call failed");
                issues.push(error.to_issue(&state.issues).to_json());
            }
        }
    } else {
        tracing::debug!("skipping downstream validation");
    }

    (StatusCode::OK, Json(operation_outcome(issues))).into_response()
}

fn unsupported_media_type(content_type: &str) -> Response {
    let outcome = operation_outcome(vec![json!({
        "severity": "error",
        "code": "invalid",
        "diagnostics": format!(
            "Content-Type '{content_type}' is not supported; use application/fhir+json, \
             application/json, application/fhir+xml or application/xml"
        ),
    })]);
    (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(outcome)).into_response()
}
