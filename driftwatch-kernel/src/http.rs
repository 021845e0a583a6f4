/**
 * API REST DRIFTWATCH - Surface HTTP du kernel
 *
 * RÔLE :
 * Recevoir les heartbeats des instances et exposer l'état réconcilié.
 *
 * FONCTIONNEMENT :
 * - POST /heartbeat : payload JSON -> moteur de réconciliation
 * - GET /instances, /instances/{key}, /instances/{key}/drift-events : lecture
 * - GET /health (ouvert), /system/health (compteurs du kernel)
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - DRIFTWATCH_API_KEY non défini = accès refusé
 */

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::ReconciliationEngine;
use crate::error::KernelError;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{DriftEvent, HeartbeatPayload, InstanceKey, ServiceInstance};
use crate::validation::validate;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub health_tracker: HealthTracker,
}

type ApiError = (StatusCode, Json<Value>);

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("DRIFTWATCH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("DRIFTWATCH_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/heartbeat", post(post_heartbeat))
        .route("/instances", get(get_instances))
        .route("/instances/{key}", get(get_instance))
        .route("/instances/{key}/drift-events", get(get_drift_events))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

pub fn error_response(err: KernelError) -> ApiError {
    let status = match &err {
        KernelError::Validation(_) => StatusCode::BAD_REQUEST,
        KernelError::Configuration { .. } => StatusCode::SERVICE_UNAVAILABLE,
        KernelError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "heartbeat processing failed");
    }
    (status, Json(json!({ "ok": false, "error": err.to_string() })))
}

/// Corps vide = payload absent ; JSON invalide = rejet client
pub fn parse_heartbeat(body: &[u8]) -> Result<HeartbeatPayload, KernelError> {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let payload = serde_json::from_slice::<HeartbeatPayload>(body)
            .map_err(|e| KernelError::validation(format!("malformed JSON: {e}")))?;
        Some(payload)
    };
    validate(parsed.as_ref())?;
    Ok(parsed.unwrap_or_default())
}

// POST /heartbeat
async fn post_heartbeat(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<ServiceInstance>, ApiError> {
    let payload = match parse_heartbeat(&body) {
        Ok(payload) => payload,
        Err(e) => {
            app.health_tracker.record_rejected();
            return Err(error_response(e));
        }
    };

    app.engine
        .process_heartbeat(&payload)
        .await
        .map(Json)
        .map_err(error_response)
}

// GET /instances
async fn get_instances(
    State(app): State<AppState>,
) -> Result<Json<Vec<ServiceInstance>>, ApiError> {
    app.engine.instances().await.map(Json).map_err(error_response)
}

// GET /instances/{key}
async fn get_instance(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceInstance>, ApiError> {
    match app.engine.instance(&InstanceKey::from(key)).await {
        Ok(Some(instance)) => Ok(Json(instance)),
        Ok(None) => Err((StatusCode::NOT_FOUND, Json(json!({ "ok": false, "error": "unknown instance" })))),
        Err(e) => Err(error_response(e)),
    }
}

// GET /instances/{key}/drift-events
async fn get_drift_events(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<DriftEvent>>, ApiError> {
    let Some(instance) = app
        .engine
        .instance(&InstanceKey::from(key))
        .await
        .map_err(error_response)?
    else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "ok": false, "error": "unknown instance" }))));
    };
    app.engine
        .drift_events(&instance.service_name, &instance.instance_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let tracked = app.engine.instances().await.map(|l| l.len()).unwrap_or(0);
    Json(app.health_tracker.get_health(tracked, app.engine.backoff_entries()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;

    #[test]
    fn test_parse_heartbeat() {
        assert!(matches!(parse_heartbeat(b"  "), Err(KernelError::Validation(_))));
        assert!(matches!(parse_heartbeat(b"{not json"), Err(KernelError::Validation(_))));
        assert!(matches!(
            parse_heartbeat(br#"{"serviceName":"","instanceId":"i1"}"#),
            Err(KernelError::Validation(_))
        ));

        let payload = parse_heartbeat(br#"{"serviceName":"orders","instanceId":"i1"}"#).unwrap();
        assert_eq!(payload.key().as_str(), "orders:i1");
        assert!(payload.config_hash.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, _) = error_response(KernelError::validation("blank serviceName"));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = error_response(KernelError::Configuration {
            service: "orders".into(),
            environment: "prod".into(),
            source: PortError::Unavailable("down".into()),
        });
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) =
            error_response(KernelError::Persistence(PortError::Backend("disk full".into())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.0["ok"], json!(false));
    }
}
