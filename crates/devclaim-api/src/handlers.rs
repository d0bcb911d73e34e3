//! API handlers.
//!
//! Extension handlers take the raw body and decode it themselves so that a
//! malformed request still gets the protocol's 200-with-error answer.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use devclaim_state::Binding;
use tracing::{debug, warn};

use crate::ApiState;
use crate::wire::{BindArgs, BindResponse, FilterArgs, FilterResponse};

/// Response wrapper for the inspection routes.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Scheduler extension ────────────────────────────────────────

/// POST /api/v1/scheduler/filter
pub async fn filter(State(state): State<ApiState>, body: Bytes) -> Json<FilterResponse> {
    let args: FilterArgs = match serde_json::from_slice(&body) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "undecodable filter request");
            return Json(FilterResponse::from_error(format!("invalid filter request: {e}")));
        }
    };
    debug!(
        workload = %args.workload.table_key(),
        hosts = args.candidate_hosts.as_ref().map(Vec::len),
        "filter request"
    );
    let outcome = state
        .allocator
        .filter(&args.workload, args.candidate_hosts)
        .await;
    Json(outcome.into())
}

/// POST /api/v1/scheduler/bind
pub async fn bind(State(state): State<ApiState>, body: Bytes) -> Json<BindResponse> {
    let args: BindArgs = match serde_json::from_slice(&body) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "undecodable bind request");
            return Json(BindResponse {
                error: format!("invalid bind request: {e}"),
            });
        }
    };
    let binding: Binding = args.into();
    let binder = state.binder.clone();
    let job = binding.clone();
    let result = match tokio::task::spawn_blocking(move || binder.bind(&job)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("bind task failed: {e}")),
    };
    match result {
        Ok(()) => Json(BindResponse::default()),
        Err(error) => {
            warn!(
                workload = %format!("{}/{}", binding.workload_namespace, binding.workload_name),
                host = %binding.target_host,
                %error,
                "bind failed"
            );
            Json(BindResponse { error })
        }
    }
}

// ── Inspection ─────────────────────────────────────────────────

/// GET /api/v1/claims
pub async fn list_claims(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_claims() {
        Ok(claims) => ApiResponse::ok(claims).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_devices() {
        Ok(devices) => ApiResponse::ok(devices).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_hosts() {
        Ok(hosts) => ApiResponse::ok(hosts).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use devclaim_scheduler::FilterConfig;
    use devclaim_state::{Claim, Device, DevicePhase, Host, ObjectStore, StateStore, Workload};

    fn test_state() -> (StateStore, ApiState) {
        let store = StateStore::open_in_memory().unwrap();
        let state = ApiState::new(Arc::new(store.clone()), FilterConfig::default());
        (store, state)
    }

    #[tokio::test]
    async fn filter_rejects_garbage_with_error_field() {
        let (_store, state) = test_state();
        let Json(resp) = filter(State(state), Bytes::from_static(b"{not json")).await;
        assert!(resp.error.starts_with("invalid filter request"));
        assert!(resp.feasible_hosts.is_empty());
    }

    #[tokio::test]
    async fn filter_without_hosts_is_empty() {
        let (_store, state) = test_state();
        let body = serde_json::to_vec(&serde_json::json!({
            "workload": {"name": "w", "namespace": "ml", "claimNames": ["c1"]}
        }))
        .unwrap();
        let Json(resp) = filter(State(state), Bytes::from(body)).await;
        assert_eq!(resp, FilterResponse::default());
    }

    #[tokio::test]
    async fn filter_then_bind() {
        let (store, state) = test_state();
        store
            .put_device(&Device::new("d1", "gpu").with_attribute("type", "k80"))
            .unwrap();
        let mut c = Claim::new("ml", "c1");
        c.device_class = "gpu".into();
        c.desired_count = 1;
        store.put_claim(&c).unwrap();
        let wl = Workload::new("ml", "train", "uid-1").with_claim("c1");
        store.put_workload(&wl).unwrap();

        let args = FilterArgs {
            workload: wl,
            candidate_hosts: Some(vec![Host::new("h1", &["d1"])]),
        };
        let Json(resp) = filter(
            State(state.clone()),
            Bytes::from(serde_json::to_vec(&args).unwrap()),
        )
        .await;
        assert_eq!(resp.error, "");
        assert_eq!(resp.feasible_hosts.len(), 1);

        let body = br#"{"workloadName":"train","workloadNamespace":"ml","workloadUID":"uid-1","targetHost":"h1"}"#;
        let Json(resp) = bind(State(state), Bytes::from_static(body)).await;
        assert_eq!(resp.error, "");
        assert_eq!(
            store.get_device("d1").unwrap().unwrap().phase,
            DevicePhase::Bound
        );
    }

    #[tokio::test]
    async fn bind_unknown_workload_reports_error() {
        let (_store, state) = test_state();
        let body = br#"{"workloadName":"ghost","workloadNamespace":"ml","workloadUID":"u","targetHost":"h1"}"#;
        let Json(resp) = bind(State(state), Bytes::from_static(body)).await;
        assert!(resp.error.contains("ml/ghost"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bind_uid_mismatch_reported_from_worker_runtime() {
        let (store, state) = test_state();
        store
            .put_workload(&Workload::new("ml", "train", "uid-1"))
            .unwrap();
        let body = br#"{"workloadName":"train","workloadNamespace":"ml","workloadUID":"uid-2","targetHost":"h1"}"#;
        let Json(resp) = bind(State(state), Bytes::from_static(body)).await;
        assert!(resp.error.contains("uid uid-1"), "error: {}", resp.error);
        assert!(store.get_workload("ml", "train").unwrap().unwrap().host.is_empty());
    }

    #[tokio::test]
    async fn list_routes_ok() {
        let (_store, state) = test_state();
        let resp = list_claims(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = list_devices(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = list_hosts(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
