//! REST API handlers.
//!
//! Each handler delegates to the orchestrator and maps its error
//! taxonomy onto HTTP statuses: caller mistakes are 4xx, a rolled-back
//! pipeline failure is 502 (safe to retry), exhaustion and unreachable
//! dependencies are 503, and an incomplete rollback — the one state
//! needing operator attention — is 500.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::error;

use wikiforge_orchestrator::{OrchestratorError, ProvisionRequest};

use crate::ApiState;

/// Response wrapper for consistent API format.
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

fn error_response(err: &OrchestratorError) -> impl IntoResponse {
    (
        status_for(err),
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }),
    )
}

/// Map orchestrator errors onto HTTP statuses.
fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::PortsExhausted => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::StepFailed { .. } | OrchestratorError::DeadlineExceeded => {
            StatusCode::BAD_GATEWAY
        }
        OrchestratorError::RollbackIncomplete { .. } | OrchestratorError::State(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Provision request body.
#[derive(Deserialize)]
pub struct ProvisionBody {
    pub tenant_name: String,
    pub slug: String,
}

/// List query parameters.
#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// POST /api/v1/instances
pub async fn provision_instance(
    State(state): State<ApiState>,
    Json(body): Json<ProvisionBody>,
) -> impl IntoResponse {
    let request = ProvisionRequest {
        tenant_name: body.tenant_name,
        slug: body.slug,
    };
    match state.orchestrator.provision(request).await {
        Ok(instance) => (StatusCode::CREATED, ApiResponse::ok(instance)).into_response(),
        Err(e) => {
            error!(error = %e, "provisioning request failed");
            error_response(&e).into_response()
        }
    }
}

/// DELETE /api/v1/instances/{id}
pub async fn teardown_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.teardown(&id).await {
        Ok(instance) => ApiResponse::ok(instance).into_response(),
        Err(e) => {
            error!(%id, error = %e, "teardown request failed");
            error_response(&e).into_response()
        }
    }
}

/// GET /api/v1/instances/{id}
pub async fn get_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get(&id) {
        Ok(instance) => ApiResponse::ok(instance).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /api/v1/instances
pub async fn list_instances(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.orchestrator.list(params.offset, params.limit) {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    use wikiforge_core::{
        AdapterError, AdapterResult, CertificateIssuer, ContainerRuntime, ContainerSpec,
        DatabaseProvisioner, ForgeConfig, ReverseProxy,
    };
    use wikiforge_orchestrator::{Orchestrator, PortAllocator, Step};
    use wikiforge_state::InstanceRegistry;

    /// Adapters that always succeed — the API tests only exercise the
    /// HTTP mapping, not the pipeline itself.
    struct NoopWorld;

    #[async_trait]
    impl ContainerRuntime for NoopWorld {
        async fn ensure_network(&self) -> AdapterResult<()> {
            Ok(())
        }
        async fn start(&self, _spec: &ContainerSpec) -> AdapterResult<()> {
            Ok(())
        }
        async fn stop_and_remove(&self, _name: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn exists(&self, _name: &str) -> AdapterResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl DatabaseProvisioner for NoopWorld {
        async fn create_database(&self, _name: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn drop_database(&self, _name: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn database_exists(&self, _name: &str) -> AdapterResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl ReverseProxy for NoopWorld {
        async fn activate(&self, _domain: &str, _port: u16) -> AdapterResult<()> {
            Ok(())
        }
        async fn deactivate(&self, _domain: &str, _port: u16) -> AdapterResult<()> {
            Ok(())
        }
        async fn route_exists(&self, _domain: &str, _port: u16) -> AdapterResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl CertificateIssuer for NoopWorld {
        async fn issue(&self, _domain: &str) -> AdapterResult<()> {
            Ok(())
        }
        async fn revoke(&self, _domain: &str) -> AdapterResult<()> {
            Ok(())
        }
    }

    fn test_router() -> axum::Router {
        let mut config = ForgeConfig::default();
        config.ports.start = 8001;
        config.ports.end = 8010;

        let world = Arc::new(NoopWorld);
        let registry = InstanceRegistry::open_in_memory().unwrap();
        let ports = PortAllocator::with_probe(config.ports.start, config.ports.end, |_| true);
        let orchestrator = Orchestrator::new(
            config,
            registry,
            ports,
            world.clone(),
            world.clone(),
            world.clone(),
            world,
        )
        .unwrap();
        crate::build_router(Arc::new(orchestrator))
    }

    fn provision_request(slug: &str) -> Request<Body> {
        let body = serde_json::json!({ "tenant_name": "acme", "slug": slug });
        Request::builder()
            .method("POST")
            .uri("/api/v1/instances")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn provision_returns_created() {
        let router = test_router();
        let response = router.oneshot(provision_request("acme-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn invalid_slug_is_bad_request() {
        let router = test_router();
        let response = router
            .oneshot(provision_request("Not A Slug"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_slug_is_conflict() {
        let router = test_router();
        router
            .clone()
            .oneshot(provision_request("acme-1"))
            .await
            .unwrap();

        let response = router.oneshot(provision_request("acme-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::get("/api/v1/instances/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_responds_ok() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::get("/api/v1/instances?offset=0&limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn teardown_of_missing_instance_is_not_found() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::delete("/api/v1/instances/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn status_mapping_covers_pipeline_failures() {
        assert_eq!(
            status_for(&OrchestratorError::PortsExhausted),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&OrchestratorError::StepFailed {
                step: Step::ProxyRoute,
                source: AdapterError::ConfigInvalid("bad render".to_string()),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&OrchestratorError::DeadlineExceeded),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&OrchestratorError::RollbackIncomplete {
                trigger: "certificate".to_string(),
                residuals: vec!["database: postgres down".to_string()],
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
