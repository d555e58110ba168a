use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use visit_ledger_api::{
    AppendRecordRequest, AppendRecordResult, HistoryResult, InvokeRequest, MigrateResult,
    RegisterSubjectRequest, VisitLedgerApi, API_CONTRACT_VERSION,
};
use visit_ledger_core::{CommandOutput, LedgerError, Subject};
use visit_ledger_store_sqlite::{IntegrityReport, SchemaStatus};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: VisitLedgerApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    kind: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct AppendRecordBody {
    payload: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "visit-ledger-service")]
#[command(about = "Local HTTP service for the visit ledger")]
struct Args {
    #[arg(long, default_value = "./visit_ledger.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let (status, kind) = match err.downcast_ref::<LedgerError>() {
            Some(ledger_err) => (status_for(ledger_err), ledger_err.kind()),
            None => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        };
        if status.is_server_error() {
            tracing::error!(kind, error = %format!("{err:#}"), "request failed");
        } else {
            tracing::debug!(kind, error = %format!("{err:#}"), "request rejected");
        }
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            kind,
            error: format!("{err:#}"),
        }
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        LedgerError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::SubjectAlreadyExists(_) => StatusCode::CONFLICT,
        LedgerError::RecordNotFound(_) | LedgerError::CorruptSubject { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

/// Run a ledger call on the blocking pool; `SQLite` waits on its busy
/// timeout while another writer holds the lock.
async fn with_api<T, F>(state: ServiceState, op: F) -> ServiceResult<T>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&VisitLedgerApi) -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(&state.api)).await {
        Ok(result) => Ok(Json(envelope(result?))),
        Err(err) => Err(anyhow::Error::new(err).context("ledger task did not complete").into()),
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/db/integrity-check", post(db_integrity_check))
        .route("/v1/subjects", post(subject_register))
        .route("/v1/subjects/:subject_id", get(subject_show))
        .route("/v1/subjects/:subject_id/records", post(record_append))
        .route("/v1/subjects/:subject_id/history", get(subject_history))
        .route("/v1/invoke", post(invoke))
        .with_state(state)
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(false)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let state = ServiceState { api: VisitLedgerApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "visit ledger service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> ServiceResult<SchemaStatus> {
    with_api(state, VisitLedgerApi::schema_status).await
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    with_api(state, move |api| api.migrate(request.dry_run)).await
}

async fn db_integrity_check(State(state): State<ServiceState>) -> ServiceResult<IntegrityReport> {
    with_api(state, VisitLedgerApi::integrity_check).await
}

async fn subject_register(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterSubjectRequest>,
) -> ServiceResult<Subject> {
    with_api(state, move |api| api.register_subject(request)).await
}

async fn subject_show(
    State(state): State<ServiceState>,
    Path(subject_id): Path<String>,
) -> ServiceResult<Subject> {
    with_api(state, move |api| api.show_subject(&subject_id)).await
}

async fn record_append(
    State(state): State<ServiceState>,
    Path(subject_id): Path<String>,
    Json(body): Json<AppendRecordBody>,
) -> ServiceResult<AppendRecordResult> {
    with_api(state, move |api| {
        api.append_record(AppendRecordRequest { subject_id, payload: body.payload })
    })
    .await
}

async fn subject_history(
    State(state): State<ServiceState>,
    Path(subject_id): Path<String>,
) -> ServiceResult<HistoryResult> {
    with_api(state, move |api| api.history(&subject_id)).await
}

async fn invoke(
    State(state): State<ServiceState>,
    Json(request): Json<InvokeRequest>,
) -> ServiceResult<CommandOutput> {
    with_api(state, move |api| api.invoke(&request)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use time::macros::datetime;
    use tower::ServiceExt;
    use visit_ledger_core::FixedClock;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("visitledger-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn fixed_router(db_path: PathBuf) -> Router {
        let clock = Arc::new(FixedClock(datetime!(2026-10-16 09:30 UTC)));
        app(ServiceState { api: VisitLedgerApi::with_clock(db_path, clock) })
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_body(response: Response) -> String {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response_body(response).await;
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = fixed_router(unique_temp_db_path());

        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = fixed_router(unique_temp_db_path());

        let response = send(&router, "GET", "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/subjects/{subject_id}/history"));
        assert!(body.contains("/v1/invoke"));
    }

    #[tokio::test]
    async fn register_append_and_history_flow_round_trip() {
        let db_path = unique_temp_db_path();
        let router = fixed_router(db_path.clone());

        let registered = send(
            &router,
            "POST",
            "/v1/subjects",
            Some(serde_json::json!({ "subject_id": "p1", "profile": { "name": "Li Lei" } })),
        )
        .await;
        assert_eq!(registered.status(), StatusCode::OK);
        let registered = response_json(registered).await;
        assert_eq!(registered["data"]["id"], "p1");
        assert_eq!(registered["api_contract_version"], API_CONTRACT_VERSION);

        let appended = send(
            &router,
            "POST",
            "/v1/subjects/p1/records",
            Some(serde_json::json!({ "payload": "flu, mild" })),
        )
        .await;
        assert_eq!(appended.status(), StatusCode::OK);
        let appended = response_json(appended).await;
        assert_eq!(appended["data"]["record_key"], "p1202610160930");
        assert_eq!(appended["data"]["record_count"], 1);

        let history = send(&router, "GET", "/v1/subjects/p1/history", None).await;
        assert_eq!(history.status(), StatusCode::OK);
        let history = response_json(history).await;
        assert_eq!(history["data"]["report"], "202610160930: flu, mild");
        assert_eq!(history["data"]["entries"][0]["payload"], "flu, mild");

        let shown = send(&router, "GET", "/v1/subjects/p1", None).await;
        assert_eq!(shown.status(), StatusCode::OK);
        let shown = response_json(shown).await;
        assert_eq!(shown["data"]["record_keys"], serde_json::json!(["p1202610160930"]));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn ledger_errors_map_to_http_statuses() {
        let db_path = unique_temp_db_path();
        let router = fixed_router(db_path.clone());

        let missing = send(&router, "GET", "/v1/subjects/ghost/history", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let missing = response_json(missing).await;
        assert_eq!(missing["kind"], "subject_not_found");
        assert_eq!(missing["error"], "subject not found: ghost");

        let register = serde_json::json!({ "subject_id": "p1" });
        let first = send(&router, "POST", "/v1/subjects", Some(register.clone())).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = send(&router, "POST", "/v1/subjects", Some(register)).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let blank = send(
            &router,
            "POST",
            "/v1/subjects",
            Some(serde_json::json!({ "subject_id": "  " })),
        )
        .await;
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(blank).await["kind"], "invalid_argument");

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn invoke_endpoint_routes_raw_calls() {
        let db_path = unique_temp_db_path();
        let router = fixed_router(db_path.clone());

        for (function, args) in [
            ("registerSubject", serde_json::json!(["p1", "Li Lei, 32"])),
            ("appendRecord", serde_json::json!(["p1", "flu, mild"])),
        ] {
            let response = send(
                &router,
                "POST",
                "/v1/invoke",
                Some(serde_json::json!({ "function": function, "args": args })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let history = send(
            &router,
            "POST",
            "/v1/invoke",
            Some(serde_json::json!({ "function": "reconstructHistory", "args": ["p1"] })),
        )
        .await;
        let history = response_json(history).await;
        assert_eq!(history["data"]["command"], "history");
        assert_eq!(history["data"]["report"], "202610160930: flu, mild");

        let unknown = send(
            &router,
            "POST",
            "/v1/invoke",
            Some(serde_json::json!({ "function": "read", "args": ["p1"] })),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_all_listed() {
        const APPENDS: usize = 16;

        let db_path = unique_temp_db_path();
        let router = fixed_router(db_path.clone());
        let registered = send(
            &router,
            "POST",
            "/v1/subjects",
            Some(serde_json::json!({ "subject_id": "p1" })),
        )
        .await;
        assert_eq!(registered.status(), StatusCode::OK);

        let tasks: Vec<_> = (0..APPENDS)
            .map(|visit| {
                let router = router.clone();
                tokio::spawn(async move {
                    let body = serde_json::json!({ "payload": format!("visit {visit}") });
                    send(&router, "POST", "/v1/subjects/p1/records", Some(body)).await.status()
                })
            })
            .collect();
        for task in tasks {
            match task.await {
                Ok(status) => assert_eq!(status, StatusCode::OK),
                Err(err) => panic!("append task failed: {err}"),
            }
        }

        // Same-minute appends share one key, so it is listed once per append.
        let shown = response_json(send(&router, "GET", "/v1/subjects/p1", None).await).await;
        assert_eq!(shown["data"]["record_keys"], serde_json::Value::from(vec!["p1202610160930"; APPENDS]));

        let _ = std::fs::remove_file(&db_path);
    }
}
