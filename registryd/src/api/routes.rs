use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::protocol::{
    LAST_ACTIVITY_PATH, SERVICES_ADDRESS_PATH, SERVICES_HASH_PATH, SERVICES_PATH,
    SERVICE_ACTIVITY_PATH, SERVICE_BY_ID_PATH, SERVICE_PATH, SERVICE_START_PATH, SERVICE_STOP_PATH,
};
use shared::types::{ActivityRecord, ServiceIdentity, ServiceInfo, ServiceRecord};
use crate::error::RegistryError;
use crate::registry::Registry;
use crate::store::ServiceKey;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
}

#[derive(Deserialize)]
pub struct AddressQuery {
    pub name: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::DuplicateIdentity(_)
            | RegistryError::InvalidVersionTag(_)
            | RegistryError::IdentityMismatch { .. }
            | RegistryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RegistryError::StorageUnavailable(_) => {
                tracing::error!("Registry storage failure: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Undecodable request bodies are reported like any other bad input
impl From<JsonRejection> for RegistryError {
    fn from(rejection: JsonRejection) -> Self {
        RegistryError::InvalidInput(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, RegistryError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(SERVICES_PATH, get(list_services).post(register_service))
        .route(SERVICES_HASH_PATH, get(get_hash))
        .route(SERVICES_ADDRESS_PATH, get(get_address))
        .route(LAST_ACTIVITY_PATH, get(list_activity))
        .route(
            SERVICE_BY_ID_PATH,
            get(get_service_by_id)
                .put(update_service_by_id)
                .delete(delete_service_by_id),
        )
        .route(
            SERVICE_PATH,
            get(get_service).put(update_service).delete(delete_service),
        )
        .route(SERVICE_START_PATH, post(start_service))
        .route(SERVICE_STOP_PATH, post(stop_service))
        .route(SERVICE_ACTIVITY_PATH, post(record_activity))
        .with_state(state)
}

async fn register_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceInfo>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ServiceRecord>)> {
    let Json(info) = payload?;
    let record = state.registry.register(info).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceRecord>>> {
    state.registry.list().await.map(Json)
}

async fn get_hash(State(state): State<AppState>) -> ApiResult<String> {
    state.registry.digest().await
}

async fn get_address(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<Json<String>> {
    let identity = ServiceIdentity::new(query.name, query.version);
    state.registry.resolve_address(&identity).await.map(Json)
}

async fn list_activity(State(state): State<AppState>) -> ApiResult<Json<Vec<ActivityRecord>>> {
    state.registry.list_activity().await.map(Json)
}

async fn get_service_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ServiceRecord>> {
    state.registry.get_by_id(id).await.map(Json)
}

async fn update_service_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<ServiceInfo>, JsonRejection>,
) -> ApiResult<Json<ServiceRecord>> {
    let Json(info) = payload?;
    state.registry.update(ServiceKey::Id(id), info).await.map(Json)
}

async fn delete_service_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.registry.delete(ServiceKey::Id(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_service(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<ServiceRecord>> {
    let identity = ServiceIdentity::new(name, version);
    state.registry.get(&identity).await.map(Json)
}

async fn update_service(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
    payload: Result<Json<ServiceInfo>, JsonRejection>,
) -> ApiResult<Json<ServiceRecord>> {
    let Json(info) = payload?;
    let key = ServiceKey::Identity(ServiceIdentity::new(name, version));
    state.registry.update(key, info).await.map(Json)
}

async fn delete_service(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let key = ServiceKey::Identity(ServiceIdentity::new(name, version));
    state.registry.delete(key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_service(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<ServiceRecord>> {
    let identity = ServiceIdentity::new(name, version);
    state.registry.start(&identity).await.map(Json)
}

async fn stop_service(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<ServiceRecord>> {
    let identity = ServiceIdentity::new(name, version);
    state.registry.stop(&identity).await.map(Json)
}

async fn record_activity(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<ActivityRecord>> {
    let identity = ServiceIdentity::new(name, version);
    state.registry.record_activity(&identity).await.map(Json)
}
