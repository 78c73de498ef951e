use crate::api::error::{ApiError, ApiResult, Owner};
use crate::api::types::*;
use crate::array::{ArrayConfig, ArrayManager, ArrayStatus};
use crate::chunk::{ChunkStore, ChunkSummary, FileRecord, StoredChunkReceipt, UploadReport, VerifyReport};
use crate::device::{Device, DeviceRegistry};
use crate::heal::{HealingCoordinator, HealingOutcome, ReconstructionOutcome, ReconstructionEngine};
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub arrays: Arc<ArrayManager>,
    pub chunks: Arc<ChunkStore>,
    pub healer: Arc<HealingCoordinator>,
    pub reconstructor: Arc<ReconstructionEngine>,
}

pub struct RestApi {
    state: AppState,
}

impl RestApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            // Device fleet
            .route("/api/v1/devices", post(register_device))
            .route("/api/v1/devices", get(list_devices))
            .route("/api/v1/devices/:id/heartbeat", post(heartbeat))
            .route("/api/v1/devices/:id", delete(unregister_device))
            // Array configuration
            .route("/api/v1/array", post(configure_array))
            .route("/api/v1/array", get(array_status))
            .route("/api/v1/array", delete(delete_array_config))
            .route("/api/v1/array/heal", post(heal))
            .route("/api/v1/array/reconstruct/:file_id", post(reconstruct))
            .route("/api/v1/array/events", get(list_events))
            // Files
            .route("/api/v1/files", post(upload_file))
            .route("/api/v1/files/:id", get(get_file))
            .route("/api/v1/files/:id", delete(delete_file))
            .route("/api/v1/files/:id/chunks", get(list_file_chunks))
            // Chunk-level wire operations
            .route(
                "/api/v1/chunks/needing-reconstruction",
                get(list_needing_reconstruction),
            )
            .route("/api/v1/chunks/:chunk_id", delete(delete_chunk))
            .route(
                "/api/v1/chunks/:chunk_id/devices/:device_id",
                put(put_chunk),
            )
            .route(
                "/api/v1/chunks/:chunk_id/devices/:device_id",
                get(download_chunk),
            )
            .route(
                "/api/v1/chunks/:chunk_id/devices/:device_id",
                delete(delete_location),
            )
            .route(
                "/api/v1/chunks/:chunk_id/devices/:device_id/verify",
                post(verify_chunk),
            )
            .with_state(self.state.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

// ============== Device Fleet ==============

async fn register_device(
    State(state): State<AppState>,
    owner: Owner,
    Json(req): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<Device>)> {
    if req.name.is_empty() {
        return Err(ApiError::InvalidRequest("device name is required".to_string()));
    }

    let device = state
        .devices
        .register(
            &owner.0,
            &req.name,
            &req.kind,
            &req.platform,
            req.capacity_bytes,
            req.available_bytes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn list_devices(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<ListDevicesResponse>> {
    let devices = state.devices.list(&owner.0).await?;
    Ok(Json(ListDevicesResponse {
        count: devices.len(),
        devices,
    }))
}

async fn heartbeat(
    State(state): State<AppState>,
    owner: Owner,
    Path(device_id): Path<String>,
    body: Option<Json<HeartbeatRequest>>,
) -> ApiResult<Json<Device>> {
    let available_bytes = body.and_then(|Json(req)| req.available_bytes);
    let device = state
        .devices
        .heartbeat(&owner.0, &device_id, available_bytes)
        .await?;
    Ok(Json(device))
}

async fn unregister_device(
    State(state): State<AppState>,
    owner: Owner,
    Path(device_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    state.devices.unregister(&owner.0, &device_id).await?;
    Ok(Json(AckResponse {
        message: format!("device {device_id} unregistered"),
    }))
}

// ============== Array Configuration ==============

async fn configure_array(
    State(state): State<AppState>,
    owner: Owner,
    Json(req): Json<ConfigureArrayRequest>,
) -> ApiResult<(StatusCode, Json<ArrayConfig>)> {
    let config = state
        .arrays
        .configure(&owner.0, req.level, req.chunk_size, &req.device_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn array_status(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<ArrayStatus>> {
    Ok(Json(state.arrays.status(&owner.0).await?))
}

async fn delete_array_config(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<AckResponse>> {
    state.arrays.delete_config(&owner.0).await?;
    Ok(Json(AckResponse {
        message: "array configuration deactivated".to_string(),
    }))
}

async fn heal(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<HealingOutcome>> {
    Ok(Json(state.healer.heal(&owner.0, "api").await?))
}

async fn reconstruct(
    State(state): State<AppState>,
    owner: Owner,
    Path(file_id): Path<String>,
) -> ApiResult<Json<ReconstructionOutcome>> {
    Ok(Json(state.reconstructor.reconstruct(&owner.0, &file_id).await?))
}

async fn list_events(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<EventsResponse>> {
    let events = state.healer.list_events(&owner.0).await?;
    Ok(Json(EventsResponse {
        count: events.len(),
        events,
    }))
}

// ============== Files ==============

async fn upload_file(
    State(state): State<AppState>,
    owner: Owner,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadReport>)> {
    let mut name: Option<String> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read multipart field: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                if name.is_none() {
                    name = field.file_name().map(str::to_string);
                }
                data = Some(field.bytes().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("failed to read file data: {e}"))
                })?);
            }
            "name" => {
                name = Some(field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("failed to read name field: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::InvalidRequest("no file uploaded".to_string()))?;
    let name = name.ok_or_else(|| ApiError::InvalidRequest("no file name provided".to_string()))?;

    let report = state.chunks.upload_file(&owner.0, &name, data).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(file_id): Path<String>,
) -> ApiResult<Json<FileRecord>> {
    Ok(Json(state.chunks.file_owned(&owner.0, &file_id).await?))
}

async fn delete_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(file_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    state.chunks.delete_file(&owner.0, &file_id).await?;
    Ok(Json(AckResponse {
        message: format!("file {file_id} deleted"),
    }))
}

async fn list_file_chunks(
    State(state): State<AppState>,
    owner: Owner,
    Path(file_id): Path<String>,
) -> ApiResult<Json<ChunkListResponse>> {
    let chunks = state.chunks.list_for_file(&owner.0, &file_id).await?;
    Ok(Json(ChunkListResponse {
        count: chunks.len(),
        chunks,
    }))
}

// ============== Chunk-Level Wire Operations ==============

async fn put_chunk(
    State(state): State<AppState>,
    owner: Owner,
    Path((chunk_id, device_id)): Path<(String, String)>,
    Query(query): Query<PutChunkQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<StoredChunkReceipt>)> {
    let receipt = state
        .chunks
        .put_chunk(
            &owner.0,
            &chunk_id,
            &query.file_id,
            query.index,
            &device_id,
            body,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn download_chunk(
    State(state): State<AppState>,
    owner: Owner,
    Path((chunk_id, device_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (bytes, hash) = state.chunks.download(&owner.0, &chunk_id, &device_id).await?;
    // The trusted digest rides along so device agents can self-check.
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (HeaderName::from_static("x-chunk-hash"), hash),
        ],
        bytes,
    )
        .into_response())
}

async fn verify_chunk(
    State(state): State<AppState>,
    owner: Owner,
    Path((chunk_id, device_id)): Path<(String, String)>,
) -> ApiResult<Json<VerifyReport>> {
    Ok(Json(state.chunks.verify(&owner.0, &chunk_id, &device_id).await?))
}

async fn delete_location(
    State(state): State<AppState>,
    owner: Owner,
    Path((chunk_id, device_id)): Path<(String, String)>,
) -> ApiResult<Json<AckResponse>> {
    state
        .chunks
        .delete_location(&owner.0, &chunk_id, &device_id)
        .await?;
    Ok(Json(AckResponse {
        message: format!("removed copy of {chunk_id} from {device_id}"),
    }))
}

async fn delete_chunk(
    State(state): State<AppState>,
    owner: Owner,
    Path(chunk_id): Path<String>,
) -> ApiResult<Json<AckResponse>> {
    state.chunks.delete_chunk(&owner.0, &chunk_id).await?;
    Ok(Json(AckResponse {
        message: format!("chunk {chunk_id} deleted"),
    }))
}

async fn list_needing_reconstruction(
    State(state): State<AppState>,
    owner: Owner,
) -> ApiResult<Json<ChunkListResponse>> {
    let chunks: Vec<ChunkSummary> = state.chunks.list_needing_reconstruction(&owner.0).await?;
    Ok(Json(ChunkListResponse {
        count: chunks.len(),
        chunks,
    }))
}
