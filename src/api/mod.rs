mod error;
mod rest;
mod types;

pub use error::{ApiError, ApiResult, Owner};
pub use rest::{AppState, RestApi};
pub use types::*;

use crate::metrics::metrics_route;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the complete API router: REST routes, a metrics endpoint, request
/// tracing, and a permissive CORS layer for browser-based device agents.
pub fn create_api_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(RestApi::new(state).router())
        .route("/metrics", metrics_route())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayManager;
    use crate::chunk::{ChunkStore, ChunkStoreConfig};
    use crate::db;
    use crate::device::{DeviceRegistry, HeartbeatMonitor};
    use crate::heal::{HealingCoordinator, ReconstructionEngine};
    use crate::physical::{ChunkTransform, MemoryDeviceStore, PassthroughTransform};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_api_server_creation() {
        let pool = db::connect_in_memory().await.unwrap();
        let monitor = HeartbeatMonitor::default();
        let device_store = Arc::new(MemoryDeviceStore::new());
        let transform: Arc<dyn ChunkTransform> = Arc::new(PassthroughTransform);

        let state = AppState {
            devices: Arc::new(DeviceRegistry::new(pool.clone(), monitor)),
            arrays: Arc::new(ArrayManager::new(pool.clone(), monitor)),
            chunks: Arc::new(ChunkStore::new(
                pool.clone(),
                device_store.clone(),
                transform.clone(),
                monitor,
                ChunkStoreConfig::default(),
            )),
            healer: Arc::new(HealingCoordinator::new(pool.clone(), monitor)),
            reconstructor: Arc::new(ReconstructionEngine::new(
                pool, device_store, transform, monitor,
            )),
        };

        let _app = create_api_server(state);
    }
}
