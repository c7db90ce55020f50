/// Plugin server exposing a driver over HTTP/JSON
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::messages::{
    Empty, ErrorResponse, Operation, PluginInfo, SetClusterSizeRequest, SetVersionRequest,
    UpdateRequest, PROTOCOL_VERSION,
};
use crate::error::{EngineError, ErrorKind, Result};
use crate::plugin::AddressPublisher;
use crate::types::{
    ClusterInfo, Driver, DriverFlags, DriverOptions, KubernetesVersion, NodeCount,
};

/// Loopback with an OS-assigned port
pub const EPHEMERAL_LISTEN_ADDR: &str = "127.0.0.1:0";

struct ServerState {
    driver_name: String,
    driver: Arc<dyn Driver>,
}

/// Serves one driver behind the plugin wire protocol
#[derive(Clone)]
pub struct DriverServer {
    state: Arc<ServerState>,
}

impl DriverServer {
    pub fn new(driver_name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            state: Arc::new(ServerState {
                driver_name: driver_name.into(),
                driver,
            }),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.state.driver_name
    }

    /// Routes for every operation
    pub fn router(&self) -> Router {
        Router::new()
            .route(&Operation::Handshake.path(), get(handle_handshake))
            .route(&Operation::CreateOptions.path(), post(handle_create_options))
            .route(&Operation::UpdateOptions.path(), post(handle_update_options))
            .route(&Operation::Create.path(), post(handle_create))
            .route(&Operation::Update.path(), post(handle_update))
            .route(&Operation::PostCheck.path(), post(handle_post_check))
            .route(&Operation::Remove.path(), post(handle_remove))
            .route(&Operation::GetVersion.path(), post(handle_get_version))
            .route(&Operation::SetVersion.path(), post(handle_set_version))
            .route(&Operation::GetClusterSize.path(), post(handle_get_cluster_size))
            .route(&Operation::SetClusterSize.path(), post(handle_set_cluster_size))
            .with_state(self.state.clone())
    }

    /// Bind `listen_addr`, publish the resolved address, then serve until the task ends
    ///
    /// If binding fails the publisher is dropped unfulfilled, which the waiting
    /// side observes as a launch failure.
    pub async fn serve(self, listen_addr: &str, publisher: AddressPublisher) -> Result<()> {
        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            error!("Failed to bind plugin server for {}: {}", self.driver_name(), e);
            EngineError::transport(format!("failed to bind {}: {}", listen_addr, e))
        })?;
        let addr = listener.local_addr()?;

        publisher.publish(addr.to_string());
        self.serve_listener(listener, addr).await
    }

    /// Serve on an already-bound listener
    pub async fn serve_listener(self, listener: TcpListener, addr: SocketAddr) -> Result<()> {
        info!(
            "Plugin server for driver {} listening on {}",
            self.driver_name(),
            addr
        );

        axum::serve(listener, self.router()).await.map_err(|e| {
            error!("Plugin server for {} stopped: {}", self.driver_name(), e);
            EngineError::transport(format!("plugin server error: {}", e))
        })
    }
}

/// Driver error rendered as an HTTP response
struct RpcError(EngineError);

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("Driver call failed ({}): {}", status, self.0);
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type RpcResult<T> = std::result::Result<Json<T>, RpcError>;

async fn handle_handshake(State(state): State<Arc<ServerState>>) -> Json<PluginInfo> {
    Json(PluginInfo {
        driver_name: state.driver_name.clone(),
        protocol_version: PROTOCOL_VERSION,
        capabilities: state.driver.capabilities(),
    })
}

async fn handle_create_options(State(state): State<Arc<ServerState>>) -> RpcResult<DriverFlags> {
    Ok(Json(state.driver.create_options().await?))
}

async fn handle_update_options(State(state): State<Arc<ServerState>>) -> RpcResult<DriverFlags> {
    Ok(Json(state.driver.update_options().await?))
}

async fn handle_create(
    State(state): State<Arc<ServerState>>,
    Json(opts): Json<DriverOptions>,
) -> RpcResult<ClusterInfo> {
    debug!("Create called on driver {}", state.driver_name);
    Ok(Json(state.driver.create(&opts).await?))
}

async fn handle_update(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<UpdateRequest>,
) -> RpcResult<ClusterInfo> {
    debug!("Update called on driver {}", state.driver_name);
    Ok(Json(
        state
            .driver
            .update(&req.cluster_info, &req.driver_options)
            .await?,
    ))
}

async fn handle_post_check(
    State(state): State<Arc<ServerState>>,
    Json(info): Json<ClusterInfo>,
) -> RpcResult<ClusterInfo> {
    debug!("PostCheck called on driver {}", state.driver_name);
    Ok(Json(state.driver.post_check(&info).await?))
}

async fn handle_remove(
    State(state): State<Arc<ServerState>>,
    Json(info): Json<ClusterInfo>,
) -> RpcResult<Empty> {
    debug!("Remove called on driver {}", state.driver_name);
    state.driver.remove(&info).await?;
    Ok(Json(Empty {}))
}

async fn handle_get_version(
    State(state): State<Arc<ServerState>>,
    Json(info): Json<ClusterInfo>,
) -> RpcResult<KubernetesVersion> {
    Ok(Json(state.driver.get_version(&info).await?))
}

async fn handle_set_version(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SetVersionRequest>,
) -> RpcResult<Empty> {
    state
        .driver
        .set_version(&req.cluster_info, &req.version)
        .await?;
    Ok(Json(Empty {}))
}

async fn handle_get_cluster_size(
    State(state): State<Arc<ServerState>>,
    Json(info): Json<ClusterInfo>,
) -> RpcResult<NodeCount> {
    Ok(Json(state.driver.get_cluster_size(&info).await?))
}

async fn handle_set_cluster_size(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SetClusterSizeRequest>,
) -> RpcResult<Empty> {
    state
        .driver
        .set_cluster_size(&req.cluster_info, &req.size)
        .await?;
    Ok(Json(Empty {}))
}
