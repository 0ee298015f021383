//! Inbound RPC listener.
//!
//! One JSON endpoint, `POST /rpc`, taking `{"method": .., "param": {..}}` and
//! always answering HTTP 200 with `{"code": .., "message": .., "data": ..}`.
//! Transport-level problems surface as non-zero codes, not HTTP statuses.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tpcore_plugin_host::LifecycleState;
use tpcore_session::SessionRegistry;
use tpcore_types::{AuthMode, Credential, Protocol, SessionId, SessionTicket, SysType};
use tracing::{debug, error, info, warn};

use crate::exit::ExitSignal;

pub const ERR_OK: i32 = 0;
pub const ERR_BAD_REQUEST: i32 = 1;
pub const ERR_UNKNOWN_METHOD: i32 = 2;
pub const ERR_INVALID_PARAM: i32 = 3;
pub const ERR_INTERNAL: i32 = 4;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("cannot bind RPC listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("RPC listener already running on {0}")]
    AlreadyRunning(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub protocol: Protocol,
    pub state: LifecycleState,
}

/// State shared by all RPC handlers.
pub struct RpcState {
    registry: Arc<SessionRegistry>,
    exit: ExitSignal,
    modules: RwLock<Vec<ModuleStatus>>,
    rpc_url: RwLock<Option<String>>,
}

impl RpcState {
    pub fn new(registry: Arc<SessionRegistry>, exit: ExitSignal) -> Self {
        Self {
            registry,
            exit,
            modules: RwLock::new(Vec::new()),
            rpc_url: RwLock::new(None),
        }
    }

    /// Replaces the module list reported by `get_config`.
    pub fn set_modules(&self, modules: Vec<ModuleStatus>) {
        *self.modules.write().unwrap_or_else(PoisonError::into_inner) = modules;
    }

    pub fn rpc_url(&self) -> Option<String> {
        self.rpc_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_rpc_url(&self, url: Option<String>) {
        *self.rpc_url.write().unwrap_or_else(PoisonError::into_inner) = url;
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    param: Value,
}

#[derive(Debug, Serialize)]
struct RpcReply {
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl RpcReply {
    fn ok(data: Option<Value>) -> Self {
        Self {
            code: ERR_OK,
            message: None,
            data,
        }
    }

    fn err(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Everything in a ticket the caller supplies. The core assigns the id, the
/// issue time and the claim count.
#[derive(Debug, Deserialize)]
struct TicketRequest {
    account_name: String,
    host_ip: String,
    host_port: u16,
    protocol: Protocol,
    #[serde(default)]
    auth_mode: AuthMode,
    #[serde(default)]
    sys_type: SysType,
    user_name: String,
    #[serde(default)]
    user_auth: Credential,
    #[serde(default)]
    user_param: String,
    #[serde(default)]
    auth_id: i64,
}

impl TicketRequest {
    fn into_ticket(self) -> SessionTicket {
        SessionTicket {
            id: SessionId::generate(),
            account_name: self.account_name,
            host_ip: self.host_ip,
            host_port: self.host_port,
            protocol: self.protocol,
            auth_mode: self.auth_mode,
            sys_type: self.sys_type,
            user_name: self.user_name,
            user_auth: self.user_auth,
            user_param: self.user_param,
            auth_id: self.auth_id,
            ref_count: 0,
            ticket_start: Utc::now(),
        }
    }
}

async fn rpc_handler(State(state): State<Arc<RpcState>>, body: Bytes) -> Json<RpcReply> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "Malformed RPC request");
            return Json(RpcReply::err(ERR_BAD_REQUEST, format!("malformed request: {e}")));
        }
    };

    debug!(method = %request.method, "RPC request");
    let reply = match request.method.as_str() {
        "request_session" => request_session(&state, request.param),
        "get_config" => get_config(&state),
        "exit" => {
            info!("Exit requested over RPC");
            state.exit.trigger();
            RpcReply::ok(None)
        }
        other => RpcReply::err(ERR_UNKNOWN_METHOD, format!("unknown method `{other}`")),
    };
    Json(reply)
}

fn request_session(state: &RpcState, param: Value) -> RpcReply {
    let request: TicketRequest = match serde_json::from_value(param) {
        Ok(r) => r,
        Err(e) => return RpcReply::err(ERR_INVALID_PARAM, format!("invalid session request: {e}")),
    };

    let ticket = request.into_ticket();
    let sid = ticket.id.to_string();
    match state.registry.insert(ticket) {
        Ok(()) => RpcReply::ok(Some(json!({ "sid": sid }))),
        Err(e) => {
            error!(error = %e, "Cannot register session ticket");
            RpcReply::err(ERR_INTERNAL, e.to_string())
        }
    }
}

fn get_config(state: &RpcState) -> RpcReply {
    let modules = state
        .modules
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    RpcReply::ok(Some(json!({
        "rpc": state.rpc_url(),
        "modules": modules,
        "sessions": state.registry.len(),
    })))
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Builds the RPC router over the given state.
pub fn build_router(state: Arc<RpcState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The RPC listener, started and stopped by the orchestrator.
pub struct RpcServer {
    bind: SocketAddr,
    state: Arc<RpcState>,
    running: Option<Running>,
}

impl RpcServer {
    pub fn new(bind: SocketAddr, state: Arc<RpcState>) -> Self {
        Self {
            bind,
            state,
            running: None,
        }
    }

    /// Binds the listener and serves in a background task.
    pub async fn start(&mut self) -> Result<SocketAddr, RpcError> {
        if let Some(running) = &self.running {
            return Err(RpcError::AlreadyRunning(running.local_addr));
        }

        let bind_err = |source| RpcError::Bind {
            addr: self.bind,
            source,
        };
        let listener = TcpListener::bind(self.bind).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let (shutdown, rx) = oneshot::channel::<()>();
        let app = build_router(Arc::clone(&self.state));
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "RPC listener failed");
            }
        });

        self.state.set_rpc_url(Some(format!("http://{local_addr}/rpc")));
        info!(addr = %local_addr, "RPC listener started");
        self.running = Some(Running {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Graceful shutdown, abandoning in-flight requests after `timeout`.
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());

        match tokio::time::timeout(timeout, &mut running.task).await {
            Ok(_) => info!(addr = %running.local_addr, "RPC listener stopped"),
            Err(_) => {
                warn!(addr = %running.local_addr, "RPC listener did not drain in time, aborting");
                running.task.abort();
            }
        }
        self.state.set_rpc_url(None);
    }
}
