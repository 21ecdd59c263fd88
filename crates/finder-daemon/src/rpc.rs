//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! line-delimited JSON-RPC method calls to the command handlers. A
//! connection that calls `subscribe_events` switches to receiving event
//! notifications for the rest of its life.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use finder_exchange::events::EventFilter;
use finder_exchange::{ErrorKind, ExchangeError};

use crate::commands;
use crate::events::RpcNotification;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn named(code: i32, message: &str, detail: Option<&str>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: detail.map(|d| serde_json::json!({ "detail": d })),
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::named(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::named(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({ "method": method })),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::named(-32602, "INVALID_PARAMS", Some(detail))
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::named(-32603, "INTERNAL_ERROR", Some(detail))
    }
}

impl From<&ExchangeError> for RpcError {
    fn from(e: &ExchangeError) -> Self {
        let detail = e.to_string();
        let (code, name) = match (e.kind(), e) {
            (_, ExchangeError::NotFound(_)) => (-32050, "NOT_FOUND"),
            (_, ExchangeError::Conflict(_) | ExchangeError::RotationConflict(_)) => (-32051, "CONFLICT"),
            (ErrorKind::Validation, _) => (-32020, "VALIDATION_FAILED"),
            (ErrorKind::Authorization, _) => (-32030, "UNAUTHORIZED"),
            (ErrorKind::Crypto, _) => (-32040, "CRYPTO_FAILED"),
            (ErrorKind::Persistence, _) => (-32603, "INTERNAL_ERROR"),
        };
        Self::named(code, name, Some(&detail))
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let response = RpcResponse::error(serde_json::Value::Null, RpcError::parse_error());
                write_json(&mut writer, &response).await?;
                continue;
            }
        };

        if request.method == "subscribe_events" && request.jsonrpc == "2.0" {
            let filter: EventFilter = match commands::params(&request.params) {
                Ok(filter) => filter,
                Err(e) => {
                    write_json(&mut writer, &RpcResponse::error(request.id, e)).await?;
                    continue;
                }
            };
            // Subscribe before acknowledging so nothing is missed in between.
            let events = state.event_bus.subscribe();
            let ack = serde_json::json!({ "subscribed": true, "sequence": state.event_bus.sequence() });
            write_json(&mut writer, &RpcResponse::success(request.id, ack)).await?;
            return stream_events(reader, writer, events, filter).await;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_json(&mut writer, &response).await?;
    }

    Ok(())
}

/// Push matching events until the client hangs up or the bus closes.
async fn stream_events<W: AsyncWrite + Unpin>(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: W,
    mut events: broadcast::Receiver<finder_types::events::ExchangeEvent>,
    filter: EventFilter,
) -> anyhow::Result<()> {
    let mut discard = String::new();
    loop {
        tokio::select! {
            read = reader.read_line(&mut discard) => {
                if read? == 0 {
                    break;
                }
                discard.clear();
            }
            received = events.recv() => match received {
                Ok(event) if filter.matches(&event) => {
                    write_json(&mut writer, &RpcNotification::event(&event)).await?;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Requests
        "create_request" => commands::exchange::create_request(&state, params).await,
        "approve_request" => commands::exchange::approve_request(&state, params).await,
        "deny_request" => commands::exchange::deny_request(&state, params).await,
        "cancel_request" => commands::exchange::cancel_request(&state, params).await,
        "get_request" => commands::exchange::get_request(&state, params).await,
        "list_requests" => commands::exchange::list_requests(&state, params).await,
        "decrypt_contact_info" => commands::exchange::decrypt_contact_info(&state, params).await,

        // Tokens
        "generate_contact_token" => {
            commands::exchange::generate_contact_token(&state, params).await
        }
        "validate_contact_token" => {
            commands::exchange::validate_contact_token(&state, params).await
        }

        // Sweeps, on demand
        "process_expired_requests" => commands::exchange::process_expired_requests(&state).await,
        "cleanup_expired_tokens" => commands::exchange::cleanup_expired_tokens(&state).await,

        // Keys and audit
        "rotate_keys" => commands::keys::rotate_keys(&state, params).await,
        "list_keys" => commands::keys::list_keys(&state).await,
        "get_active_key" => commands::keys::get_active_key(&state).await,
        "get_audit_trail" => commands::keys::get_audit_trail(&state, params).await,

        // Read models
        "upsert_post" => commands::directory::upsert_post(&state, params).await,
        "upsert_user" => commands::directory::upsert_user(&state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
