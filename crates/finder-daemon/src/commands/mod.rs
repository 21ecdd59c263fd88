//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. Handlers
//! decode their params, run the synchronous service call on the blocking
//! pool and encode the result.

pub mod directory;
pub mod exchange;
pub mod keys;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use finder_exchange::service::ContactExchangeService;
use finder_exchange::ExchangeError;

use crate::rpc::RpcError;
use crate::DaemonState;

pub type Result = std::result::Result<Value, RpcError>;

/// Decode the params object into `T`.
pub fn params<T: DeserializeOwned>(params: &Value) -> std::result::Result<T, RpcError> {
    // Methods without params may omit the field entirely.
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

/// Run a service call on the blocking pool and encode its result.
pub async fn call<T, F>(state: &Arc<DaemonState>, f: F) -> Result
where
    T: Serialize + Send + 'static,
    F: FnOnce(&ContactExchangeService) -> std::result::Result<T, ExchangeError> + Send + 'static,
{
    let service = state.service.clone();
    let value = tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
        .map_err(|e| RpcError::from(&e))?;
    encode(value)
}

pub fn encode<T: Serialize>(value: T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}
