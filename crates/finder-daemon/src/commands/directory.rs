//! Read-model sync from the posts and accounts services.

use std::sync::Arc;

use serde_json::Value;

use finder_types::directory::{PostSummary, PrivacySafeUser};

use super::{encode, params, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

pub async fn upsert_post(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let post: PostSummary = params(raw)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.upsert_post(&post))
        .await
        .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
        .map_err(|e| RpcError::from(&finder_exchange::ExchangeError::from(e)))?;
    encode(serde_json::json!({ "updated": true }))
}

pub async fn upsert_user(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let user: PrivacySafeUser = params(raw)?;
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.upsert_user(&user))
        .await
        .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?
        .map_err(|e| RpcError::from(&finder_exchange::ExchangeError::from(e)))?;
    encode(serde_json::json!({ "updated": true }))
}
