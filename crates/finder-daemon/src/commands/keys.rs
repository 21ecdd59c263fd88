//! Key management and audit commands.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use finder_types::audit::AuditQuery;
use finder_types::ids::UserId;

use super::{call, params, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct ActorParams {
    actor: UserId,
}

pub async fn rotate_keys(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: ActorParams = params(raw)?;
    call(state, move |s| s.rotate_keys(&p.actor)).await
}

pub async fn list_keys(state: &Arc<DaemonState>) -> Result {
    call(state, |s| s.list_keys()).await
}

pub async fn get_active_key(state: &Arc<DaemonState>) -> Result {
    let fingerprint = call(state, |s| s.active_key_fingerprint()).await?;
    Ok(serde_json::json!({ "fingerprint": fingerprint }))
}

pub async fn get_audit_trail(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let mut query: AuditQuery = params(raw)?;
    if query.limit.is_none() {
        query.limit = Some(state.config.exchange.audit_query_limit);
    }
    call(state, move |s| s.audit_trail(&query)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded_state;
    use serde_json::json;

    #[tokio::test]
    async fn test_rotation_and_audit() {
        let (state, _clock, seed) = seeded_state();

        let empty = get_active_key(&state).await.expect("active");
        assert!(empty["fingerprint"].is_null());

        let rotated = rotate_keys(&state, &json!({"actor": seed.owner}))
            .await
            .expect("rotate");
        let active = get_active_key(&state).await.expect("active");
        assert_eq!(active["fingerprint"], rotated["fingerprint"]);

        let keys = list_keys(&state).await.expect("keys");
        assert_eq!(keys.as_array().map(Vec::len), Some(1));
        assert!(keys[0].get("sealed_private_key").is_none());

        let trail = get_audit_trail(&state, &json!({"user_id": seed.owner}))
            .await
            .expect("audit");
        assert_eq!(trail[0]["operation"], "key_rotation");
        assert_eq!(trail[0]["success"], true);
    }

    #[tokio::test]
    async fn test_audit_trail_without_params() {
        let (state, _clock, _seed) = seeded_state();
        let trail = get_audit_trail(&state, &Value::Null).await.expect("audit");
        assert_eq!(trail, json!([]));
    }
}
