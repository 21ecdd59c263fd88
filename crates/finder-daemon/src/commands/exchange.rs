//! Contact exchange request commands.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use finder_exchange::service::CreateRequest;
use finder_types::audit::ClientMetadata;
use finder_types::contact::{ContactInfo, ContactToken};
use finder_types::exchange::{ApprovalType, DenialReason, RequestRole, VerificationDetails};
use finder_types::ids::{PostId, RequestId, UserId};

use super::{call, params, Result};
use crate::DaemonState;

#[derive(Deserialize)]
struct CreateParams {
    post_id: PostId,
    requester_id: UserId,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    verification_required: bool,
    #[serde(default)]
    verification_details: Option<VerificationDetails>,
    #[serde(default)]
    expiration_hours: Option<i64>,
}

#[derive(Deserialize)]
struct ApproveParams {
    request_id: RequestId,
    actor: UserId,
    approval_type: ApprovalType,
    contact: ContactInfo,
    #[serde(default)]
    client: ClientMetadata,
}

#[derive(Deserialize)]
struct DenyParams {
    request_id: RequestId,
    actor: UserId,
    reason: DenialReason,
    #[serde(default)]
    message: Option<String>,
}

/// Target request plus the caller acting on it.
#[derive(Deserialize)]
struct RequestParams {
    request_id: RequestId,
    actor: UserId,
    #[serde(default)]
    client: ClientMetadata,
}

#[derive(Deserialize)]
struct ListParams {
    actor: UserId,
    #[serde(default = "any_role")]
    role: RequestRole,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: u32,
}

fn any_role() -> RequestRole {
    RequestRole::Any
}

#[derive(Deserialize)]
struct GenerateTokenParams {
    actor: UserId,
    contact: ContactInfo,
    expires_at: u64,
    #[serde(default)]
    client: ClientMetadata,
}

#[derive(Deserialize)]
struct ValidateTokenParams {
    actor: UserId,
    token: ContactToken,
    #[serde(default)]
    client: ClientMetadata,
}

pub async fn create_request(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: CreateParams = params(raw)?;
    call(state, move |s| {
        s.create_request(CreateRequest {
            post_id: p.post_id,
            requester_id: p.requester_id,
            message: p.message,
            verification_required: p.verification_required,
            verification_details: p.verification_details,
            expiration_hours: p.expiration_hours,
        })
    })
    .await
}

pub async fn approve_request(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: ApproveParams = params(raw)?;
    call(state, move |s| {
        s.approve(&p.request_id, &p.actor, p.approval_type, &p.contact, p.client)
    })
    .await
}

pub async fn deny_request(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: DenyParams = params(raw)?;
    call(state, move |s| s.deny(&p.request_id, &p.actor, p.reason, p.message)).await
}

pub async fn cancel_request(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: RequestParams = params(raw)?;
    call(state, move |s| s.cancel_request(&p.request_id, &p.actor)).await
}

pub async fn get_request(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: RequestParams = params(raw)?;
    call(state, move |s| s.get_request(&p.request_id, &p.actor)).await
}

pub async fn list_requests(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: ListParams = params(raw)?;
    call(state, move |s| s.list_requests(&p.actor, p.role, p.limit, p.offset)).await
}

pub async fn decrypt_contact_info(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: RequestParams = params(raw)?;
    call(state, move |s| s.decrypt_contact_info(&p.request_id, &p.actor, p.client)).await
}

pub async fn generate_contact_token(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: GenerateTokenParams = params(raw)?;
    call(state, move |s| {
        s.generate_contact_token(&p.actor, &p.contact, p.expires_at, p.client)
    })
    .await
}

pub async fn validate_contact_token(state: &Arc<DaemonState>, raw: &Value) -> Result {
    let p: ValidateTokenParams = params(raw)?;
    call(state, move |s| s.validate_contact_token(&p.actor, &p.token, p.client)).await
}

pub async fn process_expired_requests(state: &Arc<DaemonState>) -> Result {
    call(state, |s| s.process_expired_requests()).await
}

pub async fn cleanup_expired_tokens(state: &Arc<DaemonState>) -> Result {
    call(state, |s| s.cleanup_expired_tokens()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{contact, seeded_state, T0};
    use finder_types::HOUR_SECS;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_lifecycle_over_commands() {
        let (state, _clock, seed) = seeded_state();

        let created = create_request(
            &state,
            &json!({
                "post_id": seed.post_id,
                "requester_id": seed.requester,
                "message": "Left it on the bus",
            }),
        )
        .await
        .expect("create");
        assert_eq!(created["status"], "pending");
        let request_id = created["id"].clone();

        let approved = approve_request(
            &state,
            &json!({
                "request_id": request_id,
                "actor": seed.owner,
                "approval_type": "platform_message",
                "contact": contact(),
                "client": {"user_agent": "gateway/1.0"},
            }),
        )
        .await
        .expect("approve");
        assert_eq!(approved["status"], "approved");
        assert_eq!(approved["approval_type"], "platform_message");

        let decrypted = decrypt_contact_info(
            &state,
            &json!({"request_id": request_id, "actor": seed.requester}),
        )
        .await
        .expect("decrypt");
        assert_eq!(decrypted["email"], "owner@example.com");

        let listed = list_requests(&state, &json!({"actor": seed.owner, "role": "owner"}))
            .await
            .expect("list");
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_authorization_error_code() {
        let (state, _clock, seed) = seeded_state();
        let created = create_request(
            &state,
            &json!({"post_id": seed.post_id, "requester_id": seed.requester}),
        )
        .await
        .expect("create");

        let err = deny_request(
            &state,
            &json!({
                "request_id": created["id"],
                "actor": seed.requester,
                "reason": "other",
            }),
        )
        .await
        .expect_err("requester cannot deny");
        assert_eq!(err.message, "UNAUTHORIZED");

        let cancelled = cancel_request(
            &state,
            &json!({"request_id": created["id"], "actor": seed.requester}),
        )
        .await
        .expect("cancel");
        assert_eq!(cancelled["denial_reason"], "user_preference");
    }

    #[tokio::test]
    async fn test_bad_params() {
        let (state, _clock, _seed) = seeded_state();
        let err = create_request(&state, &json!({"post_id": "not-a-uuid"}))
            .await
            .expect_err("invalid");
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_token_commands() {
        let (state, _clock, seed) = seeded_state();
        let token = generate_contact_token(
            &state,
            &json!({
                "actor": seed.owner,
                "contact": contact(),
                "expires_at": T0 + HOUR_SECS,
            }),
        )
        .await
        .expect("token");

        let info = validate_contact_token(&state, &json!({"actor": seed.requester, "token": token}))
            .await
            .expect("validate");
        assert_eq!(info["email"], "owner@example.com");
    }
}
