//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Read models fed by the posts and accounts services
-- ============================================================

CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('lost', 'found')),
    status TEXT NOT NULL CHECK (status IN ('active', 'resolved', 'expired', 'deleted')),
    owner_user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_profiles (
    user_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    language TEXT NOT NULL DEFAULT 'en'
);

-- ============================================================
-- Contact exchange
-- ============================================================

CREATE TABLE IF NOT EXISTS contact_exchange_requests (
    id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL REFERENCES posts(id),
    requester_user_id TEXT NOT NULL,
    owner_user_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'denied', 'expired')),
    message TEXT,
    verification_required INTEGER NOT NULL DEFAULT 0,
    verification_method TEXT,
    verification_question TEXT,
    verification_requirements TEXT,
    approval_type TEXT,
    denial_reason TEXT,
    denial_message TEXT,
    encrypted_contact_info TEXT,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (requester_user_id <> owner_user_id),
    CHECK (expires_at > created_at),
    CHECK (encrypted_contact_info IS NULL OR status IN ('approved', 'expired'))
);

CREATE INDEX IF NOT EXISTS idx_requests_requester
    ON contact_exchange_requests(requester_user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_owner
    ON contact_exchange_requests(owner_user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_status_expiry
    ON contact_exchange_requests(status, expires_at);

-- ============================================================
-- Encryption keys and audit
-- ============================================================

CREATE TABLE IF NOT EXISTS encryption_keys (
    id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL UNIQUE,
    public_key BLOB NOT NULL,
    sealed_private_key BLOB NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    expires_at INTEGER
);

-- At most one active key.
CREATE UNIQUE INDEX IF NOT EXISTS idx_keys_single_active
    ON encryption_keys(is_active) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS encryption_audit_logs (
    id TEXT PRIMARY KEY,
    operation TEXT NOT NULL CHECK (operation IN (
        'encrypt', 'decrypt', 'token_create', 'token_validate', 'key_rotation', 'contact_purge'
    )),
    user_id TEXT NOT NULL,
    request_id TEXT,
    key_fingerprint TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_message TEXT,
    timestamp INTEGER NOT NULL,
    ip_address TEXT,
    user_agent TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_user ON encryption_audit_logs(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_request ON encryption_audit_logs(request_id, timestamp);

CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
    BEFORE UPDATE ON encryption_audit_logs
    BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;
CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete
    BEFORE DELETE ON encryption_audit_logs
    BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;

-- ============================================================
-- Settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
