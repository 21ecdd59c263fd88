//! Read models for posts and user profiles.
//!
//! Rows are pushed in by the services that own them; this subsystem only
//! reads them.

use rusqlite::Connection;

use finder_types::directory::{PostSummary, PrivacySafeUser, UserPreferences};
use finder_types::ids::{PostId, UserId};

use super::{not_found, parse, time_column, to_sql_time, write_error};
use crate::Result;

/// Insert or replace a post.
pub fn upsert_post(conn: &Connection, post: &PostSummary) -> Result<()> {
    let created_at = to_sql_time("created_at", post.created_at)?;
    conn.execute(
        "INSERT INTO posts (id, title, kind, status, owner_user_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             kind = excluded.kind,
             status = excluded.status,
             owner_user_id = excluded.owner_user_id",
        rusqlite::params![
            post.id.to_string(),
            post.title,
            post.kind.as_str(),
            post.status.as_str(),
            post.owner_id.to_string(),
            created_at,
        ],
    )
    .map_err(|e| write_error("posts", e))?;
    Ok(())
}

pub fn get_post(conn: &Connection, id: &PostId) -> Result<PostSummary> {
    let (title, kind, status, owner, created_at) = conn
        .query_row(
            "SELECT title, kind, status, owner_user_id, created_at FROM posts WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    time_column(row, 4)?,
                ))
            },
        )
        .map_err(not_found(format!("post {id}")))?;

    Ok(PostSummary {
        id: *id,
        title,
        kind: parse("kind", &kind)?,
        status: parse("status", &status)?,
        owner_id: parse("owner_user_id", &owner)?,
        created_at,
    })
}

/// Insert or replace a user profile.
pub fn upsert_user(conn: &Connection, user: &PrivacySafeUser) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO user_profiles (user_id, display_name, avatar_url, timezone, language)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            user.user_id.to_string(),
            user.display_name,
            user.avatar_url,
            user.preferences.timezone,
            user.preferences.language,
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &UserId) -> Result<PrivacySafeUser> {
    conn.query_row(
        "SELECT display_name, avatar_url, timezone, language FROM user_profiles WHERE user_id = ?1",
        [id.to_string()],
        |row| {
            Ok(PrivacySafeUser {
                user_id: *id,
                display_name: row.get(0)?,
                avatar_url: row.get(1)?,
                preferences: UserPreferences {
                    timezone: row.get(2)?,
                    language: row.get(3)?,
                },
            })
        },
    )
    .map_err(not_found(format!("user {id}")))
}
