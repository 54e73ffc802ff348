//! Database row types. These map directly to SQLite rows and are converted
//! into `medfeed_types` models at the edge of the store.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use medfeed_types::models::{Post, PostView, Role, User};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub avatar: String,
    pub created_at: String,
}

pub struct PostRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub owner_id: i64,
    pub author_username: String,
    pub author_avatar: String,
}

pub struct SessionRow {
    pub id: String,
    pub user_id: i64,
    pub remember: bool,
    pub created_at: String,
    pub expires_at: String,
}

/// Fixed-width RFC 3339 with microseconds, so text order equals time order.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        let role: Role = self
            .role
            .parse()
            .with_context(|| format!("corrupt role on user {}", self.id))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role,
            avatar: self.avatar,
            created_at: parse_db_timestamp(&self.created_at)?,
        })
    }
}

impl PostRow {
    pub fn into_view(self) -> Result<PostView> {
        Ok(PostView {
            post: Post {
                id: self.id,
                title: self.title,
                content: self.content,
                created_at: parse_db_timestamp(&self.created_at)?,
                owner_id: self.owner_id,
            },
            author_username: self.author_username,
            author_avatar: self.author_avatar,
        })
    }

    pub fn into_post(self) -> Result<Post> {
        Ok(self.into_view()?.post)
    }
}

impl SessionRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(parse_db_timestamp(&self.expires_at)? <= now)
    }
}
