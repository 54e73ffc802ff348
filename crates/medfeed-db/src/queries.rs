use crate::Database;
use crate::models::{PostRow, SessionRow, UserRow, to_db_timestamp};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use medfeed_types::models::Role;
use rusqlite::{Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, username, email, password, role, avatar, created_at";

// Posts are always read joined with their author, newest first, id breaking ties.
const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.created_at, p.owner_id, u.username, u.avatar
     FROM posts p
     JOIN users u ON p.owner_id = u.id";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (username, email, password_hash, to_db_timestamp(created_at)),
            )?;
            let id = conn.last_insert_rowid();
            query_user(conn, "id", &id)?.ok_or_else(|| anyhow!("User {} vanished after insert", id))
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", &email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", &username))
    }

    /// Is `username` held by any user other than `except`?
    pub fn username_taken(&self, username: &str, except: Option<i64>) -> Result<bool> {
        self.with_conn(|conn| exists_other(conn, "username", username, except))
    }

    pub fn email_taken(&self, email: &str, except: Option<i64>) -> Result<bool> {
        self.with_conn(|conn| exists_other(conn, "email", email, except))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM users ORDER BY id ASC", USER_COLUMNS))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no such user exists.
    pub fn update_user_profile(&self, id: i64, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET username = ?1, email = ?2 WHERE id = ?3",
                rusqlite::params![username, email, id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Profile fields and avatar in one statement. Returns false when no such
    /// user exists.
    pub fn update_user_account(
        &self,
        id: i64,
        username: &str,
        email: &str,
        avatar: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET username = ?1, email = ?2, avatar = ?3 WHERE id = ?4",
                rusqlite::params![username, email, avatar, id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_user_avatar(&self, id: i64, avatar: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar = ?1 WHERE id = ?2",
                rusqlite::params![avatar, id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_user_role(&self, id: i64, role: Role) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                rusqlite::params![role.as_str(), id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Posts --

    pub fn insert_post(
        &self,
        owner_id: i64,
        title: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PostRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (title, content, created_at, owner_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![title, content, to_db_timestamp(created_at), owner_id],
            )?;
            let id = conn.last_insert_rowid();
            query_post(conn, id)?.ok_or_else(|| anyhow!("Post {} vanished after insert", id))
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    pub fn delete_post(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// One page of posts, optionally restricted to a single owner.
    pub fn list_posts(&self, owner_id: Option<i64>, limit: u32, offset: u64) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{}
                 WHERE (?1 IS NULL OR p.owner_id = ?1)
                 ORDER BY p.created_at DESC, p.id ASC
                 LIMIT ?2 OFFSET ?3",
                POST_SELECT
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![owner_id, limit, offset as i64], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_posts(&self, owner_id: Option<i64>) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE (?1 IS NULL OR owner_id = ?1)",
                [owner_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Sessions --

    pub fn insert_session(
        &self,
        id: &str,
        user_id: i64,
        remember: bool,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, remember, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id,
                    user_id,
                    remember,
                    to_db_timestamp(created_at),
                    to_db_timestamp(expires_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT id, user_id, remember, created_at, expires_at FROM sessions WHERE id = ?1",
                [id],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        remember: row.get(2)?,
                        created_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
            Ok(row)
        })
    }

    /// Returns whether a row was removed; removing an unknown id is not an error.
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [to_db_timestamp(now)])?;
            Ok(removed)
        })
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        avatar: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        owner_id: row.get(4)?,
        author_username: row.get(5)?,
        author_avatar: row.get(6)?,
    })
}

// `column` is always one of our own literals, never caller input.
fn query_user(
    conn: &Connection,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    ))?;
    Ok(stmt.query_row([value], map_user).optional()?)
}

fn query_post(conn: &Connection, id: i64) -> Result<Option<PostRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE p.id = ?1", POST_SELECT))?;
    Ok(stmt.query_row([id], map_post).optional()?)
}

fn exists_other(conn: &Connection, column: &str, value: &str, except: Option<i64>) -> Result<bool> {
    let found: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM users WHERE {} = ?1 AND (?2 IS NULL OR id != ?2))",
            column
        ),
        rusqlite::params![value, except],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}
