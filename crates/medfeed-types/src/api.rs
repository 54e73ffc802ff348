use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Role, User};

// -- Auth --

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 20, message = "Username must be 1-20 characters"))]
    pub username: String,
    #[validate(
        length(min = 1, max = 128, message = "Email must be 1-128 characters"),
        email(message = "Invalid email format")
    )]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

// -- Account --

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 20, message = "Username must be 1-20 characters"))]
    pub username: String,
    #[validate(
        length(min = 1, max = 128, message = "Email must be 1-128 characters"),
        email(message = "Invalid email format")
    )]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub user: User,
    pub avatar_url: String,
}

// -- Posts --

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NewPostRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

// -- Admin --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleUpdateRequest {
    /// Parsed with `Role::from_str` so an unknown value is a validation error,
    /// not a body-rejection.
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct AboutResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: "pw123".into(),
        }
    }

    #[test]
    fn register_bounds() {
        assert!(register("alice", "alice@x.com").validate().is_ok());
        assert!(register("", "alice@x.com").validate().is_err());
        assert!(register(&"a".repeat(21), "alice@x.com").validate().is_err());
        assert!(register("alice", "not-an-email").validate().is_err());
    }

    #[test]
    fn title_bounds_count_characters() {
        let ok = NewPostRequest {
            title: "é".repeat(100),
            content: "body".into(),
        };
        assert!(ok.validate().is_ok());

        let long = NewPostRequest {
            title: "x".repeat(101),
            content: "body".into(),
        };
        assert!(long.validate().is_err());

        let empty = NewPostRequest {
            title: "t".into(),
            content: String::new(),
        };
        assert!(empty.validate().is_err());
    }
}
