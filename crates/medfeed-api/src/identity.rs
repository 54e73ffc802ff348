use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use validator::Validate;

use medfeed_types::api::{LoginRequest, RegisterRequest};
use medfeed_types::models::User;

use crate::error::{FeedError, FeedResult};
use crate::state::AppContext;

/// Bytes of randomness in a session id.
const SESSION_ID_BYTES: usize = 16;

/// Token payload. The session row named by `sid` is the source of truth;
/// the signature only proves we issued the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub sid: String,
    pub username: String,
    pub exp: usize,
}

/// The identity attached to a request after session resolution.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    User { user: User, session_id: String },
}

impl Caller {
    pub fn user(&self) -> Option<&User> {
        match self {
            Caller::User { user, .. } => Some(user),
            Caller::Anonymous => None,
        }
    }

    pub fn require_user(&self) -> FeedResult<&User> {
        self.user().ok_or(FeedError::Unauthenticated)
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Caller::User { session_id, .. } => Some(session_id),
            Caller::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::User { .. })
    }
}

/// A freshly established login.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn hash_password(password: &str) -> FeedResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Constant-time check of `password` against a stored PHC string.
pub fn verify_password(password: &str, hash: &str) -> FeedResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn register(ctx: &AppContext, req: &RegisterRequest) -> FeedResult<User> {
    req.validate()?;

    if ctx.db.username_taken(&req.username, None)? {
        return Err(FeedError::DuplicateIdentity(
            "That username is taken. Please choose a different one".to_string(),
        ));
    }
    if ctx.db.email_taken(&req.email, None)? {
        return Err(FeedError::DuplicateIdentity(
            "That email is taken. Please choose a different one".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let row = ctx
        .db
        .create_user(&req.username, &req.email, &password_hash, Utc::now())
        .map_err(FeedError::from_identity_write)?;

    info!("Registered user {} (id {})", row.username, row.id);
    Ok(row.into_user()?)
}

pub fn authenticate(ctx: &AppContext, req: &LoginRequest) -> FeedResult<Session> {
    let row = ctx
        .db
        .get_user_by_email(&req.email)?
        .ok_or(FeedError::InvalidCredential)?;

    if !verify_password(&req.password, &row.password)? {
        debug!("Password mismatch for user {}", row.id);
        return Err(FeedError::InvalidCredential);
    }

    let now = Utc::now();
    match ctx.db.delete_expired_sessions(now) {
        Ok(0) => {}
        Ok(n) => debug!("Pruned {} expired sessions", n),
        Err(e) => warn!("Session pruning failed: {}", e),
    }

    let ttl = if req.remember {
        ctx.sessions.remember_ttl
    } else {
        ctx.sessions.ttl
    };
    let expires_at = now + ttl;
    let session_id = crate::random_hex(SESSION_ID_BYTES);
    ctx.db
        .insert_session(&session_id, row.id, req.remember, now, expires_at)?;

    let user = row.into_user()?;
    let token = create_token(
        &ctx.sessions.jwt_secret,
        &Claims {
            sub: user.id,
            sid: session_id.clone(),
            username: user.username.clone(),
            exp: expires_at.timestamp() as usize,
        },
    )?;

    info!("User {} logged in (remember={})", user.username, req.remember);
    Ok(Session {
        id: session_id,
        user,
        token,
        expires_at,
    })
}

/// Invalidate a session. Unknown or already-ended sessions are fine.
pub fn end_session(ctx: &AppContext, session_id: &str) -> FeedResult<()> {
    if ctx.db.delete_session(session_id)? {
        info!("Session ended");
    }
    Ok(())
}

/// Map a bearer token to the current caller. Every flavour of "no valid
/// session" is `Anonymous`; only store failures are errors.
pub fn resolve_caller(ctx: &AppContext, token: Option<&str>) -> FeedResult<Caller> {
    let Some(token) = token else {
        return Ok(Caller::Anonymous);
    };

    let claims = match decode_token(&ctx.sessions.jwt_secret, token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Rejected session token: {}", e);
            return Ok(Caller::Anonymous);
        }
    };

    let Some(session) = ctx.db.get_session(&claims.sid)? else {
        return Ok(Caller::Anonymous);
    };
    if session.user_id != claims.sub || session.is_expired(Utc::now())? {
        return Ok(Caller::Anonymous);
    }

    match ctx.db.get_user_by_id(claims.sub)? {
        Some(row) => Ok(Caller::User {
            user: row.into_user()?,
            session_id: session.id,
        }),
        None => Ok(Caller::Anonymous),
    }
}

fn create_token(secret: &str, claims: &Claims) -> anyhow::Result<String> {
    let token = encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

fn decode_token(secret: &str, token: &str) -> jsonwebtoken::errors::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestApp, login, register_user};

    #[test]
    fn password_hashes_are_salted() {
        let a = hash_password("pw123").unwrap();
        let b = hash_password("pw123").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2"));
        assert!(verify_password("pw123", &a).unwrap());
        assert!(!verify_password("pw124", &a).unwrap());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let app = TestApp::new();
        register_user(&app, "alice", "alice@x.com");

        let err = register(
            &app.ctx,
            &RegisterRequest {
                username: "alice2".into(),
                email: "alice@x.com".into(),
                password: "pw123".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::DuplicateIdentity(_)));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let app = TestApp::new();
        register_user(&app, "alice", "alice@x.com");

        let err = register(
            &app.ctx,
            &RegisterRequest {
                username: "alice".into(),
                email: "other@x.com".into(),
                password: "pw123".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::DuplicateIdentity(_)));
        assert_eq!(app.ctx.db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn registration_stores_no_plaintext() {
        let app = TestApp::new();
        let user = register_user(&app, "alice", "alice@x.com");
        assert_eq!(user.role, medfeed_types::models::Role::Patient);

        let row = app.ctx.db.get_user_by_id(user.id).unwrap().unwrap();
        assert_ne!(row.password, "pw123");
        assert!(!row.password.contains("pw123"));
    }

    #[test]
    fn invalid_registration_is_a_validation_error() {
        let app = TestApp::new();
        let err = register(
            &app.ctx,
            &RegisterRequest {
                username: "x".repeat(21),
                email: "alice@x.com".into(),
                password: "pw123".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::Validation(_)));
    }

    #[test]
    fn wrong_password_then_right_password() {
        let app = TestApp::new();
        let alice = register_user(&app, "alice", "alice@x.com");

        let err = authenticate(
            &app.ctx,
            &LoginRequest {
                email: "alice@x.com".into(),
                password: "wrong".into(),
                remember: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::InvalidCredential));

        let unknown = authenticate(
            &app.ctx,
            &LoginRequest {
                email: "nobody@x.com".into(),
                password: "pw123".into(),
                remember: false,
            },
        )
        .unwrap_err();
        assert!(matches!(unknown, FeedError::InvalidCredential));

        let session = authenticate(
            &app.ctx,
            &LoginRequest {
                email: "alice@x.com".into(),
                password: "pw123".into(),
                remember: false,
            },
        )
        .unwrap();
        let caller = resolve_caller(&app.ctx, Some(&session.token)).unwrap();
        assert_eq!(caller.user().unwrap().id, alice.id);
        assert_eq!(caller.session_id(), Some(session.id.as_str()));
    }

    #[test]
    fn remember_extends_the_session() {
        let app = TestApp::new();
        register_user(&app, "alice", "alice@x.com");

        let short = authenticate(
            &app.ctx,
            &LoginRequest {
                email: "alice@x.com".into(),
                password: "pw123".into(),
                remember: false,
            },
        )
        .unwrap();
        let long = authenticate(
            &app.ctx,
            &LoginRequest {
                email: "alice@x.com".into(),
                password: "pw123".into(),
                remember: true,
            },
        )
        .unwrap();
        assert!(long.expires_at - short.expires_at > chrono::Duration::days(20));
    }

    #[test]
    fn missing_or_bad_tokens_are_anonymous() {
        let app = TestApp::new();
        let alice = register_user(&app, "alice", "alice@x.com");
        let token = login(&app, &alice).token;

        assert!(!resolve_caller(&app.ctx, None).unwrap().is_authenticated());
        assert!(!resolve_caller(&app.ctx, Some("garbage")).unwrap().is_authenticated());

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(!resolve_caller(&app.ctx, Some(&tampered)).unwrap().is_authenticated());

        let forged = create_token(
            "some-other-secret",
            &Claims {
                sub: alice.id,
                sid: "whatever".into(),
                username: "alice".into(),
                exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
            },
        )
        .unwrap();
        assert!(!resolve_caller(&app.ctx, Some(&forged)).unwrap().is_authenticated());
    }

    #[test]
    fn ended_session_is_anonymous_and_logout_is_idempotent() {
        let app = TestApp::new();
        let alice = register_user(&app, "alice", "alice@x.com");
        let session = login(&app, &alice);

        end_session(&app.ctx, &session.id).unwrap();
        end_session(&app.ctx, &session.id).unwrap();
        end_session(&app.ctx, "never-existed").unwrap();

        let caller = resolve_caller(&app.ctx, Some(&session.token)).unwrap();
        assert!(!caller.is_authenticated());
    }

    #[test]
    fn session_for_another_user_is_rejected() {
        let app = TestApp::new();
        let alice = register_user(&app, "alice", "alice@x.com");
        let bob = register_user(&app, "bob", "bob@x.com");
        let alice_session = login(&app, &alice);

        // Validly signed, but names bob while pointing at alice's session.
        let swapped = create_token(
            &app.ctx.sessions.jwt_secret,
            &Claims {
                sub: bob.id,
                sid: alice_session.id.clone(),
                username: "bob".into(),
                exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
            },
        )
        .unwrap();
        assert!(!resolve_caller(&app.ctx, Some(&swapped)).unwrap().is_authenticated());
    }

    #[test]
    fn caller_reflects_current_role() {
        let app = TestApp::new();
        let alice = register_user(&app, "alice", "alice@x.com");
        let session = login(&app, &alice);

        app.ctx
            .db
            .update_user_role(alice.id, medfeed_types::models::Role::Doctor)
            .unwrap();
        let caller = resolve_caller(&app.ctx, Some(&session.token)).unwrap();
        assert_eq!(caller.user().unwrap().role, medfeed_types::models::Role::Doctor);
    }
}
