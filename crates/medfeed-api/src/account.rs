use tracing::info;
use validator::Validate;

use medfeed_types::api::ProfileUpdate;
use medfeed_types::models::{DEFAULT_AVATAR, User};

use crate::error::{FeedError, FeedResult};
use crate::identity::Caller;
use crate::media::Namespace;
use crate::state::AppContext;

/// Public URL prefix the router mounts the avatars directory under.
pub const AVATAR_URL_PREFIX: &str = "/static/avatars";

pub fn avatar_url(user: &User) -> String {
    format!("{}/{}", AVATAR_URL_PREFIX, user.avatar)
}

/// The caller's current row, re-read so edits made since login are visible.
pub fn current_user(ctx: &AppContext, caller: &Caller) -> FeedResult<User> {
    let id = caller.require_user()?.id;
    let row = ctx
        .db
        .get_user_by_id(id)?
        .ok_or_else(|| FeedError::NotFound(format!("User {}", id)))?;
    Ok(row.into_user()?)
}

/// Validation and uniqueness against other users. Writes nothing.
fn check_profile(ctx: &AppContext, user_id: i64, req: &ProfileUpdate) -> FeedResult<()> {
    req.validate()?;

    if ctx.db.username_taken(&req.username, Some(user_id))? {
        return Err(FeedError::DuplicateIdentity(
            "That username is taken. Please choose a different one".to_string(),
        ));
    }
    if ctx.db.email_taken(&req.email, Some(user_id))? {
        return Err(FeedError::DuplicateIdentity(
            "That email is taken. Please choose a different one".to_string(),
        ));
    }
    Ok(())
}

pub fn update_profile(ctx: &AppContext, caller: &Caller, req: &ProfileUpdate) -> FeedResult<User> {
    let id = caller.require_user()?.id;
    check_profile(ctx, id, req)?;

    let updated = ctx
        .db
        .update_user_profile(id, &req.username, &req.email)
        .map_err(FeedError::from_identity_write)?;
    if !updated {
        return Err(FeedError::NotFound(format!("User {}", id)));
    }

    info!("User {} updated profile", id);
    current_user(ctx, caller)
}

/// Swap in a new avatar. The previous custom file is removed best-effort;
/// the sentinel is never touched.
pub fn update_avatar(
    ctx: &AppContext,
    caller: &Caller,
    bytes: &[u8],
    original_filename: &str,
) -> FeedResult<User> {
    let previous = current_user(ctx, caller)?;
    let filename = ctx
        .media
        .store_thumbnail(Namespace::Avatars, bytes, original_filename)?;

    if !ctx.db.update_user_avatar(previous.id, &filename)? {
        ctx.media.remove_best_effort(Namespace::Avatars, &filename);
        return Err(FeedError::NotFound(format!("User {}", previous.id)));
    }
    info!("User {} set avatar {}", previous.id, filename);
    discard_old_avatar(ctx, &previous.avatar, &filename);

    Ok(User {
        avatar: filename,
        ..previous
    })
}

/// Profile edit with an optional new picture, applied all or nothing: every
/// check and the image store run before the single row update.
pub fn update_account(
    ctx: &AppContext,
    caller: &Caller,
    req: &ProfileUpdate,
    picture: Option<(&[u8], &str)>,
) -> FeedResult<User> {
    let previous = current_user(ctx, caller)?;
    check_profile(ctx, previous.id, req)?;

    let avatar = match picture {
        Some((bytes, original_filename)) => {
            ctx.media
                .store_thumbnail(Namespace::Avatars, bytes, original_filename)?
        }
        None => previous.avatar.clone(),
    };

    let written = ctx
        .db
        .update_user_account(previous.id, &req.username, &req.email, &avatar)
        .map_err(FeedError::from_identity_write);
    if !matches!(written, Ok(true)) && avatar != previous.avatar {
        ctx.media.remove_best_effort(Namespace::Avatars, &avatar);
    }
    if !written? {
        return Err(FeedError::NotFound(format!("User {}", previous.id)));
    }

    info!("User {} updated account", previous.id);
    discard_old_avatar(ctx, &previous.avatar, &avatar);
    current_user(ctx, caller)
}

fn discard_old_avatar(ctx: &AppContext, previous: &str, current: &str) {
    if previous != DEFAULT_AVATAR && previous != current {
        ctx.media.remove_best_effort(Namespace::Avatars, previous);
    }
}
