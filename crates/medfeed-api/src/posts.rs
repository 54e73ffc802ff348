use chrono::Utc;
use tracing::info;
use validator::Validate;

use medfeed_db::models::PostRow;
use medfeed_types::api::NewPostRequest;
use medfeed_types::models::{Page, PostView};

use crate::error::{FeedError, FeedResult};
use crate::gate;
use crate::identity::Caller;
use crate::state::AppContext;

pub fn create_post(ctx: &AppContext, caller: &Caller, req: &NewPostRequest) -> FeedResult<PostView> {
    let user = caller.require_user()?;
    req.validate()?;

    let row = ctx
        .db
        .insert_post(user.id, &req.title, &req.content, Utc::now())?;
    info!("{} created post {}", user.username, row.id);
    Ok(row.into_view()?)
}

pub fn get_post(ctx: &AppContext, post_id: i64) -> FeedResult<PostView> {
    let row = ctx
        .db
        .get_post(post_id)?
        .ok_or_else(|| FeedError::NotFound(format!("Post {}", post_id)))?;
    Ok(row.into_view()?)
}

pub fn delete_post(ctx: &AppContext, caller: &Caller, post_id: i64) -> FeedResult<()> {
    caller.require_user()?;
    let post = get_post(ctx, post_id)?.post;
    gate::authorize_mutate(caller, &post)?;

    if !ctx.db.delete_post(post_id)? {
        // Lost a race with another delete of the same post.
        return Err(FeedError::NotFound(format!("Post {}", post_id)));
    }
    info!("Post {} deleted by its owner", post_id);
    Ok(())
}

/// Public per-user feed, independent of the caller's role.
pub fn list_by_owner(
    ctx: &AppContext,
    username: &str,
    page: i64,
    per_page: u32,
) -> FeedResult<Page<PostView>> {
    let owner = ctx
        .db
        .get_user_by_username(username)?
        .ok_or_else(|| FeedError::NotFound(format!("User '{}'", username)))?;
    paginate(ctx, Some(owner.id), page, per_page)
}

/// Newest-first page of posts, id ascending among equal timestamps.
///
/// Pages are 1-based. Page 1 of an empty listing is an empty page; any other
/// page without items, or a page below 1, is `NotFound`.
pub(crate) fn paginate(
    ctx: &AppContext,
    owner_id: Option<i64>,
    page: i64,
    per_page: u32,
) -> FeedResult<Page<PostView>> {
    let missing = || FeedError::NotFound(format!("Page {}", page));
    let page_no = u32::try_from(page).ok().filter(|p| *p >= 1).ok_or_else(missing)?;
    if per_page == 0 {
        return Err(FeedError::invalid("per_page", "Page size must be positive"));
    }

    let total = ctx.db.count_posts(owner_id)?;
    let offset = (page_no as u64 - 1) * per_page as u64;
    let rows = ctx.db.list_posts(owner_id, per_page, offset)?;
    if rows.is_empty() && page_no > 1 {
        return Err(missing());
    }

    let items = rows
        .into_iter()
        .map(PostRow::into_view)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Page::new(items, page_no, per_page, total))
}
