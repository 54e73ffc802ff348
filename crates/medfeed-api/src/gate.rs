//! Role gate: who may see which posts and who may change what.
//!
//! Admin and Doctor read every post; Patients read only their own. Mutation
//! is owner-only, and user management is Admin-only. Anonymous callers get
//! `Unauthenticated` from everything here.

use tracing::info;

use medfeed_types::models::{Page, Post, PostView, Role, User};

use crate::error::{FeedError, FeedResult};
use crate::identity::Caller;
use crate::posts;
use crate::state::AppContext;

/// The caller's feed: everything for Admin/Doctor, own posts otherwise.
pub fn visible_posts(
    ctx: &AppContext,
    caller: &Caller,
    page: i64,
    per_page: u32,
) -> FeedResult<Page<PostView>> {
    let user = caller.require_user()?;
    let owner = if user.role.sees_all_posts() {
        None
    } else {
        Some(user.id)
    };
    posts::paginate(ctx, owner, page, per_page)
}

/// Only the owner may delete a post.
pub fn authorize_mutate(caller: &Caller, post: &Post) -> FeedResult<()> {
    let user = caller.require_user()?;
    if user.id != post.owner_id {
        return Err(FeedError::Forbidden(
            "You can only change your own posts".to_string(),
        ));
    }
    Ok(())
}

/// Owner, Doctor or Admin may look at a post's stored image.
pub fn authorize_view_image(caller: &Caller, post: &Post) -> FeedResult<()> {
    let user = caller.require_user()?;
    if user.id == post.owner_id || user.role.sees_all_posts() {
        Ok(())
    } else {
        Err(FeedError::Forbidden(
            "You cannot view this image".to_string(),
        ))
    }
}

pub fn authorize_admin(caller: &Caller) -> FeedResult<&User> {
    let user = caller.require_user()?;
    if user.role != Role::Admin {
        return Err(FeedError::Forbidden("Admin role required".to_string()));
    }
    Ok(user)
}

pub fn set_user_role(
    ctx: &AppContext,
    caller: &Caller,
    target_id: i64,
    role: Role,
) -> FeedResult<User> {
    let admin = authorize_admin(caller)?;

    if !ctx.db.update_user_role(target_id, role)? {
        return Err(FeedError::NotFound(format!("User {}", target_id)));
    }
    let row = ctx
        .db
        .get_user_by_id(target_id)?
        .ok_or_else(|| FeedError::NotFound(format!("User {}", target_id)))?;

    info!("{} set role of user {} to {}", admin.username, target_id, role);
    Ok(row.into_user()?)
}

pub fn list_users(ctx: &AppContext, caller: &Caller) -> FeedResult<Vec<User>> {
    authorize_admin(caller)?;
    let users = ctx
        .db
        .list_users()?
        .into_iter()
        .map(|row| row.into_user())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestApp, caller_for, user_with_role};
    use chrono::{Duration, TimeZone, Utc};
    use medfeed_types::models::DEFAULT_PAGE_SIZE;

    fn seed_post(app: &TestApp, owner: &User, title: &str, minute: i64) -> i64 {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minute);
        app.ctx.db.insert_post(owner.id, title, "body", at).unwrap().id
    }

    #[test]
    fn doctor_sees_everyone_patient_sees_self() {
        let app = TestApp::new();
        let alice = user_with_role(&app, "alice", Role::Patient);
        let bob = user_with_role(&app, "bob", Role::Doctor);
        let carol = user_with_role(&app, "carol", Role::Doctor);

        for i in 0..5 {
            seed_post(&app, &alice, &format!("alice {}", i), i * 2);
        }
        for i in 0..3 {
            seed_post(&app, &carol, &format!("carol {}", i), i * 2 + 1);
        }

        let feed = visible_posts(&app.ctx, &caller_for(&app, &bob), 1, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(feed.total, 8);
        assert_eq!(feed.items.len(), 4);
        let titles: Vec<&str> = feed.items.iter().map(|p| p.post.title.as_str()).collect();
        assert_eq!(titles, vec!["alice 4", "alice 3", "carol 2", "alice 2"]);

        let own = visible_posts(&app.ctx, &caller_for(&app, &alice), 1, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(own.total, 5);
        assert_eq!(own.items.len(), 4);
        assert!(own.items.iter().all(|p| p.post.owner_id == alice.id));
        assert_eq!(own.items[0].post.title, "alice 4");
        assert!(own.has_next);
    }

    #[test]
    fn pages_are_stable_and_ordered() {
        let app = TestApp::new();
        let admin = user_with_role(&app, "root", Role::Admin);
        // Three posts share a timestamp; ids break the tie.
        for i in 0..3 {
            seed_post(&app, &admin, &format!("tie {}", i), 10);
        }
        for i in 0..6 {
            seed_post(&app, &admin, &format!("p {}", i), i);
        }
        let caller = caller_for(&app, &admin);

        let mut seen = Vec::new();
        for page in 1..=3 {
            let p = visible_posts(&app.ctx, &caller, page, DEFAULT_PAGE_SIZE).unwrap();
            seen.extend(p.items);
        }
        assert_eq!(seen.len(), 9);
        for pair in seen.windows(2) {
            let (a, b) = (&pair[0].post, &pair[1].post);
            assert!(a.created_at > b.created_at || (a.created_at == b.created_at && a.id < b.id));
        }

        let again = visible_posts(&app.ctx, &caller, 1, DEFAULT_PAGE_SIZE).unwrap();
        let first: Vec<i64> = again.items.iter().map(|p| p.post.id).collect();
        let earlier: Vec<i64> = seen[..4].iter().map(|p| p.post.id).collect();
        assert_eq!(first, earlier);
    }

    #[test]
    fn anonymous_is_unauthenticated() {
        let app = TestApp::new();
        let err = visible_posts(&app.ctx, &Caller::Anonymous, 1, 4).unwrap_err();
        assert!(matches!(err, FeedError::Unauthenticated));
        assert!(matches!(
            authorize_admin(&Caller::Anonymous).unwrap_err(),
            FeedError::Unauthenticated
        ));
    }

    #[test]
    fn only_admin_changes_roles() {
        let app = TestApp::new();
        let alice = user_with_role(&app, "alice", Role::Patient);
        let doc = user_with_role(&app, "doc", Role::Doctor);
        let admin = user_with_role(&app, "root", Role::Admin);

        let err = set_user_role(&app.ctx, &caller_for(&app, &doc), alice.id, Role::Admin).unwrap_err();
        assert!(matches!(err, FeedError::Forbidden(_)));
        let err = set_user_role(&app.ctx, &caller_for(&app, &alice), alice.id, Role::Admin).unwrap_err();
        assert!(matches!(err, FeedError::Forbidden(_)));

        let admin_caller = caller_for(&app, &admin);
        let err = set_user_role(&app.ctx, &admin_caller, 9999, Role::Doctor).unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));

        let updated = set_user_role(&app.ctx, &admin_caller, alice.id, Role::Doctor).unwrap();
        assert_eq!(updated.role, Role::Doctor);
    }

    #[test]
    fn promoted_patient_sees_all_posts() {
        let app = TestApp::new();
        let alice = user_with_role(&app, "alice", Role::Patient);
        let bob = user_with_role(&app, "bob", Role::Patient);
        let admin = user_with_role(&app, "root", Role::Admin);
        seed_post(&app, &alice, "mine", 0);
        seed_post(&app, &bob, "theirs", 1);

        let before = visible_posts(&app.ctx, &caller_for(&app, &alice), 1, 4).unwrap();
        assert_eq!(before.total, 1);

        set_user_role(&app.ctx, &caller_for(&app, &admin), alice.id, Role::Doctor).unwrap();

        let after = visible_posts(&app.ctx, &caller_for(&app, &alice), 1, 4).unwrap();
        assert_eq!(after.total, 2);
    }

    #[test]
    fn user_listing_is_admin_only() {
        let app = TestApp::new();
        let alice = user_with_role(&app, "alice", Role::Patient);
        let admin = user_with_role(&app, "root", Role::Admin);

        assert!(matches!(
            list_users(&app.ctx, &caller_for(&app, &alice)).unwrap_err(),
            FeedError::Forbidden(_)
        ));
        let users = list_users(&app.ctx, &caller_for(&app, &admin)).unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "root"]);
    }

    #[test]
    fn image_view_rules() {
        let app = TestApp::new();
        let alice = user_with_role(&app, "alice", Role::Patient);
        let bob = user_with_role(&app, "bob", Role::Patient);
        let doc = user_with_role(&app, "doc", Role::Doctor);
        let id = seed_post(&app, &alice, "scan", 0);
        let post = app.ctx.db.get_post(id).unwrap().unwrap().into_post().unwrap();

        assert!(authorize_view_image(&caller_for(&app, &alice), &post).is_ok());
        assert!(authorize_view_image(&caller_for(&app, &doc), &post).is_ok());
        assert!(matches!(
            authorize_view_image(&caller_for(&app, &bob), &post).unwrap_err(),
            FeedError::Forbidden(_)
        ));
    }
}
