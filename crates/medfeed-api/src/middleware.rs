use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::error::FeedError;
use crate::identity::{self, Caller};
use crate::state::{AppState, blocking};

/// Attach a `Caller` to every request. A missing or stale token yields
/// `Caller::Anonymous`; only a store failure rejects the request.
pub async fn resolve_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, FeedError> {
    let token = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string());

    let caller = match token {
        Some(token) => {
            blocking(&state, move |ctx| identity::resolve_caller(ctx, Some(&token))).await?
        }
        None => Caller::Anonymous,
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Reject anonymous callers with 401.
pub async fn require_auth(req: Request, next: Next) -> Result<Response, FeedError> {
    match req.extensions().get::<Caller>() {
        Some(caller) if caller.is_authenticated() => Ok(next.run(req).await),
        _ => Err(FeedError::Unauthenticated),
    }
}

/// Send signed-in callers back to the feed.
pub async fn anon_only(req: Request, next: Next) -> Response {
    match req.extensions().get::<Caller>() {
        Some(caller) if caller.is_authenticated() => Redirect::to("/").into_response(),
        _ => next.run(req).await,
    }
}
