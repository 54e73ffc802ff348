//! HTTP surface: thin handlers over the feed operations, and the router.

use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        multipart::MultipartRejection,
    },
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use image::ImageFormat;
use tower_http::services::ServeDir;

use medfeed_types::api::{
    AboutResponse, AccountResponse, LoginRequest, LoginResponse, NewPostRequest, PageQuery,
    ProfileUpdate, RegisterRequest, RoleUpdateRequest,
};
use medfeed_types::models::{DEFAULT_PAGE_SIZE, Page, PostView, Role, User};

use crate::account::{self, AVATAR_URL_PREFIX};
use crate::error::{FeedError, FeedResult};
use crate::identity::{self, Caller};
use crate::media::{Namespace, StorageError};
use crate::middleware::{anon_only, require_auth, resolve_session};
use crate::state::{AppState, blocking};
use crate::{gate, ingest, posts};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/about", get(about))
        .route("/logout", get(logout))
        .route("/post/{id}", get(get_post))
        .route("/user/{username}", get(user_posts));

    let anon_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route_layer(middleware::from_fn(anon_only));

    let protected_routes = Router::new()
        .route("/", get(feed))
        .route("/index", get(feed))
        .route("/home", get(feed))
        .route("/account", get(account_info).post(update_account))
        .route("/post/new", post(new_post))
        .route("/post/{id}/image", get(post_image))
        .route("/post/{id}/delete", post(delete_post))
        .route("/ray/new", post(new_ray))
        .route("/users", get(list_users))
        .route("/user/type/{id}", post(set_role))
        .route_layer(middleware::from_fn(require_auth));

    let avatars = ServeDir::new(state.media.dir(Namespace::Avatars));

    Router::new()
        .merge(public_routes)
        .merge(anon_routes)
        .merge(protected_routes)
        .nest_service(AVATAR_URL_PREFIX, avatars)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), resolve_session))
        .with_state(state)
}

// -- Public --

async fn about() -> Json<AboutResponse> {
    Json(AboutResponse {
        name: "medfeed",
        version: env!("CARGO_PKG_VERSION"),
        description: "Clinical feed where patients share x-ray images with an automated diagnosis",
    })
}

async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> FeedResult<StatusCode> {
    if let Some(session_id) = caller.session_id().map(str::to_string) {
        blocking(&state, move |ctx| identity::end_session(ctx, &session_id)).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_post(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> FeedResult<Json<PostView>> {
    let Path(id) = id?;
    let post = blocking(&state, move |ctx| posts::get_post(ctx, id)).await?;
    Ok(Json(post))
}

async fn user_posts(
    State(state): State<AppState>,
    username: Result<Path<String>, PathRejection>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> FeedResult<Json<Page<PostView>>> {
    let Path(username) = username?;
    let Query(query) = query?;
    let page = blocking(&state, move |ctx| {
        posts::list_by_owner(ctx, &username, query.page, DEFAULT_PAGE_SIZE)
    })
    .await?;
    Ok(Json(page))
}

// -- Anonymous only --

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> FeedResult<(StatusCode, Json<User>)> {
    let Json(req) = body?;
    let user = blocking(&state, move |ctx| identity::register(ctx, &req)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> FeedResult<Json<LoginResponse>> {
    let Json(req) = body?;
    let session = blocking(&state, move |ctx| identity::authenticate(ctx, &req)).await?;
    Ok(Json(LoginResponse {
        user_id: session.user.id,
        username: session.user.username,
        role: session.user.role,
        token: session.token,
        expires_at: session.expires_at,
    }))
}

// -- Signed in --

async fn feed(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> FeedResult<Json<Page<PostView>>> {
    let Query(query) = query?;
    let page = blocking(&state, move |ctx| {
        gate::visible_posts(ctx, &caller, query.page, DEFAULT_PAGE_SIZE)
    })
    .await?;
    Ok(Json(page))
}

async fn account_info(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> FeedResult<Json<AccountResponse>> {
    let user = blocking(&state, move |ctx| account::current_user(ctx, &caller)).await?;
    Ok(Json(account_response(user)))
}

async fn update_account(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    multipart: Result<Multipart, MultipartRejection>,
) -> FeedResult<Json<AccountResponse>> {
    let multipart = multipart?;
    let mut form = read_form(multipart).await?;
    let current = caller.require_user()?;
    let update = ProfileUpdate {
        username: form
            .text
            .remove("username")
            .unwrap_or_else(|| current.username.clone()),
        email: form
            .text
            .remove("email")
            .unwrap_or_else(|| current.email.clone()),
    };

    let user = blocking(&state, move |ctx| {
        let picture = form
            .picture
            .as_ref()
            .map(|p| (p.bytes.as_slice(), p.filename.as_str()));
        account::update_account(ctx, &caller, &update, picture)
    })
    .await?;
    Ok(Json(account_response(user)))
}

async fn new_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<NewPostRequest>, JsonRejection>,
) -> FeedResult<(StatusCode, Json<PostView>)> {
    let Json(req) = body?;
    let post = blocking(&state, move |ctx| posts::create_post(ctx, &caller, &req)).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn post_image(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<i64>, PathRejection>,
) -> FeedResult<impl IntoResponse> {
    let Path(id) = id?;
    let (filename, bytes) = blocking(&state, move |ctx| {
        let post = posts::get_post(ctx, id)?.post;
        gate::authorize_view_image(&caller, &post)?;
        match ctx.media.read(Namespace::Rays, &post.content) {
            Ok(bytes) => Ok((post.content, bytes)),
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FeedError::NotFound(format!("Image for post {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    })
    .await?;

    let mime = ImageFormat::from_path(&filename)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

async fn delete_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<i64>, PathRejection>,
) -> FeedResult<StatusCode> {
    let Path(id) = id?;
    blocking(&state, move |ctx| posts::delete_post(ctx, &caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn new_ray(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    multipart: Result<Multipart, MultipartRejection>,
) -> FeedResult<(StatusCode, Json<PostView>)> {
    let multipart = multipart?;
    let form = read_form(multipart).await?;
    let picture = form
        .picture
        .ok_or_else(|| FeedError::invalid("picture", "An image file is required"))?;
    let post = ingest::ingest_image_as_post(&state, &caller, picture.bytes, picture.filename).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> FeedResult<Json<Vec<User>>> {
    let users = blocking(&state, move |ctx| gate::list_users(ctx, &caller)).await?;
    Ok(Json(users))
}

async fn set_role(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RoleUpdateRequest>, JsonRejection>,
) -> FeedResult<Json<User>> {
    let Path(id) = id?;
    let Json(req) = body?;
    let user = blocking(&state, move |ctx| {
        gate::authorize_admin(&caller)?;
        let role = req
            .role
            .parse::<Role>()
            .map_err(|e| FeedError::invalid("role", e.to_string()))?;
        gate::set_user_role(ctx, &caller, id, role)
    })
    .await?;
    Ok(Json(user))
}

fn account_response(user: User) -> AccountResponse {
    AccountResponse {
        avatar_url: account::avatar_url(&user),
        user,
    }
}

// -- Multipart --

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    text: HashMap<String, String>,
    picture: Option<UploadedFile>,
}

/// Collect text fields and the `picture` file part. An empty file part
/// (a form submitted without choosing a file) counts as no picture.
async fn read_form(mut multipart: Multipart) -> FeedResult<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "picture" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(bad_multipart)?;
            if !bytes.is_empty() {
                form.picture = Some(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
        } else {
            let value = field.text().await.map_err(bad_multipart)?;
            form.text.insert(name, value);
        }
    }
    Ok(form)
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> FeedError {
    FeedError::invalid("form", err.body_text())
}
