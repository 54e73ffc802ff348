//! Image upload → classifier → post.
//!
//! Steps run strictly in order: store the thumbnail, classify it, insert the
//! post. The post insert is the only commit point. When classification fails
//! the stored image stays on disk; no rollback is attempted.

use std::path::PathBuf;

use tracing::{info, warn};

use medfeed_types::api::NewPostRequest;
use medfeed_types::models::PostView;

use crate::classifier::{ClassifierError, normalize_label};
use crate::error::FeedResult;
use crate::identity::Caller;
use crate::media::Namespace;
use crate::posts;
use crate::state::{AppState, blocking};

pub async fn ingest_image_as_post(
    state: &AppState,
    caller: &Caller,
    bytes: Vec<u8>,
    original_filename: String,
) -> FeedResult<PostView> {
    let username = caller.require_user()?.username.clone();

    let filename = blocking(state, move |ctx| {
        Ok(ctx
            .media
            .store_thumbnail(Namespace::Rays, &bytes, &original_filename)?)
    })
    .await?;

    let path = state.media.dir(Namespace::Rays).join(&filename);
    let label = match classify(state, path).await {
        Ok(label) => label,
        Err(e) => {
            warn!(
                "Classifier failed for upload by {}; {} left in storage: {}",
                username, filename, e
            );
            return Err(e.into());
        }
    };

    let caller = caller.clone();
    let post = blocking(state, move |ctx| {
        posts::create_post(
            ctx,
            &caller,
            &NewPostRequest {
                title: label,
                content: filename,
            },
        )
    })
    .await?;

    info!("Classified upload by {} as '{}'", username, post.post.title);
    Ok(post)
}

/// Run the classifier on a blocking worker, bounded by the configured timeout.
async fn classify(state: &AppState, path: PathBuf) -> Result<String, ClassifierError> {
    let classifier = state.classifier.clone();
    let limit = state.classifier_timeout;
    let task = tokio::task::spawn_blocking(move || classifier.classify(&path));

    match tokio::time::timeout(limit, task).await {
        Err(_) => Err(ClassifierError::TimedOut(limit)),
        Ok(Err(join)) => Err(ClassifierError::Crashed(join.to_string())),
        Ok(Ok(result)) => normalize_label(&result?),
    }
}
