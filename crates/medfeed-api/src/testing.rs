//! Fixtures shared by the unit tests in this crate.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbaImage};
use medfeed_db::Database;
use medfeed_types::api::{LoginRequest, RegisterRequest};
use medfeed_types::models::{Role, User};

use crate::classifier::{Classifier, ClassifierError, UnavailableClassifier};
use crate::identity::{self, Caller, Session};
use crate::media::MediaStore;
use crate::state::{AppContext, AppState, SessionSettings};

pub const PASSWORD: &str = "pw123";

pub struct TestApp {
    pub ctx: AppState,
    _media_dir: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_classifier(Arc::new(UnavailableClassifier))
    }

    pub fn with_classifier(classifier: Arc<dyn Classifier>) -> Self {
        let media_dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(
            Database::open_in_memory().unwrap(),
            MediaStore::new(media_dir.path().to_path_buf()).unwrap(),
            classifier,
            SessionSettings {
                jwt_secret: "test-secret-key-at-least-32-bytes-long".into(),
                ..SessionSettings::default()
            },
        )
        .with_classifier_timeout(Duration::from_millis(500));
        Self {
            ctx: Arc::new(ctx),
            _media_dir: media_dir,
        }
    }
}

pub fn register_user(app: &TestApp, username: &str, email: &str) -> User {
    identity::register(
        &app.ctx,
        &RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: PASSWORD.into(),
        },
    )
    .unwrap()
}

/// Register `username` with `{username}@x.com` and the given role.
pub fn user_with_role(app: &TestApp, username: &str, role: Role) -> User {
    let user = register_user(app, username, &format!("{}@x.com", username));
    app.ctx.db.update_user_role(user.id, role).unwrap();
    User { role, ..user }
}

pub fn login(app: &TestApp, user: &User) -> Session {
    identity::authenticate(
        &app.ctx,
        &LoginRequest {
            email: user.email.clone(),
            password: PASSWORD.into(),
            remember: false,
        },
    )
    .unwrap()
}

/// A signed-in caller for `user`, resolved the same way a request would be.
pub fn caller_for(app: &TestApp, user: &User) -> Caller {
    let session = login(app, user);
    identity::resolve_caller(&app.ctx, Some(&session.token)).unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Always answers with the same label and counts its calls.
pub struct FixedClassifier {
    pub label: String,
    pub calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Classifier for FixedClassifier {
    fn classify(&self, image_path: &Path) -> Result<String, ClassifierError> {
        assert!(image_path.is_file(), "classifier ran before the image was stored");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.label.clone())
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn classify(&self, _image_path: &Path) -> Result<String, ClassifierError> {
        Err(ClassifierError::Failed {
            status: "exit status: 1".into(),
            stderr: "model not loaded".into(),
        })
    }
}

pub struct SlowClassifier(pub Duration);

impl Classifier for SlowClassifier {
    fn classify(&self, _image_path: &Path) -> Result<String, ClassifierError> {
        std::thread::sleep(self.0);
        Ok("Normal".into())
    }
}
