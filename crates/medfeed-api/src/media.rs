use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{info, warn};

/// Stored images are shrunk to fit inside this square.
pub const THUMBNAIL_BOUND: u32 = 256;

/// Random bytes in a stored filename (hex-encoded, so twice as many chars).
const FILENAME_TOKEN_BYTES: usize = 8;

/// The two flat directories under the media root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Profile pictures, publicly served.
    Avatars,
    /// Classifier inputs, served only through the post gate.
    Rays,
}

impl Namespace {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Avatars => "avatars",
            Namespace::Rays => "rays",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("unsupported image extension '{0}'")]
    UnsupportedFormat(String),

    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// The upload itself was unusable, as opposed to the disk failing.
    pub fn is_bad_input(&self) -> bool {
        !matches!(self, StorageError::Io(_))
    }
}

/// Flat on-disk image store, one directory per `Namespace`.
///
/// Files are named `{random hex}{original extension}`. The random token is the
/// only thing keeping concurrent uploads apart; there is no locking.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        for ns in [Namespace::Avatars, Namespace::Rays] {
            std::fs::create_dir_all(root.join(ns.dir_name()))?;
        }
        info!("Media storage directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    /// Path for a stored filename, or `None` if the name could escape the
    /// namespace directory.
    pub fn path_of(&self, ns: Namespace, filename: &str) -> Option<PathBuf> {
        let bare = Path::new(filename).file_name()?;
        if bare != filename || filename.contains(|c: char| c == '/' || c == '\\') {
            return None;
        }
        Some(self.dir(ns).join(bare))
    }

    /// Decode `bytes`, shrink to the thumbnail bound and write under a fresh
    /// random name. Returns the stored filename.
    pub fn store_thumbnail(
        &self,
        ns: Namespace,
        bytes: &[u8],
        original_filename: &str,
    ) -> Result<String, StorageError> {
        let filename = random_filename(original_filename);
        let ext = extension_of(original_filename);
        let format = ImageFormat::from_extension(ext)
            .ok_or_else(|| StorageError::UnsupportedFormat(ext.to_string()))?;

        let img = image::load_from_memory(bytes).map_err(StorageError::Decode)?;

        let mut img = fit_within(img, THUMBNAIL_BOUND);
        if format == ImageFormat::Jpeg && img.color().has_alpha() {
            img = DynamicImage::ImageRgb8(img.to_rgb8());
        }

        let path = self.dir(ns).join(&filename);
        img.save_with_format(&path, format).map_err(|e| match e {
            image::ImageError::IoError(io) => StorageError::Io(io),
            other => StorageError::Encode(other),
        })?;

        info!(
            "Stored {} image {} ({}x{})",
            ns.dir_name(),
            filename,
            img.width(),
            img.height()
        );
        Ok(filename)
    }

    pub fn read(&self, ns: Namespace, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_of(ns, filename).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("'{}' is not a stored filename", filename),
            ))
        })?;
        Ok(std::fs::read(path)?)
    }

    pub fn exists(&self, ns: Namespace, filename: &str) -> bool {
        self.path_of(ns, filename).is_some_and(|p| p.is_file())
    }

    /// Best-effort cleanup: remove a stored file, logging instead of
    /// propagating any failure. Returns whether a file was removed.
    pub fn remove_best_effort(&self, ns: Namespace, filename: &str) -> bool {
        let Some(path) = self.path_of(ns, filename) else {
            warn!("Refusing to remove suspicious media name '{}'", filename);
            return false;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed {}", path.display());
                true
            }
            Err(e) => {
                warn!("Best-effort removal of {} failed: {}", path.display(), e);
                false
            }
        }
    }
}

/// `{16 hex chars}{.ext}`, the extension copied verbatim from the upload.
pub fn random_filename(original_filename: &str) -> String {
    let token = crate::random_hex(FILENAME_TOKEN_BYTES);
    match Path::new(original_filename).extension() {
        Some(ext) => format!("{}.{}", token, ext.to_string_lossy()),
        None => token,
    }
}

fn extension_of(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

/// Shrink to fit inside `bound`x`bound`, keeping the aspect ratio. Images
/// already inside the box are returned untouched.
pub fn fit_within(img: DynamicImage, bound: u32) -> DynamicImage {
    if img.width() <= bound && img.height() <= bound {
        return img;
    }
    img.thumbnail(bound, bound)
}
