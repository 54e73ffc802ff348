//! Boundary to the external image classifier.
//!
//! The classifier is opaque: it gets the path of a stored image and answers
//! with one label. Calls are synchronous and may be slow, so callers run them
//! on a blocking worker under a timeout (see `ingest`).

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use medfeed_types::models::TITLE_MAX_LEN;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier could not be started: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("classifier returned no label")]
    EmptyLabel,

    #[error("classifier label is {0} characters, limit is 100")]
    LabelTooLong(usize),

    #[error("classifier timed out after {0:?}")]
    TimedOut(Duration),

    #[error("classifier worker crashed: {0}")]
    Crashed(String),

    #[error("no classifier is configured")]
    Unavailable,
}

pub trait Classifier: Send + Sync {
    /// Label the image stored at `image_path`.
    fn classify(&self, image_path: &Path) -> Result<String, ClassifierError>;
}

/// Runs an external program with the image path appended as the last
/// argument. Exit status 0 is required; the label is the last non-empty line
/// of stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line, e.g.
    /// `python3 predict.py --model chest.h5`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, image_path: &Path) -> Result<String, ClassifierError> {
        debug!("Running classifier {} on {}", self.program, image_path.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .map_err(ClassifierError::Spawn)?;

        if !output.status.success() {
            return Err(ClassifierError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let label = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("");
        normalize_label(label)
    }
}

/// Stand-in when no classifier is configured: every upload fails cleanly.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableClassifier;

impl Classifier for UnavailableClassifier {
    fn classify(&self, _image_path: &Path) -> Result<String, ClassifierError> {
        Err(ClassifierError::Unavailable)
    }
}

/// A label becomes a post title, so it must be non-empty and fit the title bound.
pub fn normalize_label(raw: &str) -> Result<String, ClassifierError> {
    let label = raw.trim();
    if label.is_empty() {
        return Err(ClassifierError::EmptyLabel);
    }
    let len = label.chars().count();
    if len > TITLE_MAX_LEN {
        return Err(ClassifierError::LabelTooLong(len));
    }
    Ok(label.to_string())
}
