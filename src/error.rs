use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by every stage of a registration session.
///
/// All variants are terminal for the run: the session reports the failure
/// and stops, there is no retry path.
#[derive(Error, Debug)]
pub enum CpdError {
    #[error("failed to load point cloud {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("render error: {0}")]
    Render(String),
}

impl CpdError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> CpdError {
        CpdError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CpdError>;
