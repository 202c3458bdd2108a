use std::fmt;
use std::time::Duration;

use screen_config::CreationStrategy;
use thiserror::Error;

/// Failures surfaced by [`crate::screen::ScreenTextureManager`].
#[derive(Debug, Error)]
pub enum ScreenError {
    /// The scene has no material with the configured name (or no scene yet).
    #[error("{name} material not found")]
    MaterialNotFound { name: String },

    /// The supplied bytes could not be turned into a usable image.
    #[error("failed to decode image")]
    ImageDecodeFailed(#[from] DecodeError),

    /// The render host did not become ready within the configured wait.
    #[error("render host not ready (waited {waited:?})")]
    HostNotReady { waited: Duration },

    /// Every texture creation strategy was refused by the backend.
    #[error("texture backend rejected the composited surface")]
    TextureBackendRejected(#[from] BackendRejection),

    /// The resampler could not scale the source onto the working surface.
    #[error("failed to composite image onto the working surface")]
    Composite(#[source] CompositeError),
}

impl ScreenError {
    /// Short message suitable for a status line in the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::MaterialNotFound { name } => format!("{name} material not found."),
            Self::ImageDecodeFailed(_) => "Could not read that image. Try another file.".into(),
            Self::HostNotReady { .. } => "The model is still loading. Try again shortly.".into(),
            Self::TextureBackendRejected(_) | Self::Composite(_) => {
                "Failed to apply image. Try another file / refresh.".into()
            }
        }
    }

    /// Whether the same request may succeed once the host finishes loading.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HostNotReady { .. })
    }
}

impl From<CompositeError> for ScreenError {
    fn from(err: CompositeError) -> Self {
        match err {
            CompositeError::EmptySource { width, height } => {
                Self::ImageDecodeFailed(DecodeError::ZeroDimension { width, height })
            }
            other => Self::Composite(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,

    #[error("image data is corrupt or in an unsupported format")]
    Malformed(#[source] image::ImageError),

    #[error("decoded image has a zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },

    #[error("decode task did not complete")]
    Interrupted(#[source] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("source image has a zero dimension ({width}x{height})")]
    EmptySource { width: u32, height: u32 },

    #[error("failed to prepare resampling buffers")]
    Buffer(#[from] fast_image_resize::ImageBufferError),

    #[error("resampling failed")]
    Resize(#[from] fast_image_resize::ResizeError),
}

/// Error reported by a render host when asked to create a texture.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("render host is not ready")]
    NotReady,

    #[error("texture creation rejected")]
    Rejected(#[source] anyhow::Error),
}

/// One failed creation attempt.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: CreationStrategy,
    pub cause: anyhow::Error,
}

/// Every configured strategy failed; attempts are kept in the order tried.
#[derive(Debug)]
pub struct BackendRejection {
    attempts: Vec<StrategyFailure>,
}

impl BackendRejection {
    pub(crate) fn new(attempts: Vec<StrategyFailure>) -> Self {
        Self { attempts }
    }

    pub fn attempts(&self) -> &[StrategyFailure] {
        &self.attempts
    }
}

impl fmt::Display for BackendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("all texture creation strategies failed")?;
        for (idx, attempt) in self.attempts.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {:#}", attempt.strategy.as_str(), attempt.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendRejection {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.attempts
            .first()
            .map(|attempt| -> &(dyn std::error::Error + 'static) { attempt.cause.as_ref() })
    }
}
