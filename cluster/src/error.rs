//! Group-level errors.

use std::sync::Arc;

/// Error type produced by backend [`crate::Getter`] implementations.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by group operations.
///
/// `Clone` because a single load result is broadcast to every coalesced
/// waiter; the loader failure keeps its cause behind an `Arc` for that
/// reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GroupError {
    #[error("key is required")]
    KeyRequired,
    #[error("value is required")]
    ValueRequired,
    #[error("cache group is closed")]
    Closed,
    #[error("failed to load {key}: {cause}")]
    Load {
        key: String,
        cause: Arc<LoaderError>,
    },
}

impl GroupError {
    pub(crate) fn load(key: &str, cause: LoaderError) -> Self {
        Self::Load {
            key: key.to_string(),
            cause: Arc::new(cause),
        }
    }
}
