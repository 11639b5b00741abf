use thiserror::Error;

/// Failures at the cache store boundary.
///
/// Never fatal to a request: callers degrade to "miss" on reads and
/// "skip save" on writes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store backend failure: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Failures inside the fragment sub-render pipeline.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no render action registered for `{action}`")]
    UnknownAction { action: String },
    #[error("host pipeline failure: {message}")]
    Pipeline { message: String },
    #[error("block `{block}` failed to render: {message}")]
    Block { block: String, message: String },
}

impl RenderError {
    pub fn unknown_action(action: impl Into<String>) -> Self {
        Self::UnknownAction {
            action: action.into(),
        }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }

    pub fn block(block: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Block {
            block: block.into(),
            message: message.into(),
        }
    }
}

/// Startup-time registration failures.
///
/// Unlike the serve-time errors above, these are surfaced to the host so a
/// misconfigured action table fails fast instead of silently shadowing.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("render action `{action}` is already registered")]
    DuplicateAction { action: String },
}
