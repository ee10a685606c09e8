use thiserror::Error;

/// A render surface could not be created. Fatal to the owning target only.
#[derive(Debug, Clone, Error)]
#[error("failed to allocate {width}x{height} render surface: {reason}")]
pub struct AllocationError {
    pub width: u32,
    pub height: u32,
    pub reason: String,
}

impl AllocationError {
    pub fn new(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self {
            width,
            height,
            reason: reason.into(),
        }
    }
}

/// Source failed to translate, validate or link. Carries the backend diagnostic.
#[derive(Debug, Clone, Error)]
#[error("{diagnostic}")]
pub struct CompileError {
    diagnostic: String,
}

impl CompileError {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }
}

/// Invalid identifiers or indices. Operations reporting it change no state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown pass '{0}'")]
    UnknownPass(String),
    #[error("channel {0} exceeds supported channel count (4)")]
    ChannelOutOfRange(usize),
    #[error("buffer index {0} is outside A-D")]
    BufferIndexOutOfRange(usize),
    #[error("legacy channel binding {0} is not -1, 0-99 or 100-103")]
    InvalidLegacyBinding(i32),
    #[error("pass '{0}' is not renderable")]
    NotRenderable(&'static str),
}
