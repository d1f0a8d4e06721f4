use thiserror::Error;

/// Failures raised by the browser capability.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("no visible element matched {0}")]
    NotFound(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("page is closed")]
    Closed,

    #[error("timed out after {ms} ms waiting for {what}")]
    Timeout { ms: u64, what: String },

    #[error("browser error: {0}")]
    Browser(String),
}

/// Failures of the language-model channel.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model request timed out")]
    Timeout,

    #[error("model API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("no content in model response: {0}")]
    MalformedBody(String),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no URL found in navigation step")]
    NoUrlFound,

    #[error("generated code is invalid: {0}")]
    SynthesisInvalid(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active context to recover a page from")]
    NoActiveContext,

    #[error("no open pages left in the active context")]
    NoActivePages,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution failed: {0}")]
    ExecutionFailed(#[from] PageError),

    #[error("execution panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ExecutionError>,
    },

    #[error("alternative strategy failed: {0}")]
    AlternativeStrategyFailed(String),
}

/// Why a single step could not produce a result.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<SessionError> for StepError {
    fn from(err: SessionError) -> Self {
        StepError::Execution(ExecutionError::Session(err))
    }
}

/// Errors surfaced to callers of [`crate::auto`].
#[derive(Debug, Error)]
pub enum AutoError {
    #[error("command produced no steps")]
    SegmentationEmpty,

    #[error("step \"{step}\" failed: {message}")]
    StepFailed { step: String, message: String },
}
