/// Shared error type used across all docent crates.
///
/// The `Config`, `Index`, `Capability`, `Turn`, and `TaskStep` variants form
/// the failure taxonomy each subsystem reports; the remaining variants carry
/// transport-level failures from collaborators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Invalid parameters or configuration. Programmer error at the call site.
    #[error("config: {0}")]
    Config(String),

    /// Embedding or vector-index I/O failure.
    #[error("index: {0}")]
    Index(String),

    /// A capability handler failed.
    #[error("capability {name}: {message}")]
    Capability { name: String, message: String },

    /// Model invocation failed mid-turn.
    #[error("turn: {0}")]
    Turn(String),

    /// A durable task step body failed.
    #[error("task step {step}: {message}")]
    TaskStep { step: String, message: String },

    #[error("store: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
