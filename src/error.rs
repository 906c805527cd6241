use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

/// Failure of the underlying key-value or snapshot backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend rejected or lost the request (connection reset, timeout, ...).
    #[error("store backend: {0}")]
    Backend(String),
    /// A key holds a value of a different shape than the operation expects.
    #[error("wrong value type at key {key}")]
    WrongType { key: String },
    /// A stored record failed to parse back into its typed form.
    #[error("corrupt record at key {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

/// Engine-level errors. Rule violations (out of range, insufficient energy,
/// not owner, ...) are NOT errors: they are variants of the operation's
/// outcome type. Only programmer errors, store I/O and cancellation surface
/// through `Err`.
#[derive(Debug, Clone, Error)]
pub enum WorldError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
}

impl WorldError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        WorldError::InvalidArgument(msg.into())
    }
}

/// Owning side of a cooperative cancellation signal.
///
/// Engine operations and the background loops poll the token before every
/// I/O phase; once triggered, no further store calls are issued.
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            _keepalive: Some(self.tx.clone()),
        }
    }

    /// Signal every outstanding token. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaply clonable view of a `Shutdown` signal.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the channel alive for detached tokens (`CancelToken::none`).
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that never fires, for tests and fire-and-forget callers.
    pub fn none() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Bail out with `WorldError::Cancelled` once the signal has fired.
    pub fn bail(&self) -> Result<(), WorldError> {
        if self.is_cancelled() {
            Err(WorldError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when the signal fires. Used in `tokio::select!` arms.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender gone: treat a dead channel as cancelled.
                return;
            }
        }
    }
}
