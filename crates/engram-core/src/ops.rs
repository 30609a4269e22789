//! Operation-id propagation and the operation driver.
//!
//! Every externally visible call gets a short operation id (the first 8 hex
//! chars of a fresh UUID). The id is installed as a field on a tracing span
//! that wraps the whole operation, so it survives every suspension point and
//! prefixes every log line emitted underneath, including from spawned
//! blocking work that is awaited inside the span.

use std::future::Future;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::error::{EngramError, Result};

/// Allocate a fresh operation id.
pub fn new_op_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ============================================================================
// OPERATION DRIVER
// ============================================================================

/// Drives one tool call end to end: op-id allocation, span installation,
/// timeout enforcement, and error mapping.
#[derive(Debug, Clone)]
pub struct OperationDriver {
    timeout: Duration,
}

impl OperationDriver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `fut` under a fresh operation id and the configured deadline.
    ///
    /// The span (and with it the id) is dropped when the future resolves,
    /// success or failure.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_inherited(operation, new_op_id(), fut).await
    }

    /// Run `fut` under an operation id handed down by the caller.
    pub async fn run_inherited<T, F>(
        &self,
        operation: &'static str,
        op_id: String,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let seconds = self.timeout.as_secs();
        let span = tracing::info_span!("op", op = %op_id, operation);
        async move {
            match tokio::time::timeout(self.timeout, fut).await {
                Ok(result) => {
                    if let Err(ref err) = result {
                        tracing::warn!(code = err.error_code(), "{err}");
                    }
                    result
                }
                Err(_) => {
                    tracing::error!("operation timed out after {seconds}s");
                    Err(EngramError::timeout(operation, seconds))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Wrap a single outbound call in the per-call ceiling.
///
/// This is the inner guard around individual store and embedding calls; the
/// driver's deadline bounds the whole operation.
pub async fn with_ceiling<T, F>(timeout: Duration, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngramError::timeout(what, timeout.as_secs())),
    }
}

// ============================================================================
// TESTS
// ============================================================================
