use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Cancellation and deadline of one caller operation.
///
/// Every store, reconciler and catalog call takes one. Engine awaits are
/// raced against it through [`OpContext::guard`].
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self { cancel: token, deadline: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::cancelled("operation cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::cancelled("deadline exceeded"));
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> EngineError {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => EngineError::cancelled("operation cancelled"),
            _ = deadline => EngineError::cancelled("deadline exceeded"),
        }
    }

    /// Run `fut` unless the context ends first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn guard_passes_through_results() {
        let ctx = OpContext::new();
        let v = ctx.guard(async { Ok::<_, EngineError>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn guard_fails_fast_when_cancelled() {
        let token = CancellationToken::new();
        let ctx = OpContext::with_cancel(token.clone());
        token.cancel();
        let err = ctx.guard(async { Ok::<_, EngineError>(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_enforces_deadline() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(50));
        let err = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, EngineError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(ctx.is_done());
    }
}
