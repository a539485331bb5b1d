use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::directory::{REASON_BACKEND, REASON_NOT_FOUND, REASON_RATE_LIMIT, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    BackendTransient,
    NotFound,
    Fatal,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::BackendTransient)
    }
}

/// Reason code to [`ErrorClass`] lookup. Codes not in the table are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassTable {
    entries: HashMap<String, ErrorClass>,
}

impl Default for ErrorClassTable {
    fn default() -> Self {
        Self::empty()
            .with(REASON_RATE_LIMIT, ErrorClass::RateLimited)
            .with("userRateLimitExceeded", ErrorClass::RateLimited)
            .with("sharingRateLimitExceeded", ErrorClass::RateLimited)
            .with(REASON_BACKEND, ErrorClass::BackendTransient)
            .with("internalError", ErrorClass::BackendTransient)
            .with(REASON_NOT_FOUND, ErrorClass::NotFound)
    }
}

impl ErrorClassTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, reason: impl Into<String>, class: ErrorClass) -> Self {
        self.entries.insert(reason.into(), class);
        self
    }

    pub fn classify(&self, error: &RemoteError) -> ErrorClass {
        self.entries
            .get(error.reason.as_str())
            .copied()
            .unwrap_or(ErrorClass::Fatal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    /// `None` lets the delay keep growing.
    pub max_delay: Option<Duration>,
    /// Return to `base` after a call succeeds. Off by default: one slow
    /// stretch keeps the whole run paced conservatively.
    pub reset_on_success: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2,
            max_delay: None,
            reset_on_success: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{label}: not found: {source}")]
    NotFound {
        label: String,
        #[source]
        source: RemoteError,
    },
    #[error("{label} failed: {source}")]
    Fatal {
        label: String,
        #[source]
        source: RemoteError,
    },
}

impl RetryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetryError::NotFound { .. })
    }

    pub fn remote(&self) -> &RemoteError {
        match self {
            RetryError::NotFound { source, .. } | RetryError::Fatal { source, .. } => source,
        }
    }
}

/// Wraps remote calls and retries transient failures with exponential delay.
///
/// There is a single delay for the whole run: every retried call waits the
/// current delay and then multiplies it, no matter which call failed. Retries
/// are unbounded.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    policy: BackoffPolicy,
    table: ErrorClassTable,
    current_delay: Duration,
    retries: u64,
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), ErrorClassTable::default())
    }
}

impl RetryGovernor {
    pub fn new(policy: BackoffPolicy, table: ErrorClassTable) -> Self {
        Self {
            current_delay: policy.base,
            policy,
            table,
            retries: 0,
        }
    }

    /// Delay the next transient failure will wait.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub async fn call<T, F, Fut>(&mut self, label: &str, op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.run(label, false, op).await
    }

    /// Like [`RetryGovernor::call`], but a not-found answer is taken as the
    /// target not being visible yet and retried as well.
    pub async fn call_awaiting_visibility<T, F, Fut>(
        &mut self,
        label: &str,
        op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.run(label, true, op).await
    }

    async fn run<T, F, Fut>(
        &mut self,
        label: &str,
        retry_not_found: bool,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        loop {
            let error = match op().await {
                Ok(value) => {
                    if self.policy.reset_on_success {
                        self.current_delay = self.policy.base;
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            let class = self.table.classify(&error);
            let retry = class.is_transient() || (retry_not_found && class == ErrorClass::NotFound);
            if !retry {
                debug!(label, reason = %error.reason, ?class, "remote call failed");
                return Err(match class {
                    ErrorClass::NotFound => RetryError::NotFound {
                        label: label.to_string(),
                        source: error,
                    },
                    _ => RetryError::Fatal {
                        label: label.to_string(),
                        source: error,
                    },
                });
            }
            let delay = self.advance();
            warn!(
                label,
                reason = %error.reason,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Returns the delay to wait now and grows the shared delay.
    fn advance(&mut self) -> Duration {
        let delay = self.current_delay;
        let mut next = delay.saturating_mul(self.policy.multiplier.max(1));
        if let Some(max) = self.policy.max_delay {
            next = next.min(max);
        }
        self.current_delay = next;
        self.retries += 1;
        match self.policy.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Call, FolderDirectory, MemoryDirectory};
    use tokio::time::Instant;

    fn governor(base_ms: u64) -> RetryGovernor {
        RetryGovernor::new(
            BackoffPolicy {
                base: Duration::from_millis(base_ms),
                ..BackoffPolicy::default()
            },
            ErrorClassTable::default(),
        )
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[test]
    fn default_table_membership() {
        let table = ErrorClassTable::default();
        let class = |reason: &str| table.classify(&RemoteError::new(reason, ""));
        assert_eq!(class("rateLimitExceeded"), ErrorClass::RateLimited);
        assert_eq!(class("userRateLimitExceeded"), ErrorClass::RateLimited);
        assert_eq!(class("sharingRateLimitExceeded"), ErrorClass::RateLimited);
        assert_eq!(class("backendError"), ErrorClass::BackendTransient);
        assert_eq!(class("internalError"), ErrorClass::BackendTransient);
        assert_eq!(class("notFound"), ErrorClass::NotFound);
        assert_eq!(class("insufficientFilePermissions"), ErrorClass::Fatal);
        assert_eq!(class("transportError"), ErrorClass::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_one_two_four() {
        let directory = MemoryDirectory::new();
        for reason in ["rateLimitExceeded", "backendError", "userRateLimitExceeded"] {
            directory.fail_next(Call::CreateFolder, RemoteError::new(reason, "slow down"));
        }
        let mut governor = governor(100);

        let id = governor
            .call("create folder", || directory.create_folder("A", None))
            .await
            .unwrap();

        assert_eq!(id, "mem-1");
        assert_eq!(
            gaps(&directory.calls(Call::CreateFolder)),
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(governor.retries(), 3);
        assert_eq!(governor.current_delay(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_after_transient_failures_is_not_retried() {
        let directory = MemoryDirectory::new();
        for _ in 0..3 {
            directory.fail_next(Call::ListPermissions, RemoteError::new("backendError", ""));
        }
        let mut governor = governor(10);

        let err = governor
            .call("list permissions", || directory.list_permissions("ghost"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.remote().reason, "notFound");
        assert_eq!(directory.calls(Call::ListPermissions).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_shared_across_calls_and_never_reset() {
        let directory = MemoryDirectory::new();
        let mut governor = governor(50);
        directory.fail_next(Call::CreateFolder, RemoteError::new("backendError", ""));
        governor
            .call("first", || directory.create_folder("A", None))
            .await
            .unwrap();

        directory.fail_next(Call::CreateFolder, RemoteError::new("backendError", ""));
        let before = Instant::now();
        governor
            .call("second", || directory.create_folder("B", None))
            .await
            .unwrap();

        assert_eq!(before.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_on_success_restores_base_delay() {
        let directory = MemoryDirectory::new();
        let mut governor = RetryGovernor::new(
            BackoffPolicy {
                base: Duration::from_millis(50),
                reset_on_success: true,
                ..BackoffPolicy::default()
            },
            ErrorClassTable::default(),
        );
        directory.fail_next(Call::CreateFolder, RemoteError::new("backendError", ""));
        governor
            .call("first", || directory.create_folder("A", None))
            .await
            .unwrap();

        assert_eq!(governor.current_delay(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn max_delay_caps_growth() {
        let directory = MemoryDirectory::new();
        let mut governor = RetryGovernor::new(
            BackoffPolicy {
                base: Duration::from_millis(100),
                max_delay: Some(Duration::from_millis(150)),
                ..BackoffPolicy::default()
            },
            ErrorClassTable::default(),
        );
        for _ in 0..3 {
            directory.fail_next(Call::CreateFolder, RemoteError::new("backendError", ""));
        }
        governor
            .call("capped", || directory.create_folder("A", None))
            .await
            .unwrap();

        assert_eq!(
            gaps(&directory.calls(Call::CreateFolder)),
            [
                Duration::from_millis(100),
                Duration::from_millis(150),
                Duration::from_millis(150)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_calls_retry_not_found() {
        let directory = MemoryDirectory::new().with_visibility_lag(2);
        let mut governor = governor(10);
        let id = directory.create_folder("A", None).await.unwrap();
        let grant = crate::directory::PermissionGrant {
            role: crate::model::Role::Reader,
            email_address: "ann@example.com".into(),
            transfer_ownership: false,
            send_notification_email: false,
        };

        governor
            .call_awaiting_visibility("write permission", || {
                directory.write_permission(&id, &grant)
            })
            .await
            .unwrap();

        assert_eq!(directory.calls(Call::WritePermission).len(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_surface_unchanged() {
        let directory = MemoryDirectory::new();
        directory.fail_next(
            Call::CreateFolder,
            RemoteError::new("insufficientFilePermissions", "nope").with_status(403),
        );
        let mut governor = governor(10);

        let err = governor
            .call("create folder", || directory.create_folder("A", None))
            .await
            .unwrap_err();

        match err {
            RetryError::Fatal { source, .. } => {
                assert_eq!(source.status, Some(403));
                assert_eq!(source.reason, "insufficientFilePermissions");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(governor.retries(), 0);
    }
}
