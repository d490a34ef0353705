use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::storage::BlobStore;

/// Backoff schedule for transient store errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
        }
    }
}

/// Wraps any [`BlobStore`] and absorbs `Transient` errors with bounded
/// exponential backoff. `BlockNotFound` and `Fatal` pass through untouched.
pub struct RetryingStore {
    inner: Arc<dyn BlobStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn BlobStore>, mut policy: RetryPolicy) -> Self {
        policy.attempts = policy.attempts.max(1);
        Self { inner, policy }
    }

    fn retry<T>(&self, op_name: &str, f: impl Fn() -> Result<T>) -> Result<T> {
        let mut delay = self.policy.initial_delay;
        let mut last_err = None;

        for attempt in 0..self.policy.attempts {
            if attempt > 0 {
                std::thread::sleep(delay);
                delay = (delay * 2).min(self.policy.max_delay);
            }
            match f() {
                Ok(val) => return Ok(val),
                Err(e) if e.is_transient() && attempt + 1 < self.policy.attempts => {
                    warn!(
                        "{op_name}: transient store error (attempt {}/{}), retrying: {e}",
                        attempt + 1,
                        self.policy.attempts,
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("retry loop exits early unless an error was recorded"))
    }
}

impl BlobStore for RetryingStore {
    fn put_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        self.retry("put_blob", || self.inner.put_blob(name, data))
    }

    fn get_blob(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.retry("get_blob", || self.inner.get_blob(name, offset, length))
    }

    fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        self.retry("list_blobs", || self.inner.list_blobs(prefix))
    }

    fn delete_blob(&self, name: &str) -> Result<()> {
        self.retry("delete_blob", || self.inner.delete_blob(name))
    }

    fn blob_size(&self, name: &str) -> Result<u64> {
        self.retry("blob_size", || self.inner.blob_size(name))
    }
}
