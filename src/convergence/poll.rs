//! Polling helpers for observing converged state.
//!
//! Writes are visible immediately in the store, but the rendered value only
//! counts once the correlation tag matches the change that produced it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{ManifestObject, ObjectKey};
use crate::store::ResourceStore;
use crate::transform::{args, CORRELATION_TAG};

/// Poll `probe` every `interval` until it succeeds or `timeout` elapses.
///
/// The probe returns `Err(reason)` while the condition does not hold yet; the
/// last reason is reported in the timeout error.
pub async fn eventually<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let reason = match probe().await {
            Ok(value) => return Ok(value),
            Err(reason) => reason,
        };
        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                operation: format!("waiting for {}", reason),
                after: timeout,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until the live object carries `marker` in its correlation annotation
/// and `container` has the argument `prefix` set to `expected`.
pub async fn await_argument<S: ResourceStore>(
    store: &S,
    key: &ObjectKey,
    container: &str,
    prefix: &str,
    expected: &str,
    marker: &str,
    timeout: Duration,
) -> Result<ManifestObject> {
    eventually(timeout, Duration::from_millis(20), move || async move {
        let live = store.get(key).await.map_err(|e| e.to_string())?;
        let tag = live.metadata.annotations.get(CORRELATION_TAG).map(String::as_str);
        if tag != Some(marker) {
            return Err(format!("{} tag {:?} on {}", CORRELATION_TAG, marker, key));
        }
        let actual = args::find(&live, container, prefix).map_err(|e| e.to_string())?;
        if actual != expected {
            return Err(format!("{}{} on {} (found {})", prefix, expected, key, actual));
        }
        Ok(live)
    })
    .await
}
