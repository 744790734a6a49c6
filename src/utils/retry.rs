// file: src/utils/retry.rs
// version: 1.0.0
// guid: 3b5d7f9a-1c3e-4a6b-8d0f-2a4c6e8b0d2f

//! Bounded polling with a fixed interval and deadline

use crate::error::AutoInstallError;
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Future returned by a polling probe
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Call `probe` until it reports `true`, sleeping `interval` between attempts
///
/// Returns [`AutoInstallError::TimeoutError`] once `deadline` has elapsed
/// without success. Probe errors abort immediately.
pub async fn poll_until<S, F>(
    state: &mut S,
    policy: RetryPolicy,
    what: &str,
    mut probe: F,
) -> Result<()>
where
    S: ?Sized + Send,
    F: for<'a> FnMut(&'a mut S) -> ProbeFuture<'a> + Send,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if probe(state).await? {
            debug!("{} satisfied after {} attempt(s)", what, attempts);
            return Ok(());
        }
        if started.elapsed() + policy.interval > policy.deadline {
            return Err(AutoInstallError::TimeoutError(format!(
                "{} not reached within {:?} ({} attempts)",
                what, policy.deadline, attempts
            )));
        }
        tokio::time::sleep(policy.interval).await;
    }
}
