//! What the [`crate::Client`] does when a call fails.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::InvocationError;

/// Decides, per failure, whether a call is sent again.
pub trait RetryPolicy: Send + Sync + 'static {
    /// `Continue(delay)` sleeps for `delay` and resends; `Break` returns
    /// the error to the caller.
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// One failed attempt of a call.
#[derive(Debug)]
pub struct RetryContext {
    /// Failures so far, this one included.
    pub fail_count: NonZeroU32,
    /// Time already spent sleeping for this call.
    pub slept_so_far: Duration,
    pub error: InvocationError,
}

/// Surface every error.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetries;

impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Sleep through short wait-style errors (`FLOOD_WAIT`, `SLOWMODE_WAIT`, …)
/// and give dropped connections a moment to come back.
#[derive(Clone, Debug)]
pub struct AutoSleep {
    /// Waits longer than this are returned to the caller.
    pub threshold: Duration,
    /// Sleep this long after an I/O error, then resend. `None` surfaces
    /// I/O errors immediately.
    pub io_errors_as_flood_of: Option<Duration>,
    /// Failures of one call after which nothing is retried.
    pub max_attempts: u32,
}

impl Default for AutoSleep {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(60),
            io_errors_as_flood_of: Some(Duration::from_secs(1)),
            max_attempts: 1,
        }
    }
}

impl RetryPolicy for AutoSleep {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        if ctx.fail_count.get() > self.max_attempts {
            return ControlFlow::Break(());
        }
        let delay = match (&ctx.error, ctx.error.flood_wait_seconds()) {
            (_, Some(secs)) if Duration::from_secs(secs) <= self.threshold => Duration::from_secs(secs),
            (InvocationError::Io(_), _) => match self.io_errors_as_flood_of {
                Some(delay) => delay,
                None => return ControlFlow::Break(()),
            },
            _ => return ControlFlow::Break(()),
        };
        tracing::info!("[tether] {}, retrying in {delay:?}", ctx.error);
        ControlFlow::Continue(delay)
    }
}
