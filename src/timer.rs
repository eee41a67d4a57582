//! Schedule-once timer with cancellation and a queryable pending state.
//!
//! Every `schedule` hands the callback a [`TimerToken`]. A callback that reaches
//! shared state late, after the timer was rescheduled, can detect that its token
//! is stale through [`OneShotTimer::fire`] and do nothing.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

#[derive(Debug, Default)]
pub struct OneShotTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any pending run and schedules `make(token)` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&mut self, delay: Duration, make: F) -> TimerToken
    where
        F: FnOnce(TimerToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let token = TimerToken(self.generation);
        let task = make(token);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
        token
    }

    /// Aborts the pending run. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Called by the scheduled callback. Returns true and disarms the timer when
    /// `token` is still current; a stale token leaves the timer untouched.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if token.0 != self.generation || self.handle.is_none() {
            return false;
        }
        // Detach without aborting: the caller is the running task itself.
        self.handle = None;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
