// * Single cancelable deferred flush
// * At most one timer task is outstanding; every new arm aborts the previous one

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct PendingFlush {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Debounce timer driving the collector's flushes.
///
/// `on_fire` receives the generation it was armed with; the owner passes it
/// back to [`FlushTimer::take_if_current`] so a fire that lost a race with
/// `cancel`/`rearm` is recognised as stale and ignored.
#[derive(Debug)]
pub struct FlushTimer {
    delay: Duration,
    pending: Option<PendingFlush>,
    next_generation: u64,
}

impl FlushTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next_generation: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Arms the timer unless a flush is already pending. Returns true if armed.
    pub fn schedule<F>(&mut self, on_fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.pending.is_some() {
            return false;
        }
        self.arm(on_fire)
    }

    /// Cancels any pending flush and arms a fresh one from now.
    pub fn rearm<F>(&mut self, on_fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.arm(on_fire)
    }

    /// Drops the pending flush, if any. Returns true if one was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    /// Claims the pending slot for a firing timer. False means the fire is stale.
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    fn arm<F>(&mut self, on_fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        // * Outside a runtime there is nothing to defer onto; the next visibility flush covers it
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime available, flush not scheduled");
                return false;
            }
        };

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let deadline = Instant::now() + self.delay;

        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_fire(generation);
        });

        self.pending = Some(PendingFlush {
            generation,
            deadline,
            task,
        });
        true
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
