use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};

use crate::transport::message::Message;
use crate::utils::error::ChannelError;

/// Terminal result of a command: the acknowledging message (if the command
/// waits for one) or the cause of failure.
pub type Outcome = Result<Option<Message>, ChannelError>;

/// A one-shot handle on the outcome of a sent message.
///
/// Clones share the same state. The outcome is set exactly once; every later
/// attempt to complete it is ignored, so normal completion, cancellation and
/// close-triggered failure can race freely. Callers either block with
/// [`Completion::wait`] or `.await` the handle.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
    waker: AtomicWaker,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outcome. Returns false if the handle was already complete.
    pub fn complete(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.inner.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.inner.done.notify_all();
        self.inner.waker.wake();
        true
    }

    pub fn succeed(&self, ack: Option<Message>) -> bool {
        self.complete(Ok(ack))
    }

    pub fn fail(&self, cause: ChannelError) -> bool {
        self.complete(Err(cause))
    }

    pub fn cancel(&self) -> bool {
        self.fail(ChannelError::Cancelled)
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }

    /// The outcome, if one has been set.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.lock().clone()
    }

    /// Blocks the calling thread until the outcome is known.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Like [`Completion::wait`] but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            if self.inner.done.wait_until(&mut slot, deadline).timed_out() {
                return (*slot).clone();
            }
        }
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.outcome() {
            return Poll::Ready(outcome);
        }
        self.inner.waker.register(cx.waker());
        // re-check: complete() may have run between the first check and register
        match self.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}
