//! Multicast completion signal.
//!
//! [`CompletionSignal`] is a broadcast stream with an explicit end-of-stream
//! sentinel and a way to hold the producer back until a target number of
//! subscribers is attached. The engine uses it to release fan-out loaders
//! only after every reader is registered; tests and callers can use it as a
//! general value multicast.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

/// Upper bound on waiting for subscribers to attach. Expiry is a
/// coordination failure, not an error: the caller decides how to proceed.
const SUBSCRIBER_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIBER_POLL_INTERVAL: Duration = Duration::from_millis(5);

enum Event<T> {
    Item(T),
    Complete,
}

impl<T: Clone> Clone for Event<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Item(v) => Self::Item(v.clone()),
            Self::Complete => Self::Complete,
        }
    }
}

/// Multicast channel with a terminal completion sentinel.
///
/// Values are delivered to every subscriber in emission order, buffered up
/// to the configured capacity. Subscribers attached after [`complete`]
/// observe an already-ended stream.
///
/// [`complete`]: CompletionSignal::complete
pub struct CompletionSignal<T> {
    tx: broadcast::Sender<Event<T>>,
    completed: Arc<AtomicBool>,
}

impl<T> Clone for CompletionSignal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            completed: Arc::clone(&self.completed),
        }
    }
}

impl<T: Clone + Send + 'static> CompletionSignal<T> {
    /// New signal buffering up to `capacity` undelivered events per
    /// subscriber. A subscriber that falls further behind skips ahead
    /// (oldest events are overwritten).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Broadcast a value to all current subscribers.
    ///
    /// A value emitted after [`complete`](Self::complete), or while nobody
    /// is subscribed, is dropped.
    pub fn emit(&self, value: T) {
        if self.completed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(Event::Item(value));
    }

    /// Broadcast the terminal sentinel: every subscriber's stream ends
    /// cleanly at this point.
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Event::Complete);
    }

    /// Attach a new subscriber.
    ///
    /// Only events emitted after attachment are observed; attaching after
    /// completion yields an immediately-ended stream.
    #[must_use]
    pub fn subscribe(&self) -> Subscriber<T> {
        let rx = self.tx.subscribe();
        Subscriber {
            rx,
            done: self.completed.load(Ordering::Acquire),
        }
    }

    /// Current number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Suspend until at least `n` subscribers are attached, bounded by a
    /// fixed timeout. Returns `false` when the count was not reached in
    /// time, a non-fatal coordination failure.
    pub async fn wait_for_subscribers(&self, n: usize) -> bool {
        self.wait_for_subscribers_within(n, SUBSCRIBER_WAIT_TIMEOUT)
            .await
    }

    pub(crate) async fn wait_for_subscribers_within(&self, n: usize, limit: Duration) -> bool {
        let poll = async {
            while self.tx.receiver_count() < n {
                tokio::time::sleep(SUBSCRIBER_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(limit, poll).await.is_ok()
    }
}

/// Receiving half of a [`CompletionSignal`].
pub struct Subscriber<T> {
    rx: broadcast::Receiver<Event<T>>,
    done: bool,
}

impl<T: Clone> Subscriber<T> {
    /// Receive the next value, or `None` once the signal completed (or the
    /// last sender was dropped).
    pub async fn recv(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(Event::Item(value)) => return Some(value),
                Ok(Event::Complete) | Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Completion signal subscriber lagged");
                }
            }
        }
    }
}
