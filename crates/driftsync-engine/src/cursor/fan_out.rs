//! Fan-out over a single-pass source.
//!
//! [`FanOutCursor`] lets several independent readers consume one
//! forward-only iterator at their own pace without re-querying the source.
//! Items are buffered only between the fastest and the slowest live
//! reader: once every tracked reader has consumed the buffer head it is
//! evicted, so memory is bounded by reader spread, not stream length.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

struct Shared<T> {
    source: Box<dyn Iterator<Item = T> + Send>,
    buffer: VecDeque<T>,
    /// Buffer index of each live reader, keyed by reader id. Owned here so
    /// a dropped reader can deregister itself and release the buffer.
    positions: HashMap<u64, usize>,
    next_reader_id: u64,
    exhausted: bool,
}

impl<T> Shared<T> {
    /// Evict buffer items every tracked reader has already consumed.
    fn prune(&mut self) {
        while let Some(min) = self.positions.values().copied().min() {
            if min == 0 || self.buffer.is_empty() {
                break;
            }
            self.buffer.pop_front();
            for pos in self.positions.values_mut() {
                *pos -= 1;
            }
        }
    }
}

/// Splits one forward-only iterator into independent shared-buffer readers.
pub struct FanOutCursor<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for FanOutCursor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> FanOutCursor<T> {
    pub fn new(source: impl Iterator<Item = T> + Send + 'static) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                source: Box::new(source),
                buffer: VecDeque::new(),
                positions: HashMap::new(),
                next_reader_id: 0,
                exhausted: false,
            })),
        }
    }

    /// Register a new independent reader.
    ///
    /// The reader starts at the head of the shared buffer (the position of
    /// the slowest currently-live reader), not at the original start of the
    /// stream. With no readers behind it, that is exactly the next item no
    /// one has seen yet.
    pub fn reader(&self) -> FanOutReader<T> {
        let mut shared = lock(&self.shared);
        let id = shared.next_reader_id;
        shared.next_reader_id += 1;
        shared.positions.insert(id, 0);
        FanOutReader {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    /// Number of buffered-but-not-fully-consumed items (test visibility).
    #[cfg(test)]
    fn buffered(&self) -> usize {
        lock(&self.shared).buffer.len()
    }
}

fn lock<T>(shared: &Arc<Mutex<Shared<T>>>) -> std::sync::MutexGuard<'_, Shared<T>> {
    // A poisoning panic can only come from a reader holding this lock,
    // which leaves the buffer in a consistent state.
    shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One independent cursor over a [`FanOutCursor`]'s shared buffer.
///
/// Dropping the reader deregisters its position; a reader that is merely
/// abandoned (but kept alive) pins the buffer at its last position.
pub struct FanOutReader<T> {
    shared: Arc<Mutex<Shared<T>>>,
    id: u64,
}

impl<T: Clone> Iterator for FanOutReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut shared = lock(&self.shared);
        let pos = *shared.positions.get(&self.id)?;

        let item = if pos < shared.buffer.len() {
            shared.buffer[pos].clone()
        } else {
            if shared.exhausted {
                return None;
            }
            match shared.source.next() {
                Some(item) => {
                    shared.buffer.push_back(item.clone());
                    item
                }
                None => {
                    shared.exhausted = true;
                    return None;
                }
            }
        };

        shared.positions.insert(self.id, pos + 1);
        shared.prune();
        Some(item)
    }
}

impl<T> Drop for FanOutReader<T> {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        shared.positions.remove(&self.id);
        // The departed reader may have been the slowest one.
        shared.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_items_between_interleaved_readers() {
        let shared = FanOutCursor::new(1..=5);
        let mut r1 = shared.reader();
        let mut r2 = shared.reader();

        assert_eq!(r1.next(), Some(1));
        assert_eq!(r1.next(), Some(2));
        assert_eq!(r1.next(), Some(3));

        assert_eq!(r2.next(), Some(1));
        assert_eq!(r2.next(), Some(2));

        assert_eq!(r1.next(), Some(4));
        assert_eq!(r2.next(), Some(3));

        assert_eq!(r1.next(), Some(5));
        assert_eq!(r1.next(), None);

        assert_eq!(r2.next(), Some(4));
        assert_eq!(r2.next(), Some(5));
        assert_eq!(r2.next(), None);
    }

    #[test]
    fn late_reader_starts_at_shared_buffer_head() {
        let shared = FanOutCursor::new(1..=5);
        let mut r1 = shared.reader();

        assert_eq!(r1.next(), Some(1));
        assert_eq!(r1.next(), Some(2));
        assert_eq!(r1.next(), Some(3));

        // Created after r1 advanced: starts at 4, not 1.
        let mut r2 = shared.reader();
        assert_eq!(r2.next(), Some(4));
        assert_eq!(r2.next(), Some(5));

        assert_eq!(r1.next(), Some(4));
        assert_eq!(r1.next(), Some(5));
    }

    #[test]
    fn buffer_is_bounded_by_reader_spread() {
        let shared = FanOutCursor::new(1..=100);
        let mut fast = shared.reader();
        let mut slow = shared.reader();

        for _ in 0..50 {
            fast.next();
        }
        assert_eq!(shared.buffered(), 50);

        for _ in 0..49 {
            slow.next();
        }
        // Slow reader caught up to within one item; buffer pruned behind it.
        assert_eq!(shared.buffered(), 1);
    }

    #[test]
    fn sole_reader_keeps_buffer_empty() {
        let shared = FanOutCursor::new(1..=10);
        let mut r = shared.reader();
        for expected in 1..=10 {
            assert_eq!(r.next(), Some(expected));
            assert_eq!(shared.buffered(), 0);
        }
    }

    #[test]
    fn dropping_a_reader_releases_the_buffer() {
        let shared = FanOutCursor::new(1..=100);
        let mut fast = shared.reader();
        let slow = shared.reader();

        for _ in 0..40 {
            fast.next();
        }
        assert_eq!(shared.buffered(), 40);

        drop(slow);
        assert_eq!(shared.buffered(), 0);
    }

    #[test]
    fn exhaustion_is_per_reader() {
        let shared = FanOutCursor::new(1..=2);
        let mut r1 = shared.reader();
        let mut r2 = shared.reader();

        assert_eq!(r1.next(), Some(1));
        assert_eq!(r1.next(), Some(2));
        assert_eq!(r1.next(), None);

        // r2 still has the whole stream ahead of it.
        assert_eq!(r2.next(), Some(1));
        assert_eq!(r2.next(), Some(2));
        assert_eq!(r2.next(), None);
    }

    #[test]
    fn concurrent_readers_each_observe_the_full_sequence() {
        let shared = FanOutCursor::new(1..=1000);
        // Register every reader (each at buffer head, pos 0) before any
        // thread starts reading; otherwise a fast thread drains the source
        // before the later readers attach and they start mid-stream.
        let readers: Vec<_> = (0..4).map(|_| shared.reader()).collect();
        let mut handles = Vec::new();
        for reader in readers {
            handles.push(std::thread::spawn(move || reader.collect::<Vec<i32>>()));
        }
        for handle in handles {
            let seen = handle.join().unwrap();
            assert_eq!(seen, (1..=1000).collect::<Vec<i32>>());
        }
    }
}
