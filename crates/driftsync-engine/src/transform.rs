//! Row transforms applied between the extracted stream and a loader.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use driftsync_types::Record;

use crate::evict::EvictingMap;
use crate::extract::RecordStream;

/// Same-type row transform. Applied per loader, to that loader's private
/// view of the extracted stream.
pub trait Transform<T: Record>: Send + Sync {
    fn name(&self) -> &str;

    /// Wrap the input stream. The returned stream inherits the single-pass
    /// contract.
    fn apply(&self, rows: RecordStream<T>) -> RecordStream<T>;
}

/// Streaming group-by aggregation over a bounded buffer.
///
/// Rows are grouped by `key_fn` and folded with `merge_fn` inside an
/// [`EvictingMap`]; a merged row is released downstream when its group is
/// evicted (buffer overflow) or when the input ends. Output order follows
/// eviction order, not `created_at` order, so pair this with sinks that do
/// not enforce input ordering.
pub struct Aggregator<T, K> {
    name: String,
    buffer_size: usize,
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    merge_fn: Arc<dyn Fn(T, T) -> T + Send + Sync>,
}

impl<T, K> Aggregator<T, K> {
    pub fn new(
        name: impl Into<String>,
        buffer_size: usize,
        key_fn: impl Fn(&T) -> K + Send + Sync + 'static,
        merge_fn: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            buffer_size,
            key_fn: Arc::new(key_fn),
            merge_fn: Arc::new(merge_fn),
        }
    }
}

impl<T, K> Transform<T> for Aggregator<T, K>
where
    T: Record,
    K: Eq + Hash + Clone + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, rows: RecordStream<T>) -> RecordStream<T> {
        let pending: Arc<Mutex<VecDeque<T>>> = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&pending);
        let buffer = EvictingMap::new(self.buffer_size, move |_key: K, value: T| {
            sink.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push_back(value);
        });
        Box::new(AggregateStream {
            source: rows,
            key_fn: Arc::clone(&self.key_fn),
            merge_fn: Arc::clone(&self.merge_fn),
            buffer,
            pending,
            done: false,
        })
    }
}

struct AggregateStream<T, K: Eq + Hash + Clone> {
    source: RecordStream<T>,
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    merge_fn: Arc<dyn Fn(T, T) -> T + Send + Sync>,
    buffer: EvictingMap<K, T>,
    pending: Arc<Mutex<VecDeque<T>>>,
    done: bool,
}

impl<T, K: Eq + Hash + Clone> AggregateStream<T, K> {
    fn pop_pending(&self) -> Option<T> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }
}

impl<T: Record, K: Eq + Hash + Clone + Send + 'static> Iterator for AggregateStream<T, K> {
    type Item = Result<T, driftsync_types::ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pop_pending() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match self.source.next() {
                Some(Ok(row)) => {
                    let key = (self.key_fn)(&row);
                    let merge = Arc::clone(&self.merge_fn);
                    self.buffer
                        .compute(key, move |prev| match prev {
                            Some(current) => merge(current, row),
                            None => row,
                        });
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    self.buffer.evict_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone, PartialEq)]
    struct Hit {
        test_name: String,
        count: u64,
        created_at: DateTime<Utc>,
    }

    impl Record for Hit {
        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    fn hit(test_name: &str, count: u64, sec: i64) -> Hit {
        Hit {
            test_name: test_name.into(),
            count,
            created_at: DateTime::from_timestamp(sec, 0).unwrap(),
        }
    }

    fn stream(rows: Vec<Hit>) -> RecordStream<Hit> {
        Box::new(rows.into_iter().map(Ok))
    }

    fn sum_aggregator(buffer_size: usize) -> Aggregator<Hit, String> {
        Aggregator::new(
            "sum-hits",
            buffer_size,
            |h: &Hit| h.test_name.clone(),
            |mut current: Hit, next: Hit| {
                current.count += next.count;
                current.created_at = current.created_at.max(next.created_at);
                current
            },
        )
    }

    #[test]
    fn merges_rows_sharing_a_group_key() {
        let rows = vec![hit("a", 1, 1), hit("b", 2, 2), hit("a", 3, 3)];
        let out: Vec<Hit> = sum_aggregator(10)
            .apply(stream(rows))
            .map(Result::unwrap)
            .collect();

        let mut counts: Vec<(String, u64)> =
            out.iter().map(|h| (h.test_name.clone(), h.count)).collect();
        counts.sort();
        assert_eq!(counts, vec![("a".into(), 4), ("b".into(), 2)]);
    }

    #[test]
    fn overflow_releases_oldest_group_downstream() {
        let rows = vec![hit("a", 1, 1), hit("b", 1, 2), hit("c", 1, 3)];
        let out: Vec<Hit> = sum_aggregator(2)
            .apply(stream(rows))
            .map(Result::unwrap)
            .collect();

        // "a" was evicted first; everything still comes out exactly once.
        assert_eq!(out[0].test_name, "a");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn drains_buffer_when_input_ends() {
        let rows = vec![hit("a", 2, 1)];
        let out: Vec<Hit> = sum_aggregator(10)
            .apply(stream(rows))
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, vec![hit("a", 2, 1)]);
    }

    #[test]
    fn error_item_ends_the_stream() {
        let rows: Vec<Result<Hit, driftsync_types::ExtractError>> = vec![
            Ok(hit("a", 1, 1)),
            Err(driftsync_types::ExtractError::new("source gone")),
        ];
        let mut out = sum_aggregator(10).apply(Box::new(rows.into_iter()));
        assert!(out.next().unwrap().is_err());
        assert!(out.next().is_none());
    }
}
