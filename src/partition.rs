use chrono::{Days, NaiveDate};
use tracing::{debug, info};

use crate::error::EtlError;
use crate::storage::ObjectStore;

/// Keys fetched per list call. A day partition holds at most a few hundred
/// objects, so one capped call per day is enough to decide presence.
pub const LIST_KEY_CAP: usize = 1000;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeState {
    Searching { day_offset: u32 },
    Found { date: NaiveDate, keys: Vec<String> },
    Exhausted,
}

/// The most recent populated date partition under a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionIndex {
    pub date: NaiveDate,
    pub keys: Vec<String>,
}

/// Walks backwards from `today`, one list call per day, and returns the
/// first partition holding at least one object. Probes exactly
/// `max_lookback_days` days before giving up; `today` itself is day zero.
pub fn resolve_latest<S: ObjectStore + ?Sized>(
    store: &S,
    prefix: &str,
    today: NaiveDate,
    max_lookback_days: u32,
) -> Result<PartitionIndex, EtlError> {
    let mut state = ProbeState::Searching { day_offset: 0 };
    loop {
        state = match state {
            ProbeState::Searching { day_offset } if day_offset < max_lookback_days => {
                let date = today - Days::new(day_offset as u64);
                let day_prefix = format!("{prefix}/{date}");
                let keys = store.list(&day_prefix, LIST_KEY_CAP)?;
                if keys.is_empty() {
                    debug!(prefix = %day_prefix, "partition empty, probing one day back");
                    ProbeState::Searching {
                        day_offset: day_offset + 1,
                    }
                } else {
                    ProbeState::Found { date, keys }
                }
            }
            ProbeState::Searching { .. } => ProbeState::Exhausted,
            ProbeState::Found { date, keys } => {
                info!(prefix, %date, objects = keys.len(), "found latest partition");
                return Ok(PartitionIndex { date, keys });
            }
            ProbeState::Exhausted => {
                return Err(EtlError::PartitionNotFound {
                    prefix: prefix.to_string(),
                    days_checked: max_lookback_days,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use crate::storage::{MemoryStore, PutResponse};

    use super::*;

    struct CountingStore {
        inner: MemoryStore,
        probed: Mutex<Vec<String>>,
    }

    impl CountingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                probed: Mutex::new(Vec::new()),
            }
        }

        fn probes(&self) -> usize {
            self.probed.lock().unwrap().len()
        }
    }

    impl ObjectStore for CountingStore {
        fn put(&self, key: &str, body: &[u8]) -> Result<PutResponse, EtlError> {
            self.inner.put(key, body)
        }

        fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
            self.inner.get(key)
        }

        fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<String>, EtlError> {
            self.probed.lock().unwrap().push(prefix.to_string());
            self.inner.list(prefix, max_keys)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 7, 10).unwrap()
    }

    #[test]
    fn hit_on_day_zero_takes_one_probe() {
        let memory = MemoryStore::new();
        memory
            .put("interim/variants/2021-07-10/B.1.1.7/USA/B.1.1.7_lineage_data.csv", b"x")
            .unwrap();
        let store = CountingStore::new(memory);

        let index =
            resolve_latest(&store, "interim/variants", today(), DEFAULT_LOOKBACK_DAYS).unwrap();
        assert_eq!(index.date, today());
        assert_eq!(index.keys.len(), 1);
        assert_eq!(store.probes(), 1);
    }

    #[test]
    fn probes_forward_from_today_until_the_first_hit() {
        let memory = MemoryStore::new();
        memory
            .put("processed/oxford_all/2021-07-07/national", b"n")
            .unwrap();
        memory
            .put("processed/oxford_all/2021-07-07/states", b"s")
            .unwrap();
        // An older partition must not shadow the more recent hit.
        memory
            .put("processed/oxford_all/2021-07-02/national", b"old")
            .unwrap();
        let store = CountingStore::new(memory);

        let index =
            resolve_latest(&store, "processed/oxford_all", today(), DEFAULT_LOOKBACK_DAYS).unwrap();
        assert_eq!(index.date, NaiveDate::from_ymd_opt(2021, 7, 7).unwrap());
        assert_eq!(index.keys.len(), 2);
        assert_eq!(store.probes(), 4);
    }

    #[test]
    fn empty_window_probes_exactly_the_lookback_and_fails() {
        let store = CountingStore::new(MemoryStore::new());
        let err = resolve_latest(&store, "raw/vaccinations/daily", today(), 10).unwrap_err();
        assert_matches!(
            err,
            EtlError::PartitionNotFound { days_checked: 10, .. }
        );
        assert_eq!(store.probes(), 10);
    }

    #[test]
    fn list_is_capped_per_probe() {
        let memory = MemoryStore::new();
        for n in 0..1200 {
            memory
                .put(&format!("interim/variants/2021-07-10/key-{n:04}"), b"x")
                .unwrap();
        }
        let index =
            resolve_latest(&memory, "interim/variants", today(), DEFAULT_LOOKBACK_DAYS).unwrap();
        assert_eq!(index.keys.len(), LIST_KEY_CAP);
    }
}
