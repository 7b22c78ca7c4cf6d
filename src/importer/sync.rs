//! Generic reconciliation of a freshly imported object set against the
//! persisted set: upserted objects are marked, and whatever stays unmarked
//! is soft-deleted at the end, behind a mass-deletion guard.

use crate::constants::{DELETE_GUARD_MIN, DELETE_GUARD_RATIO};
use crate::error::{ImporterError, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tracing::{info, warn};

struct SyncEntry<T> {
    object: T,
    found: bool,
}

/// Outcome of the finish step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub matched: usize,
    pub deleted: usize,
    /// True when the mass-deletion guard stopped the delete phase.
    pub aborted: bool,
}

/// Diffs a live object set against missing/seen markers. Knows nothing about
/// any particular origin: the key function and the delete callback come from
/// the caller.
pub struct ModelSyncher<T, K, F>
where
    K: Eq + Hash + Clone + Debug,
    F: Fn(&T) -> K,
{
    entries: HashMap<K, SyncEntry<T>>,
    key_of: F,
}

impl<T, K, F> ModelSyncher<T, K, F>
where
    K: Eq + Hash + Clone + Debug,
    F: Fn(&T) -> K,
{
    /// Initialize with the currently persisted, non-deleted object set.
    pub fn new(objects: impl IntoIterator<Item = T>, key_of: F) -> Self {
        let entries = objects
            .into_iter()
            .map(|object| {
                let key = key_of(&object);
                (
                    key,
                    SyncEntry {
                        object,
                        found: false,
                    },
                )
            })
            .collect();
        Self { entries, key_of }
    }

    /// Mark an object as present upstream. Objects outside the initial set
    /// are adopted as matched; marking the same identity twice is an error.
    pub fn mark(&mut self, object: T) -> Result<()> {
        let key = (self.key_of)(&object);
        let entry = self.entries.entry(key.clone()).or_insert(SyncEntry {
            object,
            found: false,
        });
        if entry.found {
            return Err(ImporterError::AlreadyMarked(format!("{:?}", key)));
        }
        entry.found = true;
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.entries.get(key).map(|entry| &entry.object)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Soft-delete every identity that stayed unseen, through the supplied
    /// delete callback. The callback returns `false` for an object that was
    /// already deleted. When the unseen share exceeds the guard threshold
    /// and `force` is not set, nothing is deleted and the outcome reports
    /// the abort.
    pub async fn finish<D, Fut>(self, force: bool, delete: D) -> Result<SyncOutcome>
    where
        D: Fn(T) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let total = self.entries.len();
        let mut matched = 0usize;
        let mut delete_list = Vec::new();
        for (key, entry) in self.entries {
            if entry.found {
                matched += 1;
            } else {
                delete_list.push((key, entry.object));
            }
        }

        if delete_list.len() > DELETE_GUARD_MIN
            && delete_list.len() as f64 > total as f64 * DELETE_GUARD_RATIO
            && !force
        {
            warn!(
                "Refusing to delete {} out of {} objects; rerun with force to override",
                delete_list.len(),
                total
            );
            return Ok(SyncOutcome {
                matched,
                deleted: 0,
                aborted: true,
            });
        }

        let mut deleted = 0usize;
        for (key, object) in delete_list {
            if delete(object).await? {
                info!("Deleting object {:?}", key);
                deleted += 1;
            }
        }
        Ok(SyncOutcome {
            matched,
            deleted,
            aborted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn syncher(keys: &[&str]) -> ModelSyncher<String, String, fn(&String) -> String> {
        ModelSyncher::new(
            keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            |s: &String| s.clone(),
        )
    }

    #[tokio::test]
    async fn unseen_objects_are_deleted_once() {
        let mut syncher = syncher(&["a", "b", "c"]);
        syncher.mark("a".to_string()).unwrap();

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let log = deleted.clone();
        let outcome = syncher
            .finish(false, move |obj: String| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(obj);
                    Ok(true)
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.deleted, 2);
        assert!(!outcome.aborted);
        let mut deleted = deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn double_mark_is_an_error() {
        let mut syncher = syncher(&["a"]);
        syncher.mark("a".to_string()).unwrap();
        assert!(matches!(
            syncher.mark("a".to_string()),
            Err(ImporterError::AlreadyMarked(_))
        ));
    }

    #[tokio::test]
    async fn unknown_identities_are_adopted_as_matched() {
        let mut syncher = syncher(&[]);
        syncher.mark("new".to_string()).unwrap();
        let outcome = syncher
            .finish(false, |_obj: String| async move { Ok(true) })
            .await
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.deleted, 0);
    }

    #[tokio::test]
    async fn guard_aborts_disproportionate_deletes() {
        let keys: Vec<String> = (0..100).map(|i| format!("old-{}", i)).collect();
        let mut syncher = ModelSyncher::new(keys, |s: &String| s.clone());
        for i in 0..10 {
            syncher.mark(format!("old-{}", i)).unwrap();
        }
        let outcome = syncher
            .finish(false, |_obj: String| async move {
                panic!("delete must not run when the guard trips")
            })
            .await
            .unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.deleted, 0);
    }

    #[tokio::test]
    async fn force_overrides_the_guard() {
        let keys: Vec<String> = (0..20).map(|i| format!("old-{}", i)).collect();
        let mut syncher = ModelSyncher::new(keys, |s: &String| s.clone());
        syncher.mark("old-0".to_string()).unwrap();
        let outcome = syncher
            .finish(true, |_obj: String| async move { Ok(true) })
            .await
            .unwrap();
        assert!(!outcome.aborted);
        assert_eq!(outcome.deleted, 19);
    }

    #[tokio::test]
    async fn small_delete_sets_pass_the_guard() {
        // five deletions are always allowed, whatever the ratio
        let keys: Vec<String> = (0..5).map(|i| format!("old-{}", i)).collect();
        let syncher = ModelSyncher::new(keys, |s: &String| s.clone());
        let outcome = syncher
            .finish(false, |_obj: String| async move { Ok(true) })
            .await
            .unwrap();
        assert!(!outcome.aborted);
        assert_eq!(outcome.deleted, 5);
    }
}
