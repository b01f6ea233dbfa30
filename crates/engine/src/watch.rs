// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6: the watcher runtime. Every concrete watcher is a spawned task
//! selecting over the store's change feed, a cancellation signal, and an
//! output-ready slot, the same shape as the daemon's connection listener
//! task — one task per subscriber, cooperative cancellation, no shared
//! mutable state beyond the channels themselves.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use mse_core::{Collection, Error, Life, Result};
use mse_store::doc::{ChangeFeedEntry, Revision, DELETED_REVISION};
use mse_store::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long the raw-event collector waits for further events before
/// folding its pending batch into one emission.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(10);

/// Terminal outcome of a watcher task, returned by [`BaseWatcher::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    #[error("store closed")]
    StoreClosed,
    #[error("cancelled")]
    Cancelled,
}

impl From<WatcherError> for Error {
    fn from(e: WatcherError) -> Self {
        match e {
            WatcherError::StoreClosed => Error::StoreClosed,
            WatcherError::Cancelled => Error::Cancelled,
        }
    }
}

/// Lifecycle and output plumbing shared by every concrete watcher.
///
/// Output is single-consumer and buffers at most one pending value: the
/// emitting task always sends into a capacity-1 channel, so a slow
/// consumer applies backpressure to the watcher task rather than values
/// being silently dropped.
pub struct BaseWatcher<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<std::result::Result<(), WatcherError>>,
}

impl<T: Send + 'static> BaseWatcher<T> {
    fn spawn<F>(cancel: CancellationToken, rx: mpsc::Receiver<T>, fut: F) -> Self
    where
        F: std::future::Future<Output = std::result::Result<(), WatcherError>> + Send + 'static,
    {
        let task = tokio::spawn(fut);
        Self { rx, cancel, task }
    }

    /// Await the next coalesced value. Returns `None` once the task has
    /// terminated (cancelled, or the feed died) and no further values
    /// will ever arrive.
    pub async fn changes(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Request the watcher task stop. Cooperative: takes effect at the
    /// task's next suspension point.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to terminate and return its terminal error, if
    /// any. `Ok(())` means a graceful shutdown (feed closed cleanly or
    /// the watcher was killed and drained).
    pub async fn wait(self) -> std::result::Result<(), WatcherError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    /// `kill()` then `wait()`.
    pub async fn stop(self) -> std::result::Result<(), WatcherError> {
        self.cancel.cancel();
        self.wait().await
    }
}

/// Send `value` into `tx`. The channel holds exactly one slot, so a slow
/// consumer applies backpressure here rather than the task silently
/// dropping ids — callers that can fold a skipped value into the next one
/// (instead of just waiting) should coalesce before calling this, as the
/// per-watcher loops above do by recomputing full deltas off the live
/// store state rather than off a buffered event.
async fn send_latest<T: Send + 'static>(tx: &mpsc::Sender<T>, value: T) {
    let _ = tx.send(value).await;
}

/// Reads the `life` field off a raw change-feed-adjacent document value.
fn life_of(doc: &serde_json::Value) -> Life {
    crate::lifecycle::life_of(doc)
}

/// Collapses a burst of raw feed entries for the same id: the last
/// revno observed within the window wins.
fn collect_existence(entries: &[ChangeFeedEntry]) -> BTreeMap<String, Revision> {
    let mut last = BTreeMap::new();
    for entry in entries {
        last.insert(entry.id.clone(), entry.revno);
    }
    last
}

async fn drain_window(rx: &mut tokio_stream::wrappers::BroadcastStream<ChangeFeedEntry>, first: ChangeFeedEntry) -> Vec<ChangeFeedEntry> {
    use tokio_stream::StreamExt;
    let mut batch = vec![first];
    let deadline = tokio::time::sleep(COALESCE_WINDOW);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            maybe = rx.next() => {
                match maybe {
                    Some(Ok(entry)) => batch.push(entry),
                    Some(Err(_)) => continue,
                    None => break,
                }
            }
        }
    }
    batch
}

/// Entity-notify watcher: emits `()` whenever any of `targets` changes.
/// Emits one initial signal, then coalesces further changes.
pub fn entity_notify(store: Arc<Store>, targets: BTreeSet<(Collection, String)>) -> BaseWatcher<()> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let fut = async move {
        let _ = tx.send(()).await;
        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if targets.contains(&(entry.collection, entry.id.clone())) {
                send_latest(&tx, ()).await;
            }
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

/// `{Entered, Left}` delta emitted by [`relation_scope`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDelta {
    pub entered: Vec<String>,
    pub left: Vec<String>,
}

/// Relation-scope watcher: the first event's `entered` carries the
/// initial occupants (units with a non-departing scope doc); thereafter
/// emits deltas. A scope doc flagged `departing` counts as `Left`.
pub fn relation_scope(store: Arc<Store>, model: mse_core::ModelUuid, relation_id: u64) -> BaseWatcher<ScopeDelta> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let fut = async move {
        let mut known: BTreeSet<String> = BTreeSet::new();
        let initial = scan_scope(&store, &model, relation_id);
        for unit in &initial {
            known.insert(unit.clone());
        }
        let _ = tx.send(ScopeDelta { entered: initial, left: Vec::new() }).await;

        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if entry.collection != Collection::RelationScopes {
                continue;
            }
            let batch = drain_window(&mut feed, entry).await;
            let current = scan_scope(&store, &model, relation_id);
            let current_set: BTreeSet<String> = current.iter().cloned().collect();
            let entered: Vec<String> = current.into_iter().filter(|u| !known.contains(u)).collect();
            let left: Vec<String> = known.iter().filter(|u| !current_set.contains(*u)).cloned().collect();
            let _ = collect_existence(&batch);
            if entered.is_empty() && left.is_empty() {
                continue;
            }
            for u in &entered {
                known.insert(u.clone());
            }
            for u in &left {
                known.remove(u);
            }
            send_latest(&tx, ScopeDelta { entered, left }).await;
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

fn scan_scope(store: &Store, model: &mse_core::ModelUuid, relation_id: u64) -> Vec<String> {
    store
        .find(Collection::RelationScopes)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(_, raw, _)| serde_json::from_value::<crate::entities::relation::ScopeEntry>(raw).ok())
        .filter(|s| s.relation_id == relation_id && !s.departing)
        .map(|s| s.unit)
        .collect()
}

/// Lifecycle-strings watcher: emits the full matching id set on the
/// first event, thereafter only ids whose life changed or which
/// appeared/disappeared. An id observed Dead and reported is never
/// reported again.
pub fn lifecycle_strings(
    store: Arc<Store>,
    model: mse_core::ModelUuid,
    collection: Collection,
    selector: Option<Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>>,
) -> BaseWatcher<Vec<String>> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let matches = move |doc: &serde_json::Value| match &selector {
        Some(f) => f(doc),
        None => true,
    };

    let fut = async move {
        let mut last_life: BTreeMap<String, Life> = BTreeMap::new();
        let mut reported_dead: BTreeSet<String> = BTreeSet::new();

        let scan = |store: &Store| -> Vec<(String, serde_json::Value)> {
            store
                .find(collection)
                .into_iter()
                .filter(|(k, ..)| k.model() == Some(&model))
                .filter_map(|(k, raw, _)| matches(&raw).then(|| (k.wire_id(), raw)))
                .collect()
        };

        let initial = scan(&store);
        let mut initial_ids = Vec::new();
        for (id, doc) in &initial {
            last_life.insert(id.clone(), life_of(doc));
            initial_ids.push(id.clone());
        }
        let _ = tx.send(initial_ids).await;

        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if entry.collection != collection {
                continue;
            }
            let batch = drain_window(&mut feed, entry).await;
            let touched = collect_existence(&batch);
            let current: BTreeMap<String, serde_json::Value> = scan(&store).into_iter().collect();

            let mut changed = Vec::new();
            for id in touched.keys() {
                if reported_dead.contains(id) {
                    continue;
                }
                match current.get(id) {
                    Some(doc) => {
                        let life = life_of(doc);
                        let prior = last_life.insert(id.clone(), life);
                        if prior != Some(life) {
                            changed.push(id.clone());
                            if life.is_dead() {
                                reported_dead.insert(id.clone());
                            }
                        }
                    }
                    None => {
                        if last_life.remove(id).is_some() {
                            changed.push(id.clone());
                        }
                    }
                }
            }
            if changed.is_empty() {
                continue;
            }
            send_latest(&tx, changed).await;
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

/// Document-field watcher: projects one string field off a single
/// document, emitting the extracted value on change. `deleted_sentinel`
/// is emitted if the document is removed.
pub fn document_field(
    store: Arc<Store>,
    key: mse_store::doc::DocKey,
    extract: impl Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    deleted_sentinel: String,
) -> BaseWatcher<String> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let fut = async move {
        let mut last = store.get(&key).map(|(doc, _)| extract(&doc)).unwrap_or_else(|| deleted_sentinel.clone());
        let _ = tx.send(last.clone()).await;

        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if entry.collection != key.collection() || entry.id != key.wire_id() {
                continue;
            }
            let current = if entry.revno == DELETED_REVISION {
                deleted_sentinel.clone()
            } else {
                store.get(&key).map(|(doc, _)| extract(&doc)).unwrap_or_else(|| deleted_sentinel.clone())
            };
            if current != last {
                last = current.clone();
                send_latest(&tx, current).await;
            }
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

/// Multi-hash watcher: recomputes `hash` over the set of `keys` on any
/// change, emitting it only when it differs from the last emission.
pub fn multi_hash(
    store: Arc<Store>,
    keys: Vec<mse_store::doc::DocKey>,
    hash: impl Fn(&[Option<serde_json::Value>]) -> String + Send + Sync + 'static,
) -> BaseWatcher<String> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();
    let watched: BTreeSet<(Collection, String)> = keys.iter().map(|k| (k.collection(), k.wire_id())).collect();

    let fut = async move {
        let snapshot = |store: &Store| -> Vec<Option<serde_json::Value>> { keys.iter().map(|k| store.get(k).map(|(d, _)| d)).collect() };
        let mut last = hash(&snapshot(&store));
        let _ = tx.send(last.clone()).await;

        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if !watched.contains(&(entry.collection, entry.id.clone())) {
                continue;
            }
            let _ = drain_window(&mut feed, entry).await;
            let current = hash(&snapshot(&store));
            if current != last {
                last = current.clone();
                send_latest(&tx, current).await;
            }
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

/// Quiesce-batch watcher: coalesces incoming ids from `input` until no
/// new one arrives for `interval`, then emits the whole batch. Each id
/// carries its own arrival time so a slow trickle still eventually
/// flushes once the oldest id's deadline passes.
pub fn quiesce_batch(mut input: mpsc::Receiver<String>, interval: Duration) -> BaseWatcher<Vec<String>> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let fut = async move {
        loop {
            let first = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = input.recv() => match maybe {
                    Some(id) => id,
                    None => return Ok(()),
                },
            };
            let mut batch = vec![first];
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                    _ = tokio::time::sleep(interval) => break,
                    maybe = input.recv() => match maybe {
                        Some(id) => batch.push(id),
                        None => break,
                    },
                }
            }
            let _ = tx.send(batch).await;
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

/// Relation-units event, composing [`relation_scope`] with one settings
/// watch per occupant: entering a scope starts watching that unit's
/// settings; leaving stops it. The first event always fires (even if
/// empty) to convey the initial snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationUnitsEvent {
    pub changed: BTreeMap<String, u64>,
    pub app_changed: BTreeMap<String, u64>,
    pub departed: Vec<String>,
}

/// Relation-units watcher: layers per-unit settings-version tracking on
/// top of [`relation_scope`]'s occupancy deltas.
pub fn relation_units(store: Arc<Store>, model: mse_core::ModelUuid, relation_id: u64) -> BaseWatcher<RelationUnitsEvent> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let task_cancel = cancel.clone();

    let fut = async move {
        let mut occupants: BTreeSet<String> = scan_scope(&store, &model, relation_id).into_iter().collect();
        let mut versions: BTreeMap<String, u64> = BTreeMap::new();
        for unit in &occupants {
            versions.insert(unit.clone(), settings_version(&store, &model, relation_id, unit));
        }
        let initial = RelationUnitsEvent { changed: versions.clone(), app_changed: BTreeMap::new(), departed: Vec::new() };
        let _ = tx.send(initial).await;

        let mut feed = tokio_stream::wrappers::BroadcastStream::new(store.subscribe());
        loop {
            let entry = tokio::select! {
                _ = task_cancel.cancelled() => return Err(WatcherError::Cancelled),
                maybe = {
                    use tokio_stream::StreamExt;
                    feed.next()
                } => match maybe {
                    Some(Ok(e)) => e,
                    Some(Err(_)) => continue,
                    None => return Err(WatcherError::StoreClosed),
                },
            };
            if !matches!(entry.collection, Collection::RelationScopes | Collection::Settings) {
                continue;
            }
            let _ = drain_window(&mut feed, entry).await;

            let current: BTreeSet<String> = scan_scope(&store, &model, relation_id).into_iter().collect();
            let departed: Vec<String> = occupants.difference(&current).cloned().collect();
            let arrived: Vec<String> = current.difference(&occupants).cloned().collect();
            for unit in &departed {
                versions.remove(unit);
            }

            let mut changed = BTreeMap::new();
            for unit in current.iter().chain(arrived.iter()) {
                let v = settings_version(&store, &model, relation_id, unit);
                if versions.get(unit) != Some(&v) {
                    versions.insert(unit.clone(), v);
                    changed.insert(unit.clone(), v);
                }
            }
            occupants = current;

            if changed.is_empty() && departed.is_empty() {
                continue;
            }
            send_latest(&tx, RelationUnitsEvent { changed, app_changed: BTreeMap::new(), departed }).await;
        }
    };
    BaseWatcher::spawn(cancel, rx, fut)
}

fn settings_version(store: &Store, model: &mse_core::ModelUuid, relation_id: u64, unit: &str) -> u64 {
    store
        .get(&crate::entities::relation::settings_key(model.clone(), relation_id, unit))
        .and_then(|(doc, _)| serde_json::from_value::<crate::entities::relation::Settings>(doc).ok())
        .map(|s| s.version)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
