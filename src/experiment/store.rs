//! Experiment Store - journaled, concurrent experiment bookkeeping
//!
//! ## Locking
//!
//! - `identities` (reservation index) serializes `reserve`, `archive` and
//!   `update_scope`.
//! - Each record's `DashMap` entry guard makes its status transition
//!   exclusive; transitions on different records only share the journal.
//! - Lock order is entry -> journal and identities -> journal. The journal
//!   lock is never held while taking another lock.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use super::archive;
use super::journal::{Event, Journal};
use super::{ExperimentId, ExperimentRecord, ExperimentStatus};
use crate::boxes::ParameterBox;
use crate::scope::Scope;
use crate::storage::StorageEngine;
use crate::value::{assignment_key, Assignment, Measures};
use crate::{Error, Result};

/// Environment variable overriding the default of
/// [`StoreBuilder::sync_writes`]; `0`, `false`, `no` or `off` disable fsync.
pub const SYNC_ENV_VAR: &str = "TRUENO_EMA_SYNC";

/// Builder for [`ExperimentStore`].
///
/// # Example
///
/// ```rust
/// use trueno_ema::experiment::ExperimentStore;
///
/// let dir = std::env::temp_dir().join(format!("trueno-ema-doc-{}", std::process::id()));
/// let store = ExperimentStore::builder().sync_writes(false).open(&dir)?;
/// assert!(store.is_empty());
/// # std::fs::remove_dir_all(&dir).ok();
/// # Ok::<(), trueno_ema::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    sync_writes: bool,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBuilder {
    /// Builder with fsync on, unless [`SYNC_ENV_VAR`] turns it off.
    #[must_use]
    pub fn new() -> Self {
        let sync_writes = std::env::var(SYNC_ENV_VAR).map_or(true, |v| {
            !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            )
        });
        Self { sync_writes }
    }

    /// Fsync every journal line before the change becomes visible.
    #[must_use]
    pub const fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Open (or create) a journaled store in `dir`, replaying its journal.
    ///
    /// # Errors
    ///
    /// `Io` if the directory cannot be created, `StorageError` for a corrupt
    /// or unsupported journal.
    pub fn open<P: AsRef<Path>>(self, dir: P) -> Result<ExperimentStore> {
        let dir = dir.as_ref();
        let (journal, events) = Journal::open(dir, self.sync_writes)?;
        let store = ExperimentStore::empty(Some(dir.to_path_buf()), Some(journal));
        store.replay(events)?;
        info!(
            path = %dir.display(),
            experiments = store.len(),
            pending = store.records.iter().filter(|r| r.is_pending()).count(),
            sync_writes = self.sync_writes,
            "opened experiment store"
        );
        Ok(store)
    }

    /// Store without persistence.
    #[must_use]
    pub fn in_memory(self) -> ExperimentStore {
        ExperimentStore::empty(None, None)
    }
}

/// Result of [`ExperimentStore::archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    /// Written Parquet file; `None` when nothing was eligible
    pub file: Option<PathBuf>,
    /// Number of experiments moved out of the live store
    pub archived: usize,
}

/// Journaled store of experiments keyed by scope and design.
///
/// `Send + Sync`; every operation takes `&self`.
#[derive(Debug)]
pub struct ExperimentStore {
    root: Option<PathBuf>,
    records: DashMap<ExperimentId, ExperimentRecord>,
    identities: Mutex<FxHashMap<String, ExperimentId>>,
    scopes: DashMap<String, Scope>,
    journal: Mutex<Option<Journal>>,
    next_id: AtomicU64,
}

/// Reservation identity: (scope, design, normalized assignment).
fn identity_key(scope: &str, design: &str, assignment: &Assignment) -> String {
    format!(
        "{}:{scope}|{}:{design}|{}",
        scope.len(),
        design.len(),
        assignment_key(assignment)
    )
}

fn record_key(record: &ExperimentRecord) -> String {
    identity_key(record.scope(), record.design(), record.assignment())
}

/// Check that `bx` fits `scope`.
fn check_box(scope: &Scope, bx: &ParameterBox) -> Result<()> {
    if let Some(name) = bx.scope_name() {
        if name != scope.name() {
            return Err(Error::scope(format!(
                "box '{}' belongs to scope '{name}', not '{}'",
                bx.name(),
                scope.name()
            )));
        }
    }
    bx.validate(scope)
}

/// Completed records of `scope` inside `bx` (all of them without a box),
/// ordered by id.
pub(crate) fn select_completed<'a>(
    records: impl Iterator<Item = &'a ExperimentRecord>,
    scope: &Scope,
    bx: Option<&ParameterBox>,
) -> Result<Vec<ExperimentRecord>> {
    if let Some(bx) = bx {
        check_box(scope, bx)?;
    }
    let mut selected: Vec<ExperimentRecord> = records
        .filter(|r| r.scope() == scope.name() && r.status() == ExperimentStatus::Complete)
        .filter(|r| bx.map_or(true, |b| b.contains(r.assignment())))
        .cloned()
        .collect();
    selected.sort_by_key(ExperimentRecord::experiment_id);
    Ok(selected)
}

impl ExperimentStore {
    /// Create a builder for configuring a store.
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Open (or create) a journaled store with default settings.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::open`].
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        StoreBuilder::new().open(dir)
    }

    /// Store without persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::empty(None, None)
    }

    fn empty(root: Option<PathBuf>, journal: Option<Journal>) -> Self {
        Self {
            root,
            records: DashMap::new(),
            identities: Mutex::new(FxHashMap::default()),
            scopes: DashMap::new(),
            journal: Mutex::new(journal),
            next_id: AtomicU64::new(1),
        }
    }

    /// Rebuild state from journal events (store not yet shared).
    fn replay(&self, events: Vec<Event>) -> Result<()> {
        let mut identities = self.lock_identities()?;
        let mut next = 1;
        for event in events {
            match event {
                Event::ScopeDeclared { scope } => {
                    self.scopes.insert(scope.name().to_string(), scope);
                }
                Event::Reserved { records } => {
                    for record in records {
                        let id = record.experiment_id();
                        next = next.max(id.get() + 1);
                        identities.insert(record_key(&record), id);
                        self.records.insert(id, record);
                    }
                }
                Event::Completed { id, measures, at } => {
                    self.replay_transition(id, |r| r.complete(measures, at))?;
                }
                Event::Failed { id, cause, at } => {
                    self.replay_transition(id, |r| r.fail(cause, at))?;
                }
                Event::Archived { ids, .. } => {
                    for id in ids {
                        if let Some((_, record)) = self.records.remove(&id) {
                            identities.remove(&record_key(&record));
                        }
                    }
                }
                Event::Watermark { next_id } => next = next.max(next_id.get()),
            }
        }
        self.next_id.store(next, Ordering::SeqCst);
        debug!(next_id = next, "replayed experiment journal");
        Ok(())
    }

    fn replay_transition(
        &self,
        id: ExperimentId,
        apply: impl FnOnce(&mut ExperimentRecord) -> Result<()>,
    ) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or_else(|| {
            Error::StorageError(format!("Journal transitions unknown experiment {id}"))
        })?;
        apply(&mut *record)
            .map_err(|e| Error::StorageError(format!("Journal replay of experiment {id}: {e}")))
    }

    fn lock_identities(&self) -> Result<MutexGuard<'_, FxHashMap<String, ExperimentId>>> {
        self.identities
            .lock()
            .map_err(|_| Error::StorageError("Reservation index lock poisoned".to_string()))
    }

    /// Append to the journal, if any.
    fn append(&self, event: &Event) -> Result<()> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| Error::StorageError("Journal lock poisoned".to_string()))?;
        match journal.as_mut() {
            Some(journal) => journal.append(event),
            None => Ok(()),
        }
    }

    fn compact_journal(&self) -> Result<()> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| Error::StorageError("Journal lock poisoned".to_string()))?;
        if let Some(journal) = journal.as_mut() {
            journal.compact()?;
        }
        Ok(())
    }

    /// Reserve a batch of assignments as pending experiments of `design`.
    ///
    /// Assignments are normalized against `scope` (defaults filled, values
    /// coerced). The scope is registered on first use. The batch is persisted
    /// as one journal line and the ids come back in input order.
    ///
    /// # Errors
    ///
    /// - `Scope` for invalid assignments, or when `scope` differs from the
    ///   registered definition of the same name (see [`Self::update_scope`])
    /// - `DuplicateReservation` if an assignment is already held by a live
    ///   experiment of the design (pending, complete or failed)
    /// - `PendingExperiments` if the batch repeats an assignment
    ///
    /// Nothing is reserved when any of these occurs.
    pub fn reserve(
        &self,
        scope: &Scope,
        design: &str,
        assignments: &[Assignment],
    ) -> Result<Vec<ExperimentId>> {
        if design.is_empty() {
            return Err(Error::Other("design name must not be empty".to_string()));
        }
        let normalized = assignments
            .iter()
            .map(|a| scope.normalize_assignment(a))
            .collect::<Result<Vec<_>>>()?;
        let keys: Vec<String> = normalized
            .iter()
            .map(|a| identity_key(scope.name(), design, a))
            .collect();

        let mut identities = self.lock_identities()?;
        let declare = match self.scopes.get(scope.name()) {
            Some(registered) if *registered == *scope => false,
            Some(_) => {
                return Err(Error::scope(format!(
                    "scope '{}' is registered with a different definition; call update_scope first",
                    scope.name()
                )))
            }
            None => true,
        };

        let mut in_batch: FxHashMap<&str, usize> = FxHashMap::default();
        for (i, key) in keys.iter().enumerate() {
            if let Some(existing) = identities.get(key) {
                return Err(Error::DuplicateReservation {
                    design: design.to_string(),
                    existing: *existing,
                });
            }
            if let Some(first) = in_batch.insert(key.as_str(), i) {
                return Err(Error::PendingExperiments(format!(
                    "assignments {first} and {i} of the batch for design '{design}' are identical"
                )));
            }
        }
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        if declare {
            self.append(&Event::ScopeDeclared {
                scope: scope.clone(),
            })?;
            self.scopes.insert(scope.name().to_string(), scope.clone());
            info!(scope = scope.name(), "registered scope");
        }

        let first = self
            .next_id
            .fetch_add(normalized.len() as u64, Ordering::SeqCst);
        let records: Vec<ExperimentRecord> = normalized
            .into_iter()
            .zip(first..)
            .map(|(a, id)| ExperimentRecord::new(ExperimentId::new(id), scope.name(), design, a))
            .collect();
        self.append(&Event::Reserved {
            records: records.clone(),
        })?;

        let ids: Vec<ExperimentId> = records.iter().map(ExperimentRecord::experiment_id).collect();
        for (record, key) in records.into_iter().zip(keys) {
            identities.insert(key, record.experiment_id());
            self.records.insert(record.experiment_id(), record);
        }
        debug!(
            scope = scope.name(),
            design,
            count = ids.len(),
            first = %ids[0],
            "reserved experiments"
        );
        Ok(ids)
    }

    /// Pending -> complete with `measures`.
    ///
    /// # Errors
    ///
    /// `UnknownExperiment`, `NotPending` if the experiment already left
    /// pending, `Scope`/`ScopeFormat` for undeclared or mistyped measures.
    pub fn record_result(&self, id: ExperimentId, measures: Measures) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(Error::UnknownExperiment(id))?;
        record.ensure_pending()?;
        {
            let scope = self.scopes.get(record.scope()).ok_or_else(|| {
                Error::StorageError(format!("Scope '{}' is not registered", record.scope()))
            })?;
            scope.validate_measures(&measures)?;
        }
        let at = Utc::now();
        self.append(&Event::Completed {
            id,
            measures: measures.clone(),
            at,
        })?;
        record.complete(measures, at)?;
        debug!(experiment = %id, design = record.design(), "recorded result");
        Ok(())
    }

    /// Pending -> failed with `cause`. Retry by reserving the assignment
    /// under a new design.
    ///
    /// # Errors
    ///
    /// `UnknownExperiment`, or `NotPending` if the experiment already left
    /// pending.
    pub fn record_failure(&self, id: ExperimentId, cause: impl Into<String>) -> Result<()> {
        let cause = cause.into();
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(Error::UnknownExperiment(id))?;
        record.ensure_pending()?;
        let at = Utc::now();
        self.append(&Event::Failed {
            id,
            cause: cause.clone(),
            at,
        })?;
        warn!(experiment = %id, design = record.design(), cause = %cause, "experiment failed");
        record.fail(cause, at)
    }

    /// Pending experiments of `design`, ordered by id.
    #[must_use]
    pub fn pending(&self, scope: &Scope, design: &str) -> Vec<ExperimentRecord> {
        let mut pending: Vec<ExperimentRecord> = self
            .records
            .iter()
            .filter(|r| r.scope() == scope.name() && r.design() == design && r.is_pending())
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(ExperimentRecord::experiment_id);
        pending
    }

    /// Completed experiments of `scope`, optionally only those inside `bx`.
    ///
    /// # Errors
    ///
    /// `Scope`/`ScopeFormat` if the box does not fit the scope.
    pub fn query(&self, scope: &Scope, bx: Option<&ParameterBox>) -> Result<Vec<ExperimentRecord>> {
        let snapshot: Vec<ExperimentRecord> = self
            .records
            .iter()
            .filter(|r| r.scope() == scope.name() && r.status() == ExperimentStatus::Complete)
            .map(|r| r.value().clone())
            .collect();
        select_completed(snapshot.iter(), scope, bx)
    }

    /// Every live record of `scope` (any status), ordered by id.
    #[must_use]
    pub fn records(&self, scope: &str) -> Vec<ExperimentRecord> {
        let mut records: Vec<ExperimentRecord> = self
            .records
            .iter()
            .filter(|r| r.scope() == scope)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(ExperimentRecord::experiment_id);
        records
    }

    /// Snapshot of one live experiment.
    #[must_use]
    pub fn get(&self, id: ExperimentId) -> Option<ExperimentRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Number of live experiments (all scopes and statuses).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no live experiment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Design names with live experiments in `scope`, sorted.
    #[must_use]
    pub fn designs(&self, scope: &str) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.scope() == scope)
            .map(|r| r.design().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Registered definition of a scope.
    #[must_use]
    pub fn registered_scope(&self, name: &str) -> Option<Scope> {
        self.scopes.get(name).map(|s| s.value().clone())
    }

    /// Store directory, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Register a new definition for a scope name.
    ///
    /// Completed and failed experiments keep the assignments they were run
    /// with. Re-registering an identical definition is a no-op.
    ///
    /// # Errors
    ///
    /// `PendingExperiments` if the definition changes while experiments of
    /// the scope are pending.
    pub fn update_scope(&self, scope: &Scope) -> Result<()> {
        let _identities = self.lock_identities()?;
        if self
            .scopes
            .get(scope.name())
            .is_some_and(|registered| *registered == *scope)
        {
            return Ok(());
        }
        let pending = self
            .records
            .iter()
            .filter(|r| r.scope() == scope.name() && r.is_pending())
            .count();
        if pending > 0 {
            return Err(Error::PendingExperiments(format!(
                "scope '{}' has {pending} pending experiments; its definition cannot change",
                scope.name()
            )));
        }
        self.append(&Event::ScopeDeclared {
            scope: scope.clone(),
        })?;
        self.scopes.insert(scope.name().to_string(), scope.clone());
        info!(scope = scope.name(), "updated scope definition");
        Ok(())
    }

    /// Move every complete and failed experiment of `scope` into one Parquet
    /// file in `dir`. Pending experiments stay live.
    ///
    /// All-or-nothing: the file is written under a temporary name, linked to
    /// a fresh name (never over an existing file), and journaled before the
    /// records leave the live store; any failure leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// `MissingArchivePath` if `dir` is not an existing writable directory
    /// (checked before anything moves); storage errors otherwise.
    pub fn archive<P: AsRef<Path>>(&self, scope: &Scope, dir: P) -> Result<ArchiveOutcome> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::MissingArchivePath {
                path: dir.to_path_buf(),
                reason: "not an existing directory".to_string(),
            });
        }

        let mut identities = self.lock_identities()?;
        let mut snapshot: Vec<ExperimentRecord> = self
            .records
            .iter()
            .filter(|r| r.scope() == scope.name() && r.status().is_terminal())
            .map(|r| r.value().clone())
            .collect();
        snapshot.sort_by_key(ExperimentRecord::experiment_id);

        let target_name = match (snapshot.first(), snapshot.last()) {
            (Some(first), Some(last)) => {
                archive::file_name(
                    scope.name(),
                    first.experiment_id(),
                    last.experiment_id(),
                    rand::random(),
                )
            }
            _ => format!("{}.writable", archive::file_stem(scope.name())),
        };
        let tmp = dir.join(format!(".{target_name}.tmp"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| Error::MissingArchivePath {
                path: dir.to_path_buf(),
                reason: format!("cannot create {}: {e}", tmp.display()),
            })?;

        if snapshot.is_empty() {
            drop(file);
            fs::remove_file(&tmp)?;
            debug!(scope = scope.name(), "nothing to archive");
            return Ok(ArchiveOutcome {
                file: None,
                archived: 0,
            });
        }

        let target = dir.join(&target_name);
        if let Err(e) = write_archive(scope, &snapshot, file, &tmp, &target) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %cleanup, "temporary archive already gone");
            }
            return Err(e);
        }

        let ids: Vec<ExperimentId> = snapshot.iter().map(ExperimentRecord::experiment_id).collect();
        if let Err(e) = self.append(&Event::Archived {
            scope: scope.name().to_string(),
            ids: ids.clone(),
            path: target.clone(),
        }) {
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!(path = %target.display(), error = %cleanup, "failed to remove unjournaled archive");
            }
            return Err(e);
        }

        for record in &snapshot {
            self.records.remove(&record.experiment_id());
            identities.remove(&record_key(record));
        }
        // the move is durable already; a failed compaction only costs space
        if let Err(e) = self.compact_journal() {
            warn!(scope = scope.name(), error = %e, "journal compaction failed");
        }
        info!(
            scope = scope.name(),
            archived = ids.len(),
            path = %target.display(),
            "archived experiments"
        );
        Ok(ArchiveOutcome {
            file: Some(target),
            archived: ids.len(),
        })
    }
}

fn write_archive(
    scope: &Scope,
    records: &[ExperimentRecord],
    file: File,
    tmp: &Path,
    target: &Path,
) -> Result<()> {
    let batch = archive::encode(scope, records)?;
    StorageEngine::new(vec![batch]).write_parquet(file)?;
    // link instead of rename: an existing archive file is never replaced
    fs::hard_link(tmp, target).map_err(|e| {
        Error::StorageError(format!(
            "Cannot publish archive {}: {e}",
            target.display()
        ))
    })?;
    if let Err(e) = fs::remove_file(tmp) {
        warn!(path = %tmp.display(), error = %e, "failed to remove temporary archive");
    }
    Ok(())
}
