pub mod handle;
pub mod mutation;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::{OwnedMutexGuard, watch};
use tracing::{debug, info, instrument, warn};

pub use handle::FetchHandle;
pub use mutation::{MutationKind, PendingMutation, Reconciliation};

use crate::auth::AuthGate;
use crate::datetime::today_in;
use crate::error::{StoreError, SyncError};
use crate::sync::SyncClient;
use crate::task::{IdClock, Task, TaskChanges, TaskDraft, TaskId, TaskPatch, TaskStatus};
use mutation::Undo;

/// Immutable view of the collection. Readers never observe a half-applied
/// mutation because every change publishes a fresh snapshot.
pub type Snapshot = Arc<Vec<Task>>;

const RECENT_MUTATIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { count: usize },
    /// A local mutation happened while the fetch was in flight.
    Stale,
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<Task>,
    generation: u64,
    aliases: HashMap<TaskId, TaskId>,
    in_flight: Vec<PendingMutation>,
    recent: VecDeque<PendingMutation>,
    next_op: u64,
}

impl StoreState {
    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.id == id)
    }

    fn resolve(&self, id: &TaskId) -> TaskId {
        let mut current = id.clone();
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&current) {
                Some(next) if next != &current => current = next.clone(),
                _ => break,
            }
        }
        current
    }

    fn has_in_flight(&self, id: &TaskId) -> bool {
        self.in_flight.iter().any(|m| m.task_id() == id)
    }

    fn begin(&mut self, kind: MutationKind, task_id: TaskId, undo: Undo) -> u64 {
        self.next_op += 1;
        self.generation += 1;
        let op = self.next_op;
        self.in_flight
            .push(PendingMutation::applied(op, kind, task_id, undo));
        op
    }

    fn take_in_flight(&mut self, op: u64) -> Option<PendingMutation> {
        let idx = self.in_flight.iter().position(|m| m.op() == op)?;
        Some(self.in_flight.remove(idx))
    }

    fn remember(&mut self, mutation: PendingMutation) {
        if self.recent.len() == RECENT_MUTATIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(mutation);
    }

    fn confirm(&mut self, op: u64) {
        let Some(mut mutation) = self.take_in_flight(op) else {
            return;
        };
        if mutation.confirm() {
            debug!(op, kind = ?mutation.kind(), id = %mutation.task_id(), "mutation confirmed");
        }
        self.remember(mutation);
    }

    fn roll_back(&mut self, op: u64) {
        let Some(mut mutation) = self.take_in_flight(op) else {
            return;
        };

        match mutation.roll_back() {
            Some(Undo::RemoveInserted) => {
                let id = mutation.task_id().clone();
                self.tasks.retain(|task| task.id != id);
            }
            Some(Undo::Restore(previous)) => match self.position(&previous.id) {
                Some(idx) => self.tasks[idx] = previous,
                None => warn!(id = %previous.id, "record vanished before rollback"),
            },
            Some(Undo::Reinsert { index, task }) => {
                let index = index.min(self.tasks.len());
                self.tasks.insert(index, task);
            }
            None => {}
        }

        self.generation += 1;
        warn!(op, kind = ?mutation.kind(), id = %mutation.task_id(), "rolled back optimistic mutation");
        self.remember(mutation);
    }
}

/// The authoritative task collection. Every mutation is applied locally
/// first, then confirmed or rolled back once the sync client answers.
/// Mutations on the same id run one after another.
pub struct TaskStore<C> {
    client: C,
    auth: Arc<AuthGate>,
    state: Mutex<StoreState>,
    snapshots: watch::Sender<Snapshot>,
    id_locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
    provisional_ids: IdClock,
    timezone: Tz,
}

impl<C> TaskStore<C>
where
    C: SyncClient,
{
    pub fn new(client: C, auth: Arc<AuthGate>) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            client,
            auth,
            state: Mutex::new(StoreState::default()),
            snapshots,
            id_locks: Mutex::new(HashMap::new()),
            provisional_ids: IdClock::default(),
            timezone: chrono_tz::UTC,
        }
    }

    /// Timezone used to resolve relative due dates such as `tomorrow`.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn auth(&self) -> &Arc<AuthGate> {
        &self.auth
    }

    pub fn list(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Looks a task up, following a provisional id to its canonical one.
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock();
        let id = state.resolve(id);
        state.position(&id).map(|idx| state.tasks[idx].clone())
    }

    pub fn in_flight(&self) -> Vec<PendingMutation> {
        self.state.lock().in_flight.clone()
    }

    pub fn recent_mutations(&self) -> Vec<PendingMutation> {
        self.state.lock().recent.iter().cloned().collect()
    }

    /// Replaces the collection with the backend's. The result is dropped if
    /// the collection changed locally while the fetch was in flight.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<LoadOutcome, StoreError> {
        let started_at = self.state.lock().generation;

        let fetched = match self.client.fetch_all().await {
            Ok(tasks) => tasks,
            Err(err) => return Err(self.surface_read(err)),
        };

        let mut state = self.state.lock();
        if state.generation != started_at || !state.in_flight.is_empty() {
            debug!(
                started_at,
                current = state.generation,
                "discarding stale task list"
            );
            return Ok(LoadOutcome::Stale);
        }

        let mut seen = HashSet::new();
        let before = fetched.len();
        state.tasks = fetched
            .into_iter()
            .filter(|task| seen.insert(task.id.clone()))
            .collect();
        if state.tasks.len() != before {
            warn!(
                dropped = before - state.tasks.len(),
                "backend returned duplicate task ids"
            );
        }
        state.generation += 1;
        self.publish(&state);

        let count = state.tasks.len();
        info!(count, "task collection loaded");
        Ok(LoadOutcome::Applied { count })
    }

    pub fn spawn_load(self: &Arc<Self>) -> FetchHandle<LoadOutcome>
    where
        C: 'static,
    {
        let store = Arc::clone(self);
        FetchHandle::spawn(async move { store.load().await })
    }

    /// Refreshes one record from the backend. A `NotFound` drops the local
    /// copy.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn fetch(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.run_exclusive(id, |id| async move {
            let started_at = self.state.lock().generation;

            let task = match self.client.fetch_one(&id).await {
                Ok(task) => task,
                Err(err) => return Err(self.surface(err, &id)),
            };

            let mut state = self.state.lock();
            if state.generation != started_at {
                debug!(id = %id, "discarding stale task fetch");
                return Ok(task);
            }
            let task = match state.position(&id) {
                Some(idx) => {
                    let merged = keep_identity(&state.tasks[idx], task);
                    state.tasks[idx] = merged.clone();
                    merged
                }
                None => {
                    state.tasks.push(task.clone());
                    task
                }
            };
            state.generation += 1;
            self.publish(&state);
            Ok(task)
        })
        .await
    }

    #[instrument(skip(self, draft), fields(title_len = draft.title.len()))]
    pub async fn add(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        let now = Utc::now();
        let new_task = draft.validate(self.today(now), now)?;
        self.auth.require_session()?;

        let provisional = TaskId::new(format!("local-{}", self.provisional_ids.next()));
        self.run_exclusive(&provisional, |id| async move {
            let op = {
                let mut state = self.state.lock();
                state.tasks.push(new_task.clone().into_task(id.clone()));
                let op = state.begin(MutationKind::Create, id.clone(), Undo::RemoveInserted);
                self.publish(&state);
                op
            };
            debug!(op, id = %id, "task added locally");

            match self.client.create(&new_task).await {
                Ok(created) => {
                    let mut state = self.state.lock();
                    match state.position(&id) {
                        Some(idx) => state.tasks[idx] = created.clone(),
                        None => state.tasks.push(created.clone()),
                    }
                    if created.id != id {
                        debug!(provisional = %id, canonical = %created.id, "reconciled task id");
                        state.aliases.insert(id.clone(), created.id.clone());
                    }
                    state.confirm(op);
                    self.publish(&state);
                    Ok(created)
                }
                Err(err) => {
                    self.roll_back(op);
                    Err(self.surface(err, &id))
                }
            }
        })
        .await
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        let changes = patch.validate(self.today(Utc::now()))?;
        self.auth.require_session()?;
        self.run_exclusive(id, |id| self.update_locked(id, changes))
            .await
    }

    /// Idempotent: an already completed task is returned without a remote
    /// call.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn mark_completed(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.auth.require_session()?;
        self.run_exclusive(id, |id| async move {
            let current = self
                .current(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if current.status == TaskStatus::Completed {
                debug!(id = %id, "task already completed");
                return Ok(current);
            }
            self.update_locked(id, TaskChanges::status(TaskStatus::Completed))
                .await
        })
        .await
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        self.auth.require_session()?;
        self.run_exclusive(id, |id| self.delete_locked(id)).await
    }

    async fn update_locked(&self, id: TaskId, changes: TaskChanges) -> Result<Task, StoreError> {
        self.auth.require_session()?;

        let op = {
            let mut state = self.state.lock();
            let idx = state
                .position(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if changes.is_empty() {
                return Ok(state.tasks[idx].clone());
            }

            let before = state.tasks[idx].clone();
            changes.apply_to(&mut state.tasks[idx]);
            let op = state.begin(MutationKind::Update, id.clone(), Undo::Restore(before));
            self.publish(&state);
            op
        };

        match self.client.update(&id, &changes).await {
            Ok(updated) => {
                let mut state = self.state.lock();
                let updated = match state.position(&id) {
                    Some(idx) => {
                        let merged = keep_identity(&state.tasks[idx], updated);
                        state.tasks[idx] = merged.clone();
                        merged
                    }
                    None => updated,
                };
                state.confirm(op);
                self.publish(&state);
                Ok(updated)
            }
            Err(err) => {
                self.roll_back(op);
                Err(self.surface(err, &id))
            }
        }
    }

    async fn delete_locked(&self, id: TaskId) -> Result<(), StoreError> {
        self.auth.require_session()?;

        let op = {
            let mut state = self.state.lock();
            let index = state
                .position(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let task = state.tasks.remove(index);
            let op = state.begin(MutationKind::Delete, id.clone(), Undo::Reinsert { index, task });
            self.publish(&state);
            op
        };

        match self.client.remove(&id).await {
            Ok(()) => {
                self.state.lock().confirm(op);
                Ok(())
            }
            Err(err) => {
                self.roll_back(op);
                Err(self.surface(err, &id))
            }
        }
    }

    /// Runs `f` while holding the per-id lock. The id is re-resolved after
    /// the wait, since a queued call may have been issued against a
    /// provisional id that has since been reconciled.
    async fn run_exclusive<T, F, Fut>(&self, id: &TaskId, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(TaskId) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut id = self.resolve(id);
        let guard = loop {
            let guard = self.lock_id(&id).await;
            let current = self.resolve(&id);
            if current == id {
                break guard;
            }
            drop(guard);
            self.prune_lock(&id);
            id = current;
        };

        let result = f(id.clone()).await;
        drop(guard);
        self.prune_lock(&id);
        result
    }

    async fn lock_id(&self, id: &TaskId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.id_locks.lock();
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock for `id` once nobody holds or waits on it. A
    /// provisional id's alias goes with it: no queued call can still be
    /// carrying that id.
    fn prune_lock(&self, id: &TaskId) {
        let mut locks = self.id_locks.lock();
        if locks
            .get(id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(id);
            if let Some(canonical) = self.state.lock().aliases.remove(id) {
                debug!(provisional = %id, canonical = %canonical, "released id alias");
            }
        }
    }

    fn resolve(&self, id: &TaskId) -> TaskId {
        self.state.lock().resolve(id)
    }

    fn current(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock();
        state.position(id).map(|idx| state.tasks[idx].clone())
    }

    fn roll_back(&self, op: u64) {
        let mut state = self.state.lock();
        state.roll_back(op);
        self.publish(&state);
    }

    fn publish(&self, state: &StoreState) {
        self.snapshots.send_replace(Arc::new(state.tasks.clone()));
    }

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        today_in(&self.timezone, now)
    }

    /// Maps a failed mutation onto the caller-facing vocabulary, applying
    /// the side effects each kind requires.
    fn surface(&self, err: SyncError, id: &TaskId) -> StoreError {
        match err {
            SyncError::NotFound => {
                self.drop_stale(id);
                StoreError::NotFound(id.clone())
            }
            other => self.surface_read(other),
        }
    }

    fn surface_read(&self, err: SyncError) -> StoreError {
        match err {
            SyncError::Unauthorized => {
                self.auth.on_unauthorized();
                StoreError::Unauthenticated
            }
            SyncError::NotFound => StoreError::Rejected("resource not found on server".to_string()),
            SyncError::Network(message) => StoreError::Network(message),
            SyncError::Validation(message) => StoreError::Rejected(message),
        }
    }

    fn drop_stale(&self, id: &TaskId) {
        let mut state = self.state.lock();
        if state.has_in_flight(id) {
            return;
        }
        if let Some(idx) = state.position(id) {
            state.tasks.remove(idx);
            state.generation += 1;
            self.publish(&state);
            info!(id = %id, "dropped task missing on server");
        }
    }
}

/// The server's copy of a known record, with the local id and creation time
/// kept. `createdAt` is fixed at creation and a response that omits it would
/// otherwise decode as the current time.
fn keep_identity(local: &Task, mut remote: Task) -> Task {
    remote.id = local.id.clone();
    remote.created_at = local.created_at;
    remote
}
