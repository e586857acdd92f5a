use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::{
    merge::merge_projects,
    realtime::{realtime_loop, RealtimeHandle},
    OpenOutcome, SaveOutcome, SessionAccess, SyncError,
};
use crate::{
    cache::ProjectCache,
    config::CoreConfig,
    graph::{normalize_spans, total_distance, PointGraph},
    lock::{AcquireOutcome, LeaseHealth, LockManager},
    models::{is_placeholder_id, placeholder_id, Project, ProjectDraft},
    network::NetworkStatus,
    remote::{NewProjectRecord, ProjectChange, ProjectUpdate, RemoteError, RemoteProjectStore},
};

pub const DEFAULT_PROJECT_NAME: &str = "Untitled project";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveMode {
    /// Caller-supplied draft. Replaces the working graph if it is the open project.
    Draft,
    /// The working graph itself. Becomes the open project.
    Working,
    /// Pushing a pending project; leaves the working graph alone.
    Reconcile,
}

struct Session {
    project: Project,
    access: SessionAccess,
}

#[derive(Default)]
struct EngineState {
    projects: Vec<Project>,
    session: Option<Session>,
    graph: PointGraph,
}

pub(super) struct EngineInner<R, C> {
    user_id: String,
    remote: Arc<R>,
    cache: C,
    network: NetworkStatus,
    locks: LockManager<R>,
    realtime_enabled: bool,
    state: Mutex<EngineState>,
    realtime: Mutex<Option<RealtimeHandle>>,
}

/// Orchestrates the project list, the open project and its lease.
///
/// Clones share state.
pub struct SyncEngine<R, C> {
    inner: Arc<EngineInner<R, C>>,
}

impl<R, C> Clone for SyncEngine<R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: RemoteProjectStore, C: ProjectCache> SyncEngine<R, C> {
    pub fn new(
        user_id: impl Into<String>,
        remote: Arc<R>,
        cache: C,
        network: NetworkStatus,
        config: &CoreConfig,
    ) -> Self {
        let user_id = user_id.into();
        let locks = LockManager::new(remote.clone(), user_id.clone(), &config.lock);
        Self::with_lock_manager(user_id, remote, cache, network, locks, config.sync.realtime)
    }

    pub fn with_lock_manager(
        user_id: impl Into<String>,
        remote: Arc<R>,
        cache: C,
        network: NetworkStatus,
        locks: LockManager<R>,
        realtime_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                user_id: user_id.into(),
                remote,
                cache,
                network,
                locks,
                realtime_enabled,
                state: Mutex::new(EngineState::default()),
                realtime: Mutex::new(None),
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    pub fn locks(&self) -> &LockManager<R> {
        &self.inner.locks
    }

    pub fn lease_health(&self) -> watch::Receiver<LeaseHealth> {
        self.inner.locks.health()
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.inner.state.lock().await.projects.clone()
    }

    pub async fn current_project(&self) -> Option<Project> {
        self.inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.project.clone())
    }

    pub async fn session_access(&self) -> Option<SessionAccess> {
        self.inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.access.clone())
    }

    /// Snapshot of the working graph.
    pub async fn graph(&self) -> PointGraph {
        self.inner.state.lock().await.graph.clone()
    }

    /// Distance of the working graph, recomputed on every call.
    pub async fn total_distance(&self) -> f64 {
        self.inner.state.lock().await.graph.total_distance()
    }

    /// Read the cache, then merge in the remote list when online.
    ///
    /// A failed remote fetch is logged and the cached list is served.
    pub async fn load_projects(&self) -> Result<Vec<Project>, SyncError> {
        let inner = &self.inner;
        let local = inner
            .cache
            .load(&inner.user_id)
            .await
            .map_err(SyncError::Cache)?;

        let remote = if inner.network.is_online() {
            match inner.remote.select_by_owner(&inner.user_id).await {
                Ok(remote) => Some(remote),
                Err(err) => {
                    warn!("remote project load failed, serving cached list: {err}");
                    None
                }
            }
        } else {
            None
        };

        let mut state = inner.state.lock().await;
        let projects = match remote {
            Some(remote) => {
                let merged = merge_projects(local, remote);
                inner
                    .cache
                    .save(&inner.user_id, &merged)
                    .await
                    .map_err(SyncError::Cache)?;
                merged
            }
            None => local,
        };
        info!(
            "loaded {} projects for {}",
            projects.len(),
            inner.user_id
        );
        state.projects = projects.clone();
        Ok(projects)
    }

    /// Add a project owned by another user to the list, by id.
    pub async fn add_shared_project(&self, project_id: &str) -> Result<Project, SyncError> {
        let inner = &self.inner;
        let project = inner.remote.fetch(project_id).await?;

        let mut state = inner.state.lock().await;
        upsert(&mut state.projects, project.clone(), None);
        inner
            .cache
            .save(&inner.user_id, &state.projects)
            .await
            .map_err(SyncError::Cache)?;
        Ok(project)
    }

    /// Persist a caller-built project.
    pub async fn save_project(
        &self,
        draft: ProjectDraft,
    ) -> Result<(Project, SaveOutcome), SyncError> {
        self.save(draft, SaveMode::Draft).await
    }

    /// Persist the working graph as the open project, or as a new project
    /// when none is open. The saved project becomes the open one.
    pub async fn save_working(
        &self,
        name: Option<String>,
    ) -> Result<(Project, SaveOutcome), SyncError> {
        let draft = {
            let state = self.inner.state.lock().await;
            let (id, current_name) = match &state.session {
                Some(session) => {
                    ensure_writable(session)?;
                    (Some(session.project.id.clone()), session.project.name.clone())
                }
                None => (None, DEFAULT_PROJECT_NAME.to_string()),
            };
            ProjectDraft {
                id,
                name: name.unwrap_or(current_name),
                points: state.graph.points().to_vec(),
                connections: state.graph.connections().to_vec(),
            }
        };
        self.save(draft, SaveMode::Working).await
    }

    async fn save(
        &self,
        draft: ProjectDraft,
        mode: SaveMode,
    ) -> Result<(Project, SaveOutcome), SyncError> {
        let inner = &self.inner;
        let ProjectDraft {
            id,
            name,
            mut points,
            mut connections,
        } = draft;

        normalize_spans(&mut points, &mut connections);
        let distance = total_distance(&points, &connections);
        let now = Utc::now();
        let previous_id = id.filter(|id| !id.is_empty());

        let existing = match &previous_id {
            Some(id) => {
                let state = inner.state.lock().await;
                if let Some(session) = state.session.as_ref().filter(|s| &s.project.id == id) {
                    ensure_writable(session)?;
                }
                state.projects.iter().find(|p| &p.id == id).cloned()
            }
            None => None,
        };

        let mut project = Project {
            id: previous_id.clone().unwrap_or_default(),
            owner_id: existing
                .as_ref()
                .map(|p| p.owner_id.clone())
                .unwrap_or_else(|| inner.user_id.clone()),
            name,
            points,
            connections,
            total_distance: distance,
            locked_by: existing.as_ref().and_then(|p| p.locked_by.clone()),
            lock_expires_at: existing.as_ref().and_then(|p| p.lock_expires_at),
            created_at: existing.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
            pending_sync: false,
            defect: None,
        };

        let has_remote_id = previous_id
            .as_deref()
            .is_some_and(|id| !is_placeholder_id(id));

        let outcome = if inner.network.is_online() {
            match inner.push(&project, has_remote_id).await {
                Ok(row) => {
                    project = row;
                    SaveOutcome::Synced
                }
                Err(err) => {
                    warn!("remote save of '{}' failed, keeping it local: {err}", project.name);
                    keep_local(&mut project);
                    SaveOutcome::SavedLocally
                }
            }
        } else {
            keep_local(&mut project);
            SaveOutcome::SavedLocally
        };

        let needs_lease = {
            let mut state = inner.state.lock().await;
            upsert(&mut state.projects, project.clone(), previous_id.as_deref());
            inner
                .cache
                .save(&inner.user_id, &state.projects)
                .await
                .map_err(SyncError::Cache)?;

            let EngineState { session, graph, .. } = &mut *state;
            let is_open = match (session.as_ref(), previous_id.as_deref()) {
                (Some(session), Some(previous)) => session.project.id == previous,
                _ => false,
            };

            if is_open || (mode == SaveMode::Working && session.is_none()) {
                if is_open && mode == SaveMode::Draft {
                    graph.replace_parts(project.points.clone(), project.connections.clone());
                }
                let access = session
                    .as_ref()
                    .map_or(SessionAccess::Local, |s| s.access.clone());
                let needs_lease = access == SessionAccess::Local
                    && !project.is_placeholder()
                    && inner.network.is_online();
                *session = Some(Session {
                    project: project.clone(),
                    access,
                });
                needs_lease
            } else {
                false
            }
        };

        // A project that just got a server id (or was opened offline) now
        // needs a lease and a change feed.
        if needs_lease {
            if let Err(err) = self.attach_remote_session(&project.id).await {
                warn!("could not take lease on {} after save: {err}", project.id);
            }
        }

        Ok((project, outcome))
    }

    /// Remove a project locally, then best-effort remotely.
    pub async fn delete_project(&self, project_id: &str) -> Result<(), SyncError> {
        let inner = &self.inner;
        let is_open = inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.project.id == project_id);
        if is_open {
            self.close_project().await;
        }

        {
            let mut state = inner.state.lock().await;
            state.projects.retain(|p| p.id != project_id);
            inner
                .cache
                .save(&inner.user_id, &state.projects)
                .await
                .map_err(SyncError::Cache)?;
        }

        if inner.network.is_online() && !is_placeholder_id(project_id) {
            if let Err(err) = inner.remote.delete(project_id).await {
                warn!("remote delete of {project_id} failed, removed locally only: {err}");
            }
        }
        Ok(())
    }

    /// Load a listed project into the working graph.
    ///
    /// Malformed projects are refused. Online, the lease is taken first; when
    /// another user holds it the project is loaded read-only.
    pub async fn open_project(&self, project_id: &str) -> Result<OpenOutcome, SyncError> {
        let inner = &self.inner;
        let project = inner
            .state
            .lock()
            .await
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))?;
        project.validate()?;

        self.close_project().await;

        let remote_backed = !project.is_placeholder() && inner.network.is_online();
        {
            let mut state = inner.state.lock().await;
            state.graph = PointGraph::from_parts(project.points.clone(), project.connections.clone());
            state.session = Some(Session {
                project,
                access: SessionAccess::Local,
            });
        }

        if !remote_backed {
            return Ok(OpenOutcome::OpenedOffline);
        }

        match self.attach_remote_session(project_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!("opening {project_id} without a lease: {err}");
                Ok(OpenOutcome::OpenedOffline)
            }
        }
    }

    /// Leave the open project: stop the heartbeat and change feed, release
    /// the lease and clear the working graph.
    pub async fn close_project(&self) -> Option<Project> {
        let inner = &self.inner;
        self.stop_realtime().await;
        let leased = inner.locks.stop_heartbeat().await;

        let session = {
            let mut state = inner.state.lock().await;
            state.graph = PointGraph::new();
            state.session.take()
        };

        if let Some(project_id) = leased {
            if let Err(err) = inner.locks.release(&project_id).await {
                warn!("failed to release lease on {project_id}: {err}");
            }
        }

        session.map(|session| session.project)
    }

    /// Stop every background task. Call before dropping the engine.
    pub async fn shutdown(&self) {
        self.close_project().await;
    }

    /// Apply `edit` to the working graph.
    pub async fn edit<T>(&self, edit: impl FnOnce(&mut PointGraph) -> T) -> Result<T, SyncError> {
        let mut state = self.inner.state.lock().await;
        if let Some(session) = &state.session {
            ensure_writable(session)?;
        }
        Ok(edit(&mut state.graph))
    }

    /// Push every project saved offline. Returns how many reached the remote.
    pub async fn reconcile_pending(&self) -> Result<usize, SyncError> {
        if !self.inner.network.is_online() {
            return Ok(0);
        }

        let pending: Vec<Project> = self
            .inner
            .state
            .lock()
            .await
            .projects
            .iter()
            .filter(|p| p.pending_sync && p.defect.is_none())
            .cloned()
            .collect();

        let mut synced = 0;
        for project in pending {
            let draft = ProjectDraft {
                id: Some(project.id),
                name: project.name,
                points: project.points,
                connections: project.connections,
            };
            if let (_, SaveOutcome::Synced) = self.save(draft, SaveMode::Reconcile).await? {
                synced += 1;
            }
        }

        if synced > 0 {
            info!("reconciled {synced} pending projects");
        }
        Ok(synced)
    }

    async fn attach_remote_session(&self, project_id: &str) -> Result<OpenOutcome, SyncError> {
        let inner = &self.inner;

        let (access, outcome) = match inner.locks.acquire(project_id).await? {
            AcquireOutcome::Acquired { expires_at } => {
                inner.locks.start_heartbeat(project_id, expires_at).await;
                (
                    SessionAccess::Leased,
                    OpenOutcome::Opened {
                        lease_expires_at: expires_at,
                    },
                )
            }
            AcquireOutcome::HeldByOther { holder, expires_at } => {
                info!("{project_id} is being edited by {holder}, opening read-only");
                (
                    SessionAccess::ReadOnly {
                        holder: holder.clone(),
                    },
                    OpenOutcome::LockedByOther { holder, expires_at },
                )
            }
        };

        if inner.realtime_enabled {
            self.start_realtime(project_id).await;
        }

        {
            let mut state = inner.state.lock().await;
            if let Some(session) = state
                .session
                .as_mut()
                .filter(|s| s.project.id == project_id)
            {
                session.access = access.clone();
            }
        }

        // Viewers start from the editor's latest commit, not the cached copy.
        if matches!(access, SessionAccess::ReadOnly { .. }) {
            match inner.remote.fetch(project_id).await {
                Ok(latest) => {
                    inner.apply_change(ProjectChange::Updated(latest)).await;
                }
                Err(err) => warn!("could not refresh {project_id}: {err}"),
            }
        }

        Ok(outcome)
    }

    async fn start_realtime(&self, project_id: &str) {
        self.stop_realtime().await;

        let changes = match self.inner.remote.subscribe(project_id) {
            Ok(changes) => changes,
            Err(err) => {
                warn!("realtime subscription for {project_id} failed: {err}");
                return;
            }
        };

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(realtime_loop(
            Arc::downgrade(&self.inner),
            project_id.to_string(),
            changes,
            cancel_token.clone(),
        ));

        *self.inner.realtime.lock().await = Some(RealtimeHandle {
            project_id: project_id.to_string(),
            handle,
            cancel_token,
        });
    }

    async fn stop_realtime(&self) {
        let Some(realtime) = self.inner.realtime.lock().await.take() else {
            return;
        };
        realtime.cancel_token.cancel();
        if let Err(err) = realtime.handle.await {
            warn!(
                "realtime task for {} failed to join: {err}",
                realtime.project_id
            );
        }
    }
}

impl<R: RemoteProjectStore, C: ProjectCache> EngineInner<R, C> {
    async fn push(&self, project: &Project, has_remote_id: bool) -> Result<Project, RemoteError> {
        if has_remote_id {
            self.remote
                .update(&project.id, ProjectUpdate::from_project(project))
                .await
        } else {
            self.remote
                .insert(NewProjectRecord::from_project(project))
                .await
        }
    }

    /// Fold a remote change into the list and the open session.
    ///
    /// Returns false once the open project is gone and listening should stop.
    pub(super) async fn apply_change(&self, change: ProjectChange) -> bool {
        match change {
            ProjectChange::Updated(mut incoming) => {
                incoming.total_distance = total_distance(&incoming.points, &incoming.connections);

                let mut state = self.state.lock().await;
                let mut list_changed = false;
                if let Some(entry) = state.projects.iter_mut().find(|p| p.id == incoming.id) {
                    if incoming.freshness() >= entry.freshness() {
                        *entry = incoming.clone();
                        list_changed = true;
                    }
                }

                let EngineState { session, graph, .. } = &mut *state;
                if let Some(session) = session
                    .as_mut()
                    .filter(|s| s.project.id == incoming.id)
                {
                    if incoming.defect.is_some() {
                        warn!("ignoring undecodable remote copy of {}", incoming.id);
                    } else if incoming.updated_at > session.project.updated_at {
                        graph.replace_parts(incoming.points.clone(), incoming.connections.clone());
                        session.project = incoming;
                    } else if incoming.updated_at == session.project.updated_at {
                        // Lease change or our own save echoed back.
                        session.project.locked_by = incoming.locked_by;
                        session.project.lock_expires_at = incoming.lock_expires_at;
                    }
                }

                if list_changed {
                    if let Err(err) = self.cache.save(&self.user_id, &state.projects).await {
                        warn!("failed to cache realtime update: {err:#}");
                    }
                }
                true
            }
            ProjectChange::Deleted(project_id) => {
                let was_open = {
                    let mut state = self.state.lock().await;
                    state.projects.retain(|p| p.id != project_id);
                    if let Err(err) = self.cache.save(&self.user_id, &state.projects).await {
                        warn!("failed to cache remote delete: {err:#}");
                    }
                    let was_open = state
                        .session
                        .as_ref()
                        .is_some_and(|s| s.project.id == project_id);
                    if was_open {
                        state.session = None;
                        state.graph = PointGraph::new();
                    }
                    was_open
                };
                if was_open {
                    warn!("open project {project_id} was deleted remotely");
                    self.locks.stop_heartbeat().await;
                }
                !was_open
            }
        }
    }
}

impl<R, C> Drop for EngineInner<R, C> {
    fn drop(&mut self) {
        if let Some(realtime) = self.realtime.get_mut().take() {
            realtime.cancel_token.cancel();
        }
    }
}

fn ensure_writable(session: &Session) -> Result<(), SyncError> {
    match &session.access {
        SessionAccess::ReadOnly { holder } => Err(SyncError::ReadOnly {
            project_id: session.project.id.clone(),
            holder: holder.clone(),
        }),
        _ => Ok(()),
    }
}

/// Offline branch of a save: brand new projects get a placeholder id.
fn keep_local(project: &mut Project) {
    if project.id.is_empty() {
        project.id = placeholder_id();
    }
    project.pending_sync = true;
}

/// Replace the entry with the same id (or the id it had before the save),
/// otherwise prepend.
fn upsert(projects: &mut Vec<Project>, project: Project, previous_id: Option<&str>) {
    let new_id = project.id.clone();
    let position = projects.iter().position(|p| p.id == new_id).or_else(|| {
        previous_id.and_then(|previous| projects.iter().position(|p| p.id == previous))
    });

    match position {
        Some(index) => projects[index] = project,
        None => projects.insert(0, project),
    }

    if let Some(previous) = previous_id.filter(|previous| *previous != new_id) {
        projects.retain(|p| p.id != previous);
    }
}
