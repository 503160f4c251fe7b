//! In-process implementation of [`MetadataStore`].
//!
//! Holds connectors and jobs in maps behind one async mutex, so each
//! trait method is atomic. Conditional writes follow the same version rules
//! as [`PgStore`](crate::PgStore), including the one-active-job-per-connector
//! guard the PostgreSQL schema enforces with a partial unique index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ccf_core::change::{Change, ChangeRecord};
use ccf_core::connector::Connector;
use ccf_core::job::{Job, JobCursor, JobQuery};
use ccf_core::status::JobStatus;
use ccf_core::types::{Timestamp, Version};
use ccf_events::ChangeFeed;
use tokio::sync::{broadcast, Mutex};

use crate::error::{StoreError, StoreResult};
use crate::store::MetadataStore;

#[derive(Default)]
struct State {
    connectors: HashMap<String, Connector>,
    /// Keyed by job id, which is globally unique.
    jobs: HashMap<String, Job>,
}

impl State {
    fn active_job_for(&self, connector_id: &str) -> Option<&Job> {
        self.jobs
            .values()
            .find(|j| j.connector_id == connector_id && j.status.is_active())
    }

    fn checked_connector(&self, connector_id: &str, expected: Version) -> StoreResult<&Connector> {
        self.connectors
            .get(connector_id)
            .filter(|c| c.version == expected)
            .ok_or_else(|| StoreError::version_conflict("connector", connector_id))
    }

    fn checked_job(&self, input: &Job, expected: Version) -> StoreResult<&Job> {
        self.jobs
            .get(&input.job_id)
            .filter(|j| j.connector_id == input.connector_id && j.version == expected)
            .ok_or_else(|| StoreError::version_conflict("job", &input.job_id))
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    feed: Arc<ChangeFeed>,
    injected_conflicts: AtomicU32,
}

impl MemoryStore {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            feed,
            injected_conflicts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` conditional writes fail with `VersionConflict`
    /// without touching state, as if another writer won every race.
    pub fn inject_version_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self, entity: &'static str, id: &str) -> StoreResult<()> {
        let taken = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            Err(StoreError::version_conflict(entity, id))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(ChangeFeed::default()))
    }
}

fn bumped<T: Clone>(value: &T, version: Version, set: impl FnOnce(&mut T, Version)) -> T {
    let mut next = value.clone();
    set(&mut next, version + 1);
    next
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn insert_connector(&self, input: &Connector) -> StoreResult<Connector> {
        let mut state = self.state.lock().await;
        if state.connectors.contains_key(&input.connector_id) {
            return Err(StoreError::AlreadyExists {
                entity: "connector",
                id: input.connector_id.clone(),
            });
        }

        let mut stored = input.clone();
        stored.version = 1;
        state
            .connectors
            .insert(stored.connector_id.clone(), stored.clone());

        self.feed
            .publish(ChangeRecord::Connector(Change::insert(stored.clone())));
        Ok(stored)
    }

    async fn get_connector(&self, connector_id: &str) -> StoreResult<Option<Connector>> {
        Ok(self.state.lock().await.connectors.get(connector_id).cloned())
    }

    async fn list_connectors(&self, limit: i64, offset: i64) -> StoreResult<Vec<Connector>> {
        let state = self.state.lock().await;
        let mut all: Vec<Connector> = state.connectors.values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.connector_id.cmp(&b.connector_id))
        });
        Ok(page(all, limit, offset))
    }

    async fn put_connector(
        &self,
        input: &Connector,
        expected_version: Version,
    ) -> StoreResult<Connector> {
        self.take_injected_conflict("connector", &input.connector_id)?;
        let mut state = self.state.lock().await;

        let old = state
            .checked_connector(&input.connector_id, expected_version)?
            .clone();
        let stored = bumped(input, expected_version, |c, v| c.version = v);
        state
            .connectors
            .insert(stored.connector_id.clone(), stored.clone());

        self.feed
            .publish(ChangeRecord::Connector(Change::modify(old, stored.clone())));
        Ok(stored)
    }

    async fn delete_connector(
        &self,
        connector_id: &str,
        expected_version: Version,
    ) -> StoreResult<()> {
        self.take_injected_conflict("connector", connector_id)?;
        let mut state = self.state.lock().await;

        state.checked_connector(connector_id, expected_version)?;
        let removed = state.connectors.remove(connector_id);
        state.jobs.retain(|_, j| j.connector_id != connector_id);

        if let Some(removed) = removed {
            self.feed
                .publish(ChangeRecord::Connector(Change::remove(removed)));
        }
        Ok(())
    }

    async fn start_job(
        &self,
        claimed: &Connector,
        expected_connector_version: Version,
        new_job: &Job,
    ) -> StoreResult<(Connector, Job)> {
        self.take_injected_conflict("connector", &claimed.connector_id)?;
        let mut state = self.state.lock().await;

        let old = state
            .checked_connector(&claimed.connector_id, expected_connector_version)?
            .clone();
        if state.active_job_for(&new_job.connector_id).is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "active job for connector",
                id: new_job.connector_id.clone(),
            });
        }
        if state.jobs.contains_key(&new_job.job_id) {
            return Err(StoreError::AlreadyExists {
                entity: "job",
                id: new_job.job_id.clone(),
            });
        }

        let stored_connector = bumped(claimed, expected_connector_version, |c, v| c.version = v);
        let mut stored_job = new_job.clone();
        stored_job.version = 1;

        state
            .connectors
            .insert(stored_connector.connector_id.clone(), stored_connector.clone());
        state
            .jobs
            .insert(stored_job.job_id.clone(), stored_job.clone());

        self.feed.publish(ChangeRecord::Connector(Change::modify(
            old,
            stored_connector.clone(),
        )));
        self.feed
            .publish(ChangeRecord::Job(Change::insert(stored_job.clone())));
        Ok((stored_connector, stored_job))
    }

    async fn get_job(&self, connector_id: &str, job_id: &str) -> StoreResult<Option<Job>> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .get(job_id)
            .filter(|j| j.connector_id == connector_id)
            .cloned())
    }

    async fn find_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn list_jobs(&self, connector_id: &str, query: &JobQuery) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.connector_id == connector_id)
            .filter(|j| query.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        Ok(page(jobs, query.limit(), query.offset()))
    }

    async fn list_jobs_by_status(
        &self,
        statuses: &[JobStatus],
        after: Option<&JobCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .filter(|j| {
                after.map_or(true, |c| {
                    (j.created_at, j.job_id.as_str()) > (c.created_at, c.job_id.as_str())
                })
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(page(jobs, limit, 0))
    }

    async fn put_job(&self, input: &Job, expected_version: Version) -> StoreResult<Job> {
        self.take_injected_conflict("job", &input.job_id)?;
        let mut state = self.state.lock().await;

        let old = state.checked_job(input, expected_version)?.clone();
        let stored = bumped(input, expected_version, |j, v| j.version = v);
        state.jobs.insert(stored.job_id.clone(), stored.clone());

        self.feed
            .publish(ChangeRecord::Job(Change::modify(old, stored.clone())));
        Ok(stored)
    }

    async fn complete_job(
        &self,
        input: &Job,
        expected_version: Version,
    ) -> StoreResult<(Job, Option<Connector>)> {
        self.take_injected_conflict("job", &input.job_id)?;
        let mut state = self.state.lock().await;

        let old_job = state.checked_job(input, expected_version)?.clone();
        let stored_job = bumped(input, expected_version, |j, v| j.version = v);
        state
            .jobs
            .insert(stored_job.job_id.clone(), stored_job.clone());

        let release = state.connectors.get(&input.connector_id).and_then(|c| {
            c.release(&input.job_id, input.updated_at)
                .map(|next| (c.clone(), bumped(&next, c.version, |n, v| n.version = v)))
        });
        if let Some((_, released)) = &release {
            state
                .connectors
                .insert(released.connector_id.clone(), released.clone());
        }

        self.feed
            .publish(ChangeRecord::Job(Change::modify(old_job, stored_job.clone())));
        let released = release.map(|(old, new)| {
            self.feed
                .publish(ChangeRecord::Connector(Change::modify(old, new.clone())));
            new
        });
        Ok((stored_job, released))
    }

    async fn purge_expired_jobs(&self, now: Timestamp) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, j| !(j.is_terminal() && j.expires_at.is_some_and(|at| at <= now)));
        Ok((before - state.jobs.len()) as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.feed.subscribe()
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ccf_core::change::ChangeKind;
    use ccf_core::connector::{ContainerSpec, NewConnector, ResourceRequirements};
    use ccf_core::status::ConnectorStatus;
    use chrono::{Duration, Utc};

    use super::*;

    fn new_connector() -> Connector {
        Connector::new(
            NewConnector {
                name: "gitlab".to_string(),
                description: None,
                container_spec: ContainerSpec {
                    image_uri: "img".to_string(),
                    execution_role: "role".to_string(),
                    job_role: None,
                    resource_requirements: ResourceRequirements::default(),
                    timeout_secs: 3600,
                },
            },
            Utc::now(),
        )
    }

    async fn started(store: &MemoryStore) -> (Connector, Job) {
        let connector = store.insert_connector(&new_connector()).await.unwrap();
        let job = Job::new(&connector.connector_id, Vec::new(), Utc::now());
        let claimed = connector.acquire(&job.job_id, Utc::now()).unwrap();
        store
            .start_job(&claimed, connector.version, &job)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_version_one() {
        let store = MemoryStore::default();
        let stored = store.insert_connector(&new_connector()).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_matches!(
            store.insert_connector(&stored).await,
            Err(StoreError::AlreadyExists { .. })
        );
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryStore::default();
        let stored = store.insert_connector(&new_connector()).await.unwrap();

        let renamed = Connector {
            name: "gitlab-2".into(),
            ..stored.clone()
        };
        let v2 = store.put_connector(&renamed, 1).await.unwrap();
        assert_eq!(v2.version, 2);

        assert_matches!(
            store.put_connector(&renamed, 1).await,
            Err(StoreError::VersionConflict { .. })
        );
    }

    #[tokio::test]
    async fn start_job_writes_both_and_publishes() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe();

        let (connector, job) = started(&store).await;
        assert_eq!(connector.status, ConnectorStatus::InUse);
        assert_eq!(connector.version, 2);
        assert_eq!(job.version, 1);

        // insert connector, modify connector, insert job
        let _ = rx.recv().await.unwrap();
        assert_matches!(rx.recv().await.unwrap(), ChangeRecord::Connector(c) if c.kind == ChangeKind::Modify);
        assert_matches!(rx.recv().await.unwrap(), ChangeRecord::Job(c) if c.kind == ChangeKind::Insert);
    }

    #[tokio::test]
    async fn second_active_job_is_rejected() {
        let store = MemoryStore::default();
        let (connector, _) = started(&store).await;

        // Forge an AVAILABLE image at the current version to get past CAS.
        let mut forged = connector.clone();
        forged.status = ConnectorStatus::Available;
        let other = Job::new(&connector.connector_id, Vec::new(), Utc::now());
        let claimed = forged.acquire(&other.job_id, Utc::now()).unwrap();

        assert_matches!(
            store.start_job(&claimed, connector.version, &other).await,
            Err(StoreError::AlreadyExists { .. })
        );
    }

    #[tokio::test]
    async fn complete_job_releases_connector_once() {
        let store = MemoryStore::default();
        let (connector, job) = started(&store).await;

        let done = job
            .finish(JobStatus::Succeeded, None, Utc::now(), Duration::days(7))
            .unwrap();
        let (stored, released) = store.complete_job(&done, job.version).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        let released = released.expect("connector released");
        assert_eq!(released.status, ConnectorStatus::Available);
        assert_eq!(released.version, connector.version + 1);

        assert_matches!(
            store.complete_job(&done, job.version).await,
            Err(StoreError::VersionConflict { .. })
        );
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = MemoryStore::default();
        let stored = store.insert_connector(&new_connector()).await.unwrap();
        store.inject_version_conflicts(2);

        assert!(store.put_connector(&stored, 1).await.is_err());
        assert!(store.put_connector(&stored, 1).await.is_err());
        assert!(store.put_connector(&stored, 1).await.is_ok());
    }

    #[tokio::test]
    async fn list_jobs_filters_and_pages() {
        let store = MemoryStore::default();
        let (_, job) = started(&store).await;

        let running = JobQuery {
            status: Some(JobStatus::Running),
            ..Default::default()
        };
        assert!(store.list_jobs(&job.connector_id, &running).await.unwrap().is_empty());

        let all = store
            .list_jobs(&job.connector_id, &JobQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_terminal_jobs() {
        let store = MemoryStore::default();
        let (_, job) = started(&store).await;
        let now = Utc::now();
        let done = job
            .finish(JobStatus::Failed, None, now, Duration::days(7))
            .unwrap();
        store.complete_job(&done, job.version).await.unwrap();

        assert_eq!(store.purge_expired_jobs(now).await.unwrap(), 0);
        assert_eq!(store.purge_expired_jobs(now + Duration::days(8)).await.unwrap(), 1);
        assert!(store.find_job(&job.job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_connector_drops_jobs() {
        let store = MemoryStore::default();
        let (connector, job) = started(&store).await;
        let mut rx = store.subscribe();

        store
            .delete_connector(&connector.connector_id, connector.version)
            .await
            .unwrap();
        assert!(store.get_connector(&connector.connector_id).await.unwrap().is_none());
        assert!(store.find_job(&job.job_id).await.unwrap().is_none());
        assert_matches!(
            rx.recv().await.unwrap(),
            ChangeRecord::Connector(c)
                if c.kind == ChangeKind::Remove && c.new_image.connector_id == connector.connector_id
        );
    }

    #[tokio::test]
    async fn status_scan_pages_past_cursor() {
        let store = MemoryStore::default();
        let mut started_ids = Vec::new();
        for _ in 0..5 {
            let (_, job) = started(&store).await;
            started_ids.push(job.job_id);
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .list_jobs_by_status(&[JobStatus::Started], cursor.as_ref(), 2)
                .await
                .unwrap();
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(JobCursor::after(last));
            seen.extend(page.into_iter().map(|j| j.job_id));
        }

        seen.sort();
        started_ids.sort();
        assert_eq!(seen, started_ids);
    }
}
