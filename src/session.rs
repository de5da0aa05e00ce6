//! `SessionManager`: the out-of-scope collaborator (§6.2) that allocates
//! session-group ids, finds session groups, and manages per-group job
//! tables. This module defines the trait contract plus
//! [`InMemorySessionManager`], a reference implementation suitable for
//! running the server standalone and for tests.
//!
//! The protocol core never touches a `SessionGroup`'s internals directly;
//! it only calls through this trait, so a clustered or persistent
//! implementation can be swapped in without touching `dispatcher` or
//! `handlers`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// A job's position in the state machine (§4.6). `Created` and `Prepared`
/// are distinguished internally but never observed over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Just created, no tables registered yet.
    Created,
    /// At least one table registered, not yet capturing.
    Prepared,
    /// Actively streaming captured rows.
    Running,
    /// Capture stopped; tables and attributes are still intact.
    Stopped,
    /// Terminated; no further operations are valid.
    Closed,
}

/// Close condition for `STOP_CAPTURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Truncate any in-flight transaction immediately.
    Immediately,
    /// Finish streaming the current transaction, then stop.
    AfterTransaction,
}

/// Backend outcomes a `SessionManager` call can produce. The dispatcher's
/// error-code translation table (§4.4) maps each to a wire
/// [`crate::opcode::ResultCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The session group handle does not exist.
    #[error("session group handle does not exist")]
    InvalidHandle,
    /// The backend failed to allocate a new session group.
    #[error("failed to allocate a new session group")]
    CreateSessionFailed,
    /// The backend failed to tear down a session group cleanly.
    #[error("failed to close session group")]
    SessionCloseFailed,
    /// The referenced job descriptor does not exist in this group.
    #[error("job descriptor does not exist in this group")]
    JobNotExist,
    /// The group has no more job slots.
    #[error("session group has no more job slots")]
    ExceedMax,
    /// The supplied table name failed backend validation.
    #[error("table name failed backend validation")]
    InvalidTableName,
    /// The backend could not allocate resources for this operation.
    #[error("backend could not allocate resources for this operation")]
    Alloc,
    /// The job is already capturing.
    #[error("job is already capturing")]
    JobAlreadyStarted,
    /// The job is already stopped.
    #[error("job is already stopped")]
    JobAlreadyStopped,
    /// The job attribute id does not exist.
    #[error("job attribute id does not exist")]
    InvalidAttr,
    /// The job attribute value is invalid.
    #[error("job attribute value is invalid")]
    InvalidValue,
    /// The job is in the wrong state for this operation.
    #[error("job is in the wrong state for this operation")]
    InvalidJobStatus,
}

/// Aggregate counters for `REQUEST_SERVER_STATUS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStatus {
    /// Number of open session groups.
    pub session_group_count: u32,
    /// Number of jobs across all session groups.
    pub job_count: u32,
}

/// Out-of-scope collaborator contract (§6.2): allocates session-group ids
/// and owns the job table beneath each group. All synchronization is the
/// implementation's responsibility; the core only ever awaits one call at
/// a time per connection.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Allocate a new, empty session group and return its id. Never
    /// returns `0` (`NULL_SGID` is reserved for "not yet assigned").
    async fn create_group(&self) -> u32;

    /// Tear down a session group and every job beneath it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`] if `sgid` is unknown, or
    /// [`BackendError::SessionCloseFailed`] if teardown could not be
    /// completed cleanly.
    async fn destroy_group(&self, sgid: u32) -> Result<(), BackendError>;

    /// Whether a session group with this id currently exists.
    async fn group_exists(&self, sgid: u32) -> bool;

    /// Allocate a new job within `sgid` and return its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`] if the group does not
    /// exist, or [`BackendError::ExceedMax`] if the group has no free job
    /// slots.
    async fn add_job(&self, sgid: u32) -> Result<u16, BackendError>;

    /// Destroy a job, implicitly stopping capture if it was running.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`] or
    /// [`BackendError::JobNotExist`].
    async fn delete_job(&self, sgid: u32, jd: u16) -> Result<(), BackendError>;

    /// Fetch a job's current status.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`] or
    /// [`BackendError::JobNotExist`].
    async fn job_status(&self, sgid: u32, jd: u16) -> Result<JobStatus, BackendError>;

    /// Whether `(user, table)` is already registered under this job.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`] or
    /// [`BackendError::JobNotExist`].
    async fn is_table_registered(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<bool, BackendError>;

    /// Register `(user, table)` under a job.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`], [`BackendError::JobNotExist`],
    /// [`BackendError::InvalidTableName`], [`BackendError::InvalidJobStatus`],
    /// or [`BackendError::Alloc`].
    async fn register_table(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<(), BackendError>;

    /// Unregister `(user, table)` from a job.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`], [`BackendError::JobNotExist`],
    /// or [`BackendError::InvalidJobStatus`].
    async fn unregister_table(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<(), BackendError>;

    /// Set a job attribute.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`], [`BackendError::JobNotExist`],
    /// [`BackendError::InvalidAttr`], [`BackendError::InvalidValue`], or
    /// [`BackendError::InvalidJobStatus`].
    async fn set_job_attr(&self, sgid: u32, jd: u16, attr_id: u8, value: u32) -> Result<(), BackendError>;

    /// Transition a job to `Running`. Requires at least one registered
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`], [`BackendError::JobNotExist`],
    /// [`BackendError::JobAlreadyStarted`], or
    /// [`BackendError::InvalidJobStatus`] (e.g. no tables registered).
    async fn start_capture(&self, sgid: u32, jd: u16) -> Result<(), BackendError>;

    /// Transition a running job to `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidHandle`], [`BackendError::JobNotExist`],
    /// or [`BackendError::JobAlreadyStopped`].
    async fn stop_capture(&self, sgid: u32, jd: u16, cond: StopCondition) -> Result<(), BackendError>;

    /// Force a job into [`JobStatus::Stopped`] with a fatal cause, used
    /// when the capture streamer hits an oversized item (§4.5).
    async fn force_stop(&self, sgid: u32, jd: u16);

    /// Aggregate counters for `REQUEST_SERVER_STATUS`.
    async fn server_status(&self) -> ServerStatus;
}

#[derive(Debug, Clone)]
struct Job {
    status: JobStatus,
    registered_tables: HashSet<(String, String)>,
    attributes: HashMap<u8, u32>,
}

impl Job {
    fn new() -> Self {
        Self {
            status: JobStatus::Created,
            registered_tables: HashSet::new(),
            attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Group {
    jobs: HashMap<u16, Job>,
    next_job_desc: u16,
}

/// In-memory reference [`SessionManager`]. Suitable for a standalone
/// server process or tests; session groups do not survive a restart.
#[derive(Default)]
pub struct InMemorySessionManager {
    groups: DashMap<u32, Group>,
    next_sgid: AtomicU32,
    job_max_per_group: u16,
}

impl InMemorySessionManager {
    /// Create an empty manager, capping each group at `job_max_per_group`
    /// jobs (mirrors `JOB_COUNT_PER_GROUP_MAX`, but a deployment may run a
    /// tighter cap).
    #[must_use]
    pub fn new(job_max_per_group: u16) -> Self {
        Self {
            groups: DashMap::new(),
            next_sgid: AtomicU32::new(1),
            job_max_per_group,
        }
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn create_group(&self) -> u32 {
        let sgid = self.next_sgid.fetch_add(1, Ordering::Relaxed);
        self.groups.insert(sgid, Group::default());
        sgid
    }

    async fn destroy_group(&self, sgid: u32) -> Result<(), BackendError> {
        self.groups
            .remove(&sgid)
            .map(|_| ())
            .ok_or(BackendError::InvalidHandle)
    }

    async fn group_exists(&self, sgid: u32) -> bool { self.groups.contains_key(&sgid) }

    async fn add_job(&self, sgid: u32) -> Result<u16, BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        if group.jobs.len() >= self.job_max_per_group as usize {
            return Err(BackendError::ExceedMax);
        }
        group.next_job_desc += 1;
        let jd = group.next_job_desc;
        group.jobs.insert(jd, Job::new());
        Ok(jd)
    }

    async fn delete_job(&self, sgid: u32, jd: u16) -> Result<(), BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        group.jobs.remove(&jd).map(|_| ()).ok_or(BackendError::JobNotExist)
    }

    async fn job_status(&self, sgid: u32, jd: u16) -> Result<JobStatus, BackendError> {
        let group = self.groups.get(&sgid).ok_or(BackendError::InvalidHandle)?;
        group.jobs.get(&jd).map(|j| j.status).ok_or(BackendError::JobNotExist)
    }

    async fn is_table_registered(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<bool, BackendError> {
        let group = self.groups.get(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get(&jd).ok_or(BackendError::JobNotExist)?;
        Ok(job.registered_tables.contains(&(user.to_owned(), table.to_owned())))
    }

    async fn register_table(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<(), BackendError> {
        if table.is_empty() {
            return Err(BackendError::InvalidTableName);
        }
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get_mut(&jd).ok_or(BackendError::JobNotExist)?;
        if matches!(job.status, JobStatus::Running) {
            return Err(BackendError::InvalidJobStatus);
        }
        job.registered_tables.insert((user.to_owned(), table.to_owned()));
        if matches!(job.status, JobStatus::Created) {
            job.status = JobStatus::Prepared;
        }
        Ok(())
    }

    async fn unregister_table(
        &self,
        sgid: u32,
        jd: u16,
        user: &str,
        table: &str,
    ) -> Result<(), BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get_mut(&jd).ok_or(BackendError::JobNotExist)?;
        if matches!(job.status, JobStatus::Running) {
            return Err(BackendError::InvalidJobStatus);
        }
        job.registered_tables.remove(&(user.to_owned(), table.to_owned()));
        Ok(())
    }

    async fn set_job_attr(&self, sgid: u32, jd: u16, attr_id: u8, value: u32) -> Result<(), BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get_mut(&jd).ok_or(BackendError::JobNotExist)?;
        if matches!(job.status, JobStatus::Running) {
            return Err(BackendError::InvalidJobStatus);
        }
        job.attributes.insert(attr_id, value);
        Ok(())
    }

    async fn start_capture(&self, sgid: u32, jd: u16) -> Result<(), BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get_mut(&jd).ok_or(BackendError::JobNotExist)?;
        match job.status {
            JobStatus::Running => return Err(BackendError::JobAlreadyStarted),
            JobStatus::Closed => return Err(BackendError::InvalidJobStatus),
            JobStatus::Created | JobStatus::Prepared | JobStatus::Stopped => {}
        }
        if job.registered_tables.is_empty() {
            return Err(BackendError::InvalidJobStatus);
        }
        job.status = JobStatus::Running;
        Ok(())
    }

    async fn stop_capture(&self, sgid: u32, jd: u16, _cond: StopCondition) -> Result<(), BackendError> {
        let mut group = self.groups.get_mut(&sgid).ok_or(BackendError::InvalidHandle)?;
        let job = group.jobs.get_mut(&jd).ok_or(BackendError::JobNotExist)?;
        if matches!(job.status, JobStatus::Stopped) {
            return Err(BackendError::JobAlreadyStopped);
        }
        job.status = JobStatus::Stopped;
        Ok(())
    }

    async fn force_stop(&self, sgid: u32, jd: u16) {
        if let Some(mut group) = self.groups.get_mut(&sgid) {
            if let Some(job) = group.jobs.get_mut(&jd) {
                job.status = JobStatus::Stopped;
            }
        }
    }

    async fn server_status(&self) -> ServerStatus {
        let session_group_count = u32::try_from(self.groups.len()).unwrap_or(u32::MAX);
        let job_count = self
            .groups
            .iter()
            .map(|entry| u32::try_from(entry.jobs.len()).unwrap_or(u32::MAX))
            .sum();
        ServerStatus { session_group_count, job_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> InMemorySessionManager { InMemorySessionManager::new(8) }

    #[tokio::test]
    async fn create_group_allocates_increasing_nonzero_ids() {
        let mgr = manager();
        let a = mgr.create_group().await;
        let b = mgr.create_group().await;
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn register_table_then_duplicate_register_is_rejected_by_caller_check() -> anyhow::Result<()> {
        let mgr = manager();
        let sgid = mgr.create_group().await;
        let jd = mgr.add_job(sgid).await?;
        assert!(!mgr.is_table_registered(sgid, jd, "bob", "orders").await?);
        mgr.register_table(sgid, jd, "bob", "orders").await?;
        assert!(mgr.is_table_registered(sgid, jd, "bob", "orders").await?);
        Ok(())
    }

    #[tokio::test]
    async fn start_capture_requires_a_registered_table() -> anyhow::Result<()> {
        let mgr = manager();
        let sgid = mgr.create_group().await;
        let jd = mgr.add_job(sgid).await?;
        assert_eq!(
            mgr.start_capture(sgid, jd).await,
            Err(BackendError::InvalidJobStatus)
        );
        mgr.register_table(sgid, jd, "bob", "orders").await?;
        mgr.start_capture(sgid, jd).await?;
        assert_eq!(
            mgr.start_capture(sgid, jd).await,
            Err(BackendError::JobAlreadyStarted)
        );
        Ok(())
    }

    #[tokio::test]
    async fn add_job_respects_group_cap() -> anyhow::Result<()> {
        let mgr = InMemorySessionManager::new(1);
        let sgid = mgr.create_group().await;
        mgr.add_job(sgid).await?;
        assert_eq!(mgr.add_job(sgid).await, Err(BackendError::ExceedMax));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_group_is_invalid_handle() {
        let mgr = manager();
        assert_eq!(mgr.add_job(999).await, Err(BackendError::InvalidHandle));
    }
}
