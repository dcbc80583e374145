use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::partitions::{
    encode_event_key, encode_event_prefix, encode_file_key, encode_file_prefix, encode_idem_key,
    encode_job_key, encode_meta_key, encode_permission_key, encode_permission_prefix,
};
use super::records::{
    FileCategory, Job, JobEvent, JobFile, JobStatus, PermissionAction, TransitionOutcome,
};

/// Durable record of jobs, files, events, permission replies, and the
/// idempotency index.
///
/// All state transitions go through [`JobStore::set_status`], which is the
/// sole mechanism committing a status change. Transitions are serialized by
/// an internal mutex so conditional updates are linearizable per job in this
/// single-process deployment.
#[derive(Clone)]
pub struct JobStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    events: PartitionHandle,
    files: PartitionHandle,
    permissions: PartitionHandle,
    idempotency: PartitionHandle,
    metadata: PartitionHandle,
    event_seq: Arc<AtomicU64>,
    perm_seq: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl JobStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening job store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let events = keyspace.open_partition("events", PartitionCreateOptions::default())?;
        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let permissions =
            keyspace.open_partition("permissions", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let event_seq = load_counter(&metadata, "event_seq")?;
        let perm_seq = load_counter(&metadata, "perm_seq")?;

        Ok(Self {
            keyspace,
            jobs,
            events,
            files,
            permissions,
            idempotency,
            metadata,
            event_seq: Arc::new(AtomicU64::new(event_seq)),
            perm_seq: Arc::new(AtomicU64::new(perm_seq)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Insert a new job record. The caller supplies a freshly generated id.
    pub fn create_job(&self, job: &Job) -> Result<()> {
        let key = encode_job_key(&job.job_id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %job.job_id, status = %job.status, "Job created");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, job_id: &str) -> Result<Job> {
        self.get(job_id)?
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))
    }

    /// Conditional status update: applies only when the current status is a
    /// member of `from_set` and is not `aborted`. Returns the prevailing
    /// status either way. An in-set but illegal target is a caller bug and
    /// surfaces as [`LedgerError::IllegalTransition`].
    pub fn set_status(
        &self,
        job_id: &str,
        from_set: &[JobStatus],
        to: JobStatus,
    ) -> Result<TransitionOutcome> {
        let guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self.require(job_id)?;
        let current = job.status;

        if current == JobStatus::Aborted || !from_set.contains(&current) {
            return Ok(TransitionOutcome {
                applied: false,
                current,
            });
        }

        if !JobStatus::can_transition(current, to) {
            return Err(LedgerError::IllegalTransition {
                job_id: job_id.to_string(),
                from: current,
                to,
            });
        }

        if current != to {
            job.status = to;
            job.updated_at = Utc::now();
            self.put_job(&job)?;
            debug!(job_id, from = %current, to = %to, "Status transition");
        }
        drop(guard);

        Ok(TransitionOutcome {
            applied: true,
            current: to,
        })
    }

    /// Assign the agent session id. At most one assignment per job; a second
    /// call with the same id is a no-op.
    pub fn set_session_id(&self, job_id: &str, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self.require(job_id)?;
        match job.session_id.as_deref() {
            Some(existing) if existing == session_id => Ok(()),
            Some(_) => Err(LedgerError::SessionAlreadyAssigned(job_id.to_string())),
            None => {
                job.session_id = Some(session_id.to_string());
                job.updated_at = Utc::now();
                self.put_job(&job)
            }
        }
    }

    pub fn set_error(&self, job_id: &str, code: &str, message: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self.require(job_id)?;
        job.error_code = Some(code.to_string());
        job.error_message = Some(message.to_string());
        job.updated_at = Utc::now();
        self.put_job(&job)
    }

    /// Clears a previous failure. Called only when a job reaches `succeeded`;
    /// restarts keep the last error visible until then.
    pub fn clear_error(&self, job_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self.require(job_id)?;
        job.error_code = None;
        job.error_message = None;
        job.updated_at = Utc::now();
        self.put_job(&job)
    }

    pub fn set_bundle_path(&self, job_id: &str, bundle_path: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut job = self.require(job_id)?;
        job.result_bundle_path = Some(bundle_path.to_string());
        job.updated_at = Utc::now();
        self.put_job(&job)
    }

    /// Append an audit event. The store assigns a monotonically increasing
    /// id and persists the counter for crash recovery, so per-job event ids
    /// are strictly increasing.
    pub fn append_event(&self, mut event: JobEvent) -> Result<JobEvent> {
        let id = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
        event.id = id;

        let key = encode_event_key(&event.job_id, id);
        let value = serde_json::to_vec(&event)?;
        self.events.insert(key, value)?;
        self.metadata
            .insert(encode_meta_key("event_seq"), id.to_be_bytes())?;

        debug!(job_id = %event.job_id, id, event_type = %event.event_type, "Event appended");
        Ok(event)
    }

    /// Events with id greater than `cursor`, in id order.
    pub fn events_since(&self, job_id: &str, cursor: u64, limit: usize) -> Result<Vec<JobEvent>> {
        let mut out = Vec::new();
        for item in self.events.prefix(encode_event_prefix(job_id)) {
            let (_, value) = item?;
            let event: JobEvent = serde_json::from_slice(&value)?;
            if event.id > cursor {
                out.push(event);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn add_permission_action(&self, action: &PermissionAction) -> Result<()> {
        let seq = self.perm_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let key = encode_permission_key(&action.job_id, seq);
        let value = serde_json::to_vec(action)?;
        self.permissions.insert(key, value)?;
        self.metadata
            .insert(encode_meta_key("perm_seq"), seq.to_be_bytes())?;
        Ok(())
    }

    pub fn list_permission_actions(&self, job_id: &str) -> Result<Vec<PermissionAction>> {
        let mut out = Vec::new();
        for item in self.permissions.prefix(encode_permission_prefix(job_id)) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Insert or replace a file catalog entry keyed by
    /// `(job_id, category, relative_path)`.
    pub fn upsert_file(&self, file: &JobFile) -> Result<()> {
        let key = encode_file_key(&file.job_id, file.category, &file.relative_path);
        let value = serde_json::to_vec(file)?;
        self.files.insert(key, value)?;
        Ok(())
    }

    pub fn list_files(&self, job_id: &str) -> Result<Vec<JobFile>> {
        let mut out = Vec::new();
        for item in self.files.prefix(encode_file_prefix(job_id)) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn find_file(&self, job_id: &str, file_id: &str) -> Result<Option<JobFile>> {
        Ok(self
            .list_files(job_id)?
            .into_iter()
            .find(|f| f.file_id == file_id))
    }

    pub fn get_file(
        &self,
        job_id: &str,
        category: FileCategory,
        relative_path: &str,
    ) -> Result<Option<JobFile>> {
        match self
            .files
            .get(encode_file_key(job_id, category, relative_path))?
        {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Insert `(tenant, key, hash) -> job_id` unless the triple is already
    /// claimed by a job that still exists, in which case that job id wins.
    /// A claim whose job row is gone (creation failed after the claim, or
    /// the job was pruned) is stale and is replaced by the new claim.
    pub fn claim_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
        requirement_hash: &str,
        job_id: &str,
    ) -> Result<String> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = encode_idem_key(tenant_id, idempotency_key, requirement_hash);
        if let Some(existing) = self.idempotency.get(&key)? {
            let existing = String::from_utf8_lossy(&existing).to_string();
            if self.jobs.get(encode_job_key(&existing))?.is_some() {
                return Ok(existing);
            }
            debug!(job_id = %existing, "Replacing stale idempotency claim");
        }
        self.idempotency.insert(key, job_id.as_bytes())?;
        Ok(job_id.to_string())
    }

    /// Drop a claim, but only while it still points at `job_id`. Called
    /// when job creation fails after the claim and before the job row is
    /// written.
    pub fn release_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
        requirement_hash: &str,
        job_id: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = encode_idem_key(tenant_id, idempotency_key, requirement_hash);
        if let Some(existing) = self.idempotency.get(&key)? {
            if existing.as_ref() == job_id.as_bytes() {
                self.idempotency.remove(key)?;
            }
        }
        Ok(())
    }

    /// Jobs for one tenant, newest first (uuid v7 ids are time-sortable).
    pub fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let mut out = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.tenant_id != tenant_id {
                continue;
            }
            if let Some(want) = status {
                if job.status != want {
                    continue;
                }
            }
            out.push(job);
        }
        out.sort_by(|a, b| b.job_id.cmp(&a.job_id));
        out.truncate(limit);
        Ok(out)
    }

    /// Remove a job and every owned record (events, files, permission rows).
    pub(super) fn delete_job_cascade(&self, job_id: &str) -> Result<()> {
        let keys: Vec<Vec<u8>> = self
            .events
            .prefix(encode_event_prefix(job_id))
            .map(|item| item.map(|(k, _)| k.to_vec()))
            .collect::<std::result::Result<_, _>>()?;
        for key in keys {
            self.events.remove(key)?;
        }

        let keys: Vec<Vec<u8>> = self
            .files
            .prefix(encode_file_prefix(job_id))
            .map(|item| item.map(|(k, _)| k.to_vec()))
            .collect::<std::result::Result<_, _>>()?;
        for key in keys {
            self.files.remove(key)?;
        }

        let keys: Vec<Vec<u8>> = self
            .permissions
            .prefix(encode_permission_prefix(job_id))
            .map(|item| item.map(|(k, _)| k.to_vec()))
            .collect::<std::result::Result<_, _>>()?;
        for key in keys {
            self.permissions.remove(key)?;
        }

        self.jobs.remove(encode_job_key(job_id))?;
        Ok(())
    }

    pub(super) fn all_jobs(&self) -> Result<Vec<Job>> {
        let mut out = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Persist all pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key("event_seq"))?;
        Ok(())
    }

    fn put_job(&self, job: &Job) -> Result<()> {
        let key = encode_job_key(&job.job_id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        Ok(())
    }
}

fn load_counter(metadata: &PartitionHandle, name: &str) -> Result<u64> {
    Ok(metadata
        .get(encode_meta_key(name))?
        .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
        .unwrap_or(0))
}
