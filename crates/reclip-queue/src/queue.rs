//! Job queue on Redis.
//!
//! Layout (prefix `reclip` by default):
//! - `reclip:job:{id}`: hash holding the job record
//! - `reclip:jobs:queued`: list of queued ids, LPUSH on enqueue, RPOP on claim
//! - `reclip:jobs:processing`: sorted set of claimed ids scored by heartbeat
//! - `reclip:project:{project_id}:jobs`: sorted set of a project's ids by creation
//!
//! Every state transition is a single Lua script so that guards and writes
//! happen atomically on the server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use reclip_models::{Clip, Job, JobId, JobPatch, ProjectId};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::record;
use crate::store::{JobStore, STALE_JOB_REASON};

/// Pop queued ids until one is still `queued`, then claim it.
///
/// KEYS: queued list, processing set. ARGV: job key prefix, now (ms).
const DEQUEUE_SCRIPT: &str = r#"
while true do
    local id = redis.call('RPOP', KEYS[1])
    if not id then
        return false
    end
    local key = ARGV[1] .. id
    if redis.call('HGET', key, 'status') == 'queued' then
        redis.call('HSET', key, 'status', 'processing', 'last_polled_at', ARGV[2], 'updated_at', ARGV[2])
        redis.call('HINCRBY', key, 'attempts', 1)
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        return id
    end
end
"#;

/// KEYS: job hash, processing set.
/// ARGV: now (ms), progress or '', task id or '', folder id or '', job id.
const UPDATE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then
    return 0
end
if ARGV[2] ~= '' then
    local current = tonumber(redis.call('HGET', KEYS[1], 'progress') or '0') or 0
    if tonumber(ARGV[2]) > current then
        redis.call('HSET', KEYS[1], 'progress', ARGV[2])
    end
end
if ARGV[3] ~= '' then
    redis.call('HSETNX', KEYS[1], 'external_task_id', ARGV[3])
end
if ARGV[4] ~= '' then
    redis.call('HSET', KEYS[1], 'external_folder_id', ARGV[4])
end
redis.call('HSET', KEYS[1], 'last_polled_at', ARGV[1], 'updated_at', ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[5])
return 1
"#;

/// KEYS: job hash, processing set. ARGV: now (ms), result json, job id.
const COMPLETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then
    return 0
end
redis.call('HSET', KEYS[1], 'status', 'completed', 'progress', '100', 'result', ARGV[2], 'updated_at', ARGV[1])
redis.call('HDEL', KEYS[1], 'error')
redis.call('ZREM', KEYS[2], ARGV[3])
return 1
"#;

/// Fails a processing job whose heartbeat is at or before the cutoff.
/// A plain `fail` passes the far future as cutoff.
///
/// KEYS: job hash, processing set. ARGV: now (ms), reason, job id, cutoff (ms).
const FAIL_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then
    redis.call('ZREM', KEYS[2], ARGV[3])
    return 0
end
local last = tonumber(redis.call('HGET', KEYS[1], 'last_polled_at') or '0') or 0
if last > tonumber(ARGV[4]) then
    return 0
end
redis.call('HSET', KEYS[1], 'status', 'failed', 'error', ARGV[2], 'updated_at', ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[3])
return 1
"#;

/// KEYS: job hash, processing set, queued list, project set.
/// ARGV: job id, project id. Returns -1 when the job belongs elsewhere.
const REMOVE_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[1], 'project_id')
if not owner then
    redis.call('ZREM', KEYS[2], ARGV[1])
    redis.call('LREM', KEYS[3], 0, ARGV[1])
    redis.call('ZREM', KEYS[4], ARGV[1])
    return 0
end
if owner ~= ARGV[2] then
    return -1
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('LREM', KEYS[3], 0, ARGV[1])
redis.call('ZREM', KEYS[4], ARGV[1])
return 1
"#;

/// Redis-backed job queue.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
    dequeue_script: Script,
    update_script: Script,
    complete_script: Script,
    fail_script: Script,
    remove_script: Script,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Check connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Number of queued jobs.
    pub async fn queued_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(self.config.queued_key()).await?;
        Ok(len)
    }

    /// Number of jobs currently claimed by workers.
    pub async fn processing_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(self.config.processing_key()).await?;
        Ok(len)
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &str,
    ) -> QueueResult<Option<Job>> {
        let map: HashMap<String, String> = conn.hgetall(self.config.job_key(job_id)).await?;
        record::decode(map)
    }

    async fn fail_with_cutoff(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &str,
        reason: &str,
        cutoff_ms: i64,
    ) -> QueueResult<bool> {
        let changed: i32 = self
            .fail_script
            .key(self.config.job_key(job_id))
            .key(self.config.processing_key())
            .arg(Utc::now().timestamp_millis())
            .arg(reason)
            .arg(job_id)
            .arg(cutoff_ms)
            .invoke_async(conn)
            .await?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl JobStore for JobQueue {
    async fn enqueue(&self, project_id: ProjectId, source_media_url: String) -> QueueResult<Job> {
        let mut conn = self.connection().await?;
        let job = Job::new(project_id, source_media_url);
        let fields = record::encode(&job)?;
        let job_id = job.id.to_string();

        redis::pipe()
            .atomic()
            .hset_multiple(self.config.job_key(&job_id), &fields)
            .ignore()
            .zadd(
                self.config.project_key(job.project_id.as_str()),
                &job_id,
                job.created_at.timestamp_millis(),
            )
            .ignore()
            .lpush(self.config.queued_key(), &job_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(job_id = %job.id, project_id = %job.project_id, "Enqueued clip job");
        Ok(job)
    }

    async fn dequeue_next(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.connection().await?;

        let claimed: Option<String> = self
            .dequeue_script
            .key(self.config.queued_key())
            .key(self.config.processing_key())
            .arg(self.config.job_key_prefix())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;

        let Some(job_id) = claimed else {
            return Ok(None);
        };

        debug!(job_id = %job_id, "Claimed job");
        match self.load(&mut conn, &job_id).await? {
            Some(job) => Ok(Some(job)),
            None => {
                warn!(job_id = %job_id, "Claimed job vanished before it could be read");
                Ok(None)
            }
        }
    }

    async fn update(&self, job_id: &JobId, patch: JobPatch) -> QueueResult<bool> {
        let mut conn = self.connection().await?;

        let changed: i32 = self
            .update_script
            .key(self.config.job_key(job_id.as_str()))
            .key(self.config.processing_key())
            .arg(Utc::now().timestamp_millis())
            .arg(patch.progress.map(|p| p.min(100).to_string()).unwrap_or_default())
            .arg(patch.external_task_id.unwrap_or_default())
            .arg(patch.external_folder_id.unwrap_or_default())
            .arg(job_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if changed == 0 {
            debug!(job_id = %job_id, "Update skipped: job missing or not processing");
        }
        Ok(changed == 1)
    }

    async fn complete(&self, job_id: &JobId, clips: Vec<Clip>) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let result = serde_json::to_string(&clips)?;

        let changed: i32 = self
            .complete_script
            .key(self.config.job_key(job_id.as_str()))
            .key(self.config.processing_key())
            .arg(Utc::now().timestamp_millis())
            .arg(result)
            .arg(job_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if changed == 1 {
            info!(job_id = %job_id, clips = clips.len(), "Job completed");
        } else {
            warn!(job_id = %job_id, "Complete ignored: job missing or not processing");
        }
        Ok(changed == 1)
    }

    async fn fail(&self, job_id: &JobId, reason: &str) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let changed = self
            .fail_with_cutoff(&mut conn, job_id.as_str(), reason, i64::MAX)
            .await?;

        if changed {
            info!(job_id = %job_id, reason = %reason, "Job failed");
        } else {
            warn!(job_id = %job_id, "Fail ignored: job missing or not processing");
        }
        Ok(changed)
    }

    async fn remove_job(&self, job_id: &JobId, project_id: &ProjectId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;

        let removed: i32 = self
            .remove_script
            .key(self.config.job_key(job_id.as_str()))
            .key(self.config.processing_key())
            .key(self.config.queued_key())
            .key(self.config.project_key(project_id.as_str()))
            .arg(job_id.as_str())
            .arg(project_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        match removed {
            1 => {
                info!(job_id = %job_id, project_id = %project_id, "Removed orphaned job");
                Ok(true)
            }
            -1 => {
                warn!(job_id = %job_id, project_id = %project_id, "Refusing to remove job owned by another project");
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn cleanup_stale_jobs(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff_ms = (Utc::now() - threshold).timestamp_millis();

        let candidates: Vec<String> = conn
            .zrangebyscore(self.config.processing_key(), "-inf", cutoff_ms)
            .await?;

        let mut reclaimed = 0u64;
        for job_id in candidates {
            if self
                .fail_with_cutoff(&mut conn, &job_id, STALE_JOB_REASON, cutoff_ms)
                .await?
            {
                warn!(job_id = %job_id, "Reclaimed stale job");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!("Stale job cleanup reclaimed {} jobs", reclaimed);
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection().await?;
        self.load(&mut conn, job_id.as_str()).await
    }

    async fn list_for_project(&self, project_id: &ProjectId) -> QueueResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrange(self.config.project_key(project_id.as_str()), 0, -1)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&mut conn, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}
