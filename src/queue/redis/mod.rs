//! Redis broker for hiveq.
//!
//! Each queue name owns a small set of keys under `{prefix}:{name}`:
//!
//! - `id`: counter used to assign job ids
//! - `jobs`: hash of job id to JSON record
//! - `waiting`: list of ready ids (`LPUSH` to add, `RPOP` to claim)
//! - `active`: sorted set of claimed ids scored by stall deadline
//! - `delayed`: sorted set of scheduled ids scored by activation time
//! - `succeeded` / `failed`: sets of finished ids that were kept
//!
//! Claims run in a Lua script so activation of delayed jobs, redelivery of
//! stalled claims and the pop itself happen atomically.

use super::{QueueBackend, QueueConnector, QueueStats};
use crate::config::{ConnectionConfig, QueueSettings};
use crate::error::{HiveError, HiveResult, SerializedError};
use crate::job::{FailureOutcome, Job, JobId, JobStatus};
use crate::utils::now_millis;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 10;

const CLAIM_SCRIPT: &str = r#"
    local waiting_key = KEYS[1]
    local active_key = KEYS[2]
    local delayed_key = KEYS[3]
    local jobs_key = KEYS[4]
    local now = tonumber(ARGV[1])
    local deadline = tonumber(ARGV[2])

    local due = redis.call('ZRANGEBYSCORE', delayed_key, 0, now, 'LIMIT', 0, 100)
    for i = 1, #due do
        redis.call('ZREM', delayed_key, due[i])
        redis.call('LPUSH', waiting_key, due[i])
    end

    local stalled = redis.call('ZRANGEBYSCORE', active_key, 0, now, 'LIMIT', 0, 100)
    for i = 1, #stalled do
        redis.call('ZREM', active_key, stalled[i])
        redis.call('RPUSH', waiting_key, stalled[i])
    end

    while true do
        local id = redis.call('RPOP', waiting_key)
        if not id then
            return false
        end
        local data = redis.call('HGET', jobs_key, id)
        if data then
            redis.call('ZADD', active_key, deadline, id)
            return {id, data}
        end
    end
"#;

/// Opens [`RedisQueue`] backends against one Redis server.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// Create a connector for the given connection parameters.
    ///
    /// No connection is made until a queue is opened.
    pub fn new(config: &ConnectionConfig) -> HiveResult<Self> {
        let url = config.to_url()?;
        let client = Client::open(url.as_str())
            .map_err(|e| HiveError::queue(format!("Failed to create Redis client: {e}"), e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn connect(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> HiveResult<Arc<dyn QueueBackend>> {
        let conn = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            self.client.get_connection_manager(),
        )
        .await
        .map_err(|e| HiveError::queue("Timed out connecting to Redis", e))?
        .map_err(|e| HiveError::queue(format!("Failed to connect to Redis: {e}"), e))?;

        info!(queue = name, worker = settings.is_worker, "Connected to Redis");
        Ok(Arc::new(RedisQueue::new(conn, name, settings.clone())))
    }
}

/// Redis queue backend bound to one queue name.
pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
    settings: QueueSettings,
    claim_script: Script,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RedisQueue {
    /// Wrap an open connection.
    pub fn new(conn: ConnectionManager, name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            conn,
            name: name.into(),
            settings,
            claim_script: Script::new(CLAIM_SCRIPT),
            closed: AtomicBool::new(false),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}:{}", self.settings.key_prefix, self.name, suffix)
    }

    fn ensure_open(&self) -> HiveResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HiveError::Closed {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }

    fn decode(data: &str) -> HiveResult<Job> {
        Ok(serde_json::from_str(data)?)
    }

    /// Delete every key of this queue.
    pub async fn purge(&self) -> HiveResult<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = ["id", "jobs", "waiting", "active", "delayed", "succeeded", "failed"]
            .iter()
            .map(|suffix| self.key(suffix))
            .collect();
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to purge queue: {e}"), e))?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, mut job: Job) -> HiveResult<Job> {
        self.ensure_open()?;
        job.data.validate()?;
        let mut conn = self.conn.clone();

        let id: u64 = conn
            .incr(self.key("id"), 1)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to assign job id: {e}"), e))?;

        let now = now_millis();
        job.id = id.to_string();
        job.status = JobStatus::Created;
        job.stamp(now);
        let job_json = serde_json::to_string(&job)?;

        let mut pipe = redis::pipe();
        pipe.atomic().hset(self.key("jobs"), &job.id, &job_json);
        match job.activate_at_ms {
            Some(at) if at > now => pipe.zadd(self.key("delayed"), &job.id, at),
            _ => pipe.lpush(self.key("waiting"), &job.id),
        };
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to save job: {e}"), e))?;

        debug!(queue = %self.name, job_id = %job.id, "Saved job");
        Ok(job)
    }

    async fn claim(&self) -> HiveResult<Option<Job>> {
        self.ensure_open()?;
        if !self.settings.is_worker {
            return Err(HiveError::queue_msg(format!(
                "Queue '{}' was not opened as a worker",
                self.name
            )));
        }
        let mut conn = self.conn.clone();
        let now = now_millis();

        let claimed: Option<(String, String)> = self
            .claim_script
            .key(self.key("waiting"))
            .key(self.key("active"))
            .key(self.key("delayed"))
            .key(self.key("jobs"))
            .arg(now)
            .arg(now.saturating_add(self.settings.stall_timeout_ms))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to claim job: {e}"), e))?;

        let Some((id, data)) = claimed else {
            return Ok(None);
        };

        let mut job = Self::decode(&data)?;
        if job.status == JobStatus::Active {
            debug!(queue = %self.name, job_id = %id, "Redelivering stalled job");
            job.release_stalled()?;
        }
        job.claim()?;

        conn.hset::<_, _, _, ()>(self.key("jobs"), &id, serde_json::to_string(&job)?)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to mark job active: {e}"), e))?;

        Ok(Some(job))
    }

    async fn extend(&self, job: &Job) -> HiveResult<bool> {
        let mut conn = self.conn.clone();
        let deadline = now_millis().saturating_add(self.settings.stall_timeout_ms);

        // XX leaves acked or redelivered jobs alone.
        let (score,): (Option<f64>,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(self.key("active"))
            .arg("XX")
            .arg(deadline)
            .arg(&job.id)
            .ignore()
            .zscore(self.key("active"), &job.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to extend job lease: {e}"), e))?;

        Ok(score.is_some())
    }

    async fn complete(&self, job: &Job) -> HiveResult<()> {
        let mut conn = self.conn.clone();
        let mut done = job.clone();
        done.complete()?;

        let mut pipe = redis::pipe();
        pipe.atomic().zrem(self.key("active"), &job.id);
        if self.settings.remove_on_success {
            pipe.hdel(self.key("jobs"), &job.id);
        } else {
            pipe.hset(self.key("jobs"), &job.id, serde_json::to_string(&done)?)
                .sadd(self.key("succeeded"), &job.id);
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to complete job: {e}"), e))?;

        debug!(queue = %self.name, job_id = %job.id, "Job completed");
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &SerializedError) -> HiveResult<FailureOutcome> {
        let mut conn = self.conn.clone();
        let now = now_millis();
        let mut failed = job.clone();
        let outcome = failed.record_failure(error.clone(), now)?;
        let job_json = serde_json::to_string(&failed)?;

        let mut pipe = redis::pipe();
        pipe.atomic().zrem(self.key("active"), &job.id);
        match outcome {
            FailureOutcome::Retry { .. } => {
                pipe.hset(self.key("jobs"), &job.id, &job_json);
                match failed.activate_at_ms {
                    Some(at) if at > now => pipe.zadd(self.key("delayed"), &job.id, at),
                    _ => pipe.lpush(self.key("waiting"), &job.id),
                };
            }
            FailureOutcome::Exhausted if self.settings.remove_on_failure => {
                pipe.hdel(self.key("jobs"), &job.id);
            }
            FailureOutcome::Exhausted => {
                pipe.hset(self.key("jobs"), &job.id, &job_json)
                    .sadd(self.key("failed"), &job.id);
            }
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to record job failure: {e}"), e))?;

        Ok(outcome)
    }

    async fn get_job(&self, id: &JobId) -> HiveResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .hget(self.key("jobs"), id)
            .await
            .map_err(|e| HiveError::queue(format!("Failed to get job: {e}"), e))?;
        data.as_deref().map(Self::decode).transpose()
    }

    async fn stats(&self) -> HiveResult<QueueStats> {
        let mut conn = self.conn.clone();
        let (waiting, active, delayed, succeeded, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .llen(self.key("waiting"))
                .zcard(self.key("active"))
                .zcard(self.key("delayed"))
                .scard(self.key("succeeded"))
                .scard(self.key("failed"))
                .query_async(&mut conn)
                .await
                .map_err(|e| HiveError::queue(format!("Failed to get queue statistics: {e}"), e))?;

        Ok(QueueStats {
            waiting,
            active,
            delayed,
            succeeded,
            failed,
        })
    }

    async fn health_check(&self) -> HiveResult<()> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| HiveError::queue(format!("Redis health check failed: {e}"), e))?;

        if pong != "PONG" {
            return Err(HiveError::queue_msg(format!(
                "Unexpected PING response: {pong}"
            )));
        }
        Ok(())
    }

    async fn close(&self) -> HiveResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!(queue = %self.name, "Redis queue closed");
        Ok(())
    }
}
