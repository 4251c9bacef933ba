//! Job descriptor: parsing one queue message into an executable unit, and
//! running it under the lifetime / lock / abort policies.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::lock::{LockError, Locker};
use crate::queue::QueueMessage;

/// Wait between lock acquisition attempts. The worker slot stays occupied
/// while a job retries.
pub const JOB_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// A duration that decodes from either a number of seconds or a duration
/// string such as "90s", "1m" or "1h30m". Encodes as seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifeTime(pub Duration);

impl Serialize for LifeTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.subsec_nanos() == 0 {
            serializer.serialize_u64(self.0.as_secs())
        } else {
            serializer.serialize_f64(self.0.as_secs_f64())
        }
    }
}

impl<'de> Deserialize<'de> for LifeTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LifeTimeVisitor;

        impl serde::de::Visitor<'_> for LifeTimeVisitor {
            type Value = LifeTime;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integer number of seconds or a duration string")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(LifeTime(Duration::from_secs(v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("life_time must be nonnegative"));
                }
                Ok(LifeTime(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Duration::try_from_secs_f64(v)
                    .map(LifeTime)
                    .map_err(E::custom)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_duration(v).map(LifeTime).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(LifeTimeVisitor)
    }
}

/// Parse a duration string made of integer-unit pairs, e.g. "10s", "1m",
/// "1h30m", "500ms".
fn parse_duration(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("empty duration".into());
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            'h' => Duration::from_secs(3600),
            's' => Duration::from_secs(1),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(1)
            }
            'm' => Duration::from_secs(60),
            _ => return Err(format!("unknown unit {:?} in duration {:?}", c, s)),
        };

        let n: u32 = digits
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", s))?;
        digits.clear();

        total = unit
            .checked_mul(n)
            .and_then(|d| total.checked_add(d))
            .ok_or_else(|| format!("duration {:?} overflows", s))?;
    }

    if !digits.is_empty() {
        return Err(format!("missing unit in duration {:?}", s));
    }

    Ok(total)
}

/// Decoded queue message body. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub life_time: LifeTime,
    #[serde(default)]
    pub lock_id: String,
    #[serde(default)]
    pub abort_if_locked: bool,
    #[serde(default)]
    pub disable_life_time_trigger: bool,
}

impl std::fmt::Display for MessageBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&serde_json::to_string(self).unwrap_or_default())
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job exceeded its life time")]
    OverLifetime,

    #[error(transparent)]
    Locked(#[from] LockError),

    #[error("job command undefined")]
    CommandUndefined,

    #[error("job id undefined")]
    JobIdUndefined,

    #[error("failed to spawn command: {0}")]
    Spawn(std::io::Error),

    #[error("command exited with {status}")]
    CommandFailed {
        status: std::process::ExitStatus,
        output: Vec<u8>,
    },

    #[error("cannot parse message body: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One unit of work, immutable after creation.
#[derive(Debug, Clone)]
pub struct Job {
    job_id: String,
    command: String,
    environment: HashMap<String, String>,
    event_id: String,
    lock_id: String,
    life_time: Duration,
    sent_at: DateTime<Utc>,
    abort_if_locked: bool,
    trigger: String,
}

impl Job {
    /// Decode a queue message into a job. The job id comes from the message
    /// envelope, the send time from the envelope send timestamp, and the
    /// trigger from configuration unless the body disables it.
    pub fn from_message(msg: &QueueMessage, trigger: &str) -> Result<Job, JobError> {
        let body: MessageBody = serde_json::from_str(&msg.body)?;

        tracing::info!(
            message_id = %msg.id,
            body = %body,
            sent_timestamp = %msg.sent_at,
            "new job"
        );

        Ok(Job {
            job_id: msg.id.clone(),
            command: body.command,
            environment: body.envs,
            event_id: body.event_id,
            lock_id: body.lock_id,
            life_time: body.life_time.0,
            sent_at: msg.sent_at,
            abort_if_locked: body.abort_if_locked,
            trigger: if body.disable_life_time_trigger {
                String::new()
            } else {
                trigger.to_string()
            },
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the job under its execution policy:
    ///
    /// 1. An expired job fires its trigger (when set) and returns
    ///    [`JobError::OverLifetime`] without running the user command.
    /// 2. When a lock id and event id are present, acquire the lock; on
    ///    contention either abort or retry from the lifetime check after
    ///    [`JOB_RETRY_INTERVAL`].
    /// 3. Validate, run `sh -c <command>` with the job's environment on top
    ///    of the parent's, and capture combined stdout and stderr.
    /// 4. Release the lock; release failures are logged and discarded.
    pub async fn execute(&self, locker: &dyn Locker) -> Result<Vec<u8>, JobError> {
        loop {
            if self.over_lifetime() {
                if self.trigger.is_empty() {
                    return Err(JobError::OverLifetime);
                }

                let desc = format!(
                    "job_id:{}, event_id:{}, command:{}, life_time:{:?}, sent_timestamp:{}",
                    self.job_id, self.event_id, self.command, self.life_time, self.sent_at
                );
                match invoke_trigger(&self.trigger, &desc).await {
                    Ok(out) => {
                        tracing::debug!(output = %String::from_utf8_lossy(&out), "trigger output");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to invoke life time trigger");
                    }
                }

                return Err(JobError::OverLifetime);
            }

            if self.lock_id.is_empty() || self.event_id.is_empty() {
                break;
            }

            match locker.lock(&self.lock_id, &self.event_id).await {
                Ok(()) => break,
                Err(err) => {
                    tracing::error!(lock_id = %self.lock_id, error = %err, "failed to acquire lock");
                    if self.abort_if_locked {
                        return Err(JobError::Locked(err));
                    }
                    tokio::time::sleep(JOB_RETRY_INTERVAL).await;
                }
            }
        }

        let result = self.run_command().await;

        if !self.lock_id.is_empty() {
            if let Err(err) = locker.unlock(&self.lock_id).await {
                tracing::error!(lock_id = %self.lock_id, error = %err, "failed to release lock");
            }
        }

        result
    }

    fn over_lifetime(&self) -> bool {
        if self.life_time.is_zero() {
            return false;
        }

        let life_time = match chrono::Duration::from_std(self.life_time) {
            Ok(d) => d,
            Err(_) => return false,
        };
        let elapsed = Utc::now().signed_duration_since(self.sent_at);

        if elapsed > life_time {
            tracing::warn!(
                job_id = %self.job_id,
                life_time = ?self.life_time,
                elapsed = %elapsed,
                "job is over its life time"
            );
            return true;
        }

        false
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.command.is_empty() {
            return Err(JobError::CommandUndefined);
        }
        if self.job_id.is_empty() {
            return Err(JobError::JobIdUndefined);
        }
        Ok(())
    }

    async fn run_command(&self) -> Result<Vec<u8>, JobError> {
        self.validate()?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .envs(&self.environment)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(JobError::Spawn)?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(JobError::CommandFailed {
                status: output.status,
                output: combined,
            })
        }
    }
}

/// Run the life-time trigger with a one-line job description on stdin and
/// return its combined output.
async fn invoke_trigger(command: &str, message: &str) -> std::io::Result<Vec<u8>> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(message.as_bytes()).await {
            tracing::error!(error = %err, "failed to write trigger stdin");
        }
    }

    let output = child.wait_with_output().await?;

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    Ok(combined)
}
