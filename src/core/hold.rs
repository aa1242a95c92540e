//! Hold/command coordination (C7).
//!
//! Lets the `get_user_request` tool block until a human posts a command
//! scoped by `(apiKeyHash, taskId)`, with a timeout. External channels that
//! actually deliver commands are out of core scope; `post_command` stands in
//! for them so the broker is exercisable standalone.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::RequestContext;

const DEFAULT_HOLD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Consumed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub id: String,
    pub content: String,
    pub status: CommandStatus,
    pub task_id: String,
    pub user_identity: String,
    pub api_key_hash: String,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl PendingCommand {
    fn new(content: impl Into<String>, task_id: impl Into<String>, user_identity: impl Into<String>, api_key_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            status: CommandStatus::Pending,
            task_id: task_id.into(),
            user_identity: user_identity.into(),
            api_key_hash: api_key_hash.into(),
            created_at: Utc::now(),
            consumed_at: None,
        }
    }
}

fn scope_key(api_key_hash: &str, task_id: &str) -> String {
    format!("{api_key_hash}::{task_id}")
}

/// Coordinates pending commands and waiters. A single mutex guards the
/// pending-command map so consume-and-transition is atomic: two concurrent
/// waiters can never both receive the same command.
pub struct HoldBroker {
    pending: Mutex<HashMap<String, Vec<PendingCommand>>>,
    fallback_notify: Notify,
    hold_timeout: Duration,
}

impl HoldBroker {
    pub fn new(hold_timeout_secs: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            fallback_notify: Notify::new(),
            hold_timeout: Duration::from_secs(if hold_timeout_secs == 0 {
                DEFAULT_HOLD_TIMEOUT_SECS
            } else {
                hold_timeout_secs
            }),
        }
    }

    /// External channels (out of core scope) call this to post a command
    /// into the broker.
    pub fn post_command(&self, api_key_hash: &str, task_id: &str, user_identity: &str, content: impl Into<String>) {
        let key = scope_key(api_key_hash, task_id);
        let command = PendingCommand::new(content, task_id, user_identity, api_key_hash);
        self.pending.lock().entry(key).or_default().push(command);
        self.fallback_notify.notify_waiters();
    }

    pub fn is_hold_active(&self, api_key_hash: &str, task_id: &str) -> bool {
        let key = scope_key(api_key_hash, task_id);
        self.pending
            .lock()
            .get(&key)
            .map(|v| v.iter().any(|c| c.status == CommandStatus::Pending))
            .unwrap_or(false)
    }

    /// Atomically pop the oldest pending command for this scope, if any,
    /// transitioning it to `Consumed`.
    pub fn try_consume_one(&self, api_key_hash: &str, task_id: &str) -> Option<PendingCommand> {
        let key = scope_key(api_key_hash, task_id);
        let mut pending = self.pending.lock();
        let bucket = pending.get_mut(&key)?;
        let idx = bucket
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == CommandStatus::Pending)
            .min_by_key(|(_, c)| c.created_at)
            .map(|(i, _)| i)?;
        let mut command = bucket[idx].clone();
        command.status = CommandStatus::Consumed;
        command.consumed_at = Some(Utc::now());
        bucket[idx] = command.clone();
        Some(command)
    }

    /// Consume up to `limit` pending commands, FIFO by `created_at`.
    pub fn try_consume_many(&self, api_key_hash: &str, task_id: &str, limit: usize) -> Vec<PendingCommand> {
        let mut consumed = Vec::new();
        while consumed.len() < limit {
            match self.try_consume_one(api_key_hash, task_id) {
                Some(c) => consumed.push(c),
                None => break,
            }
        }
        consumed
    }

    /// Blocks until a command arrives for this scope, the context is
    /// cancelled, or the hold timeout elapses. Returns `(None, false)` on
    /// cancellation (per the spec's cancellation policy), `(None, true)` on
    /// timeout, `(Some(cmd), false)` on success.
    pub async fn wait_for_command(
        &self,
        ctx: &RequestContext,
        api_key_hash: &str,
        task_id: &str,
    ) -> (Option<PendingCommand>, bool) {
        if let Some(command) = self.try_consume_one(api_key_hash, task_id) {
            return (Some(command), false);
        }

        let poll = async {
            loop {
                tokio::select! {
                    _ = self.fallback_notify.notified() => {
                        if let Some(command) = self.try_consume_one(api_key_hash, task_id) {
                            return Some(command);
                        }
                    }
                    _ = ctx.cancellation.cancelled() => return None,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {
                        if let Some(command) = self.try_consume_one(api_key_hash, task_id) {
                            return Some(command);
                        }
                    }
                }
            }
        };

        if ctx.is_cancelled() {
            return (None, false);
        }

        match tokio_timeout(self.hold_timeout, poll).await {
            Ok(Some(command)) => (Some(command), false),
            Ok(None) => (None, false),
            Err(_) => (None, true),
        }
    }

    /// Walks all pending commands and expires those older than the hold
    /// timeout. Intended to run on a `tokio::time::interval` loop.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.hold_timeout).unwrap_or_default();
        let mut expired = 0;
        let mut pending = self.pending.lock();
        for bucket in pending.values_mut() {
            for command in bucket.iter_mut() {
                if command.status == CommandStatus::Pending && command.created_at < cutoff {
                    command.status = CommandStatus::Expired;
                    expired += 1;
                }
            }
        }
        expired
    }
}

/// Spawns the background sweeper, mirroring the refresh-loop pattern this
/// broker is grounded on. Runs until the process exits.
pub fn spawn_sweeper(broker: std::sync::Arc<HoldBroker>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    let interval_secs = if interval_secs == 0 {
        DEFAULT_SWEEP_INTERVAL_SECS
    } else {
        interval_secs
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let expired = broker.sweep_expired();
            if expired > 0 {
                info!(expired, "swept expired hold commands");
            } else {
                debug!("hold sweep found nothing to expire");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityContext;

    fn ctx() -> RequestContext {
        RequestContext::new("req-1", IdentityContext::anonymous())
    }

    #[test]
    fn hold_is_not_active_initially() {
        let broker = HoldBroker::new(300);
        assert!(!broker.is_hold_active("hash", "default"));
    }

    #[test]
    fn post_then_consume_is_fifo() {
        let broker = HoldBroker::new(300);
        broker.post_command("hash", "default", "user_hash", "first");
        broker.post_command("hash", "default", "user_hash", "second");
        let first = broker.try_consume_one("hash", "default").unwrap();
        assert_eq!(first.content, "first");
        let second = broker.try_consume_one("hash", "default").unwrap();
        assert_eq!(second.content, "second");
        assert!(broker.try_consume_one("hash", "default").is_none());
    }

    #[test]
    fn consumed_command_cannot_be_consumed_twice() {
        let broker = HoldBroker::new(300);
        broker.post_command("hash", "default", "user_hash", "only");
        let first = broker.try_consume_one("hash", "default");
        assert!(first.is_some());
        assert!(broker.try_consume_one("hash", "default").is_none());
    }

    #[tokio::test]
    async fn wait_for_command_returns_immediately_when_already_pending() {
        let broker = HoldBroker::new(300);
        broker.post_command("hash", "default", "user_hash", "hello");
        let (command, timed_out) = broker.wait_for_command(&ctx(), "hash", "default").await;
        assert!(!timed_out);
        assert_eq!(command.unwrap().content, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_command_times_out_when_nothing_arrives() {
        let broker = HoldBroker::new(1);
        let wait = broker.wait_for_command(&ctx(), "hash", "default");
        let result = tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap();
        assert!(result.0.is_none());
        assert!(result.1);
    }

    #[tokio::test]
    async fn wait_for_command_respects_cancellation() {
        let broker = HoldBroker::new(300);
        let context = ctx();
        context.cancellation.cancel();
        let (command, timed_out) = broker.wait_for_command(&context, "hash", "default").await;
        assert!(command.is_none());
        assert!(!timed_out);
    }

    #[test]
    fn sweep_expires_stale_pending_commands() {
        let broker = HoldBroker::new(300);
        broker.post_command("hash", "default", "user_hash", "stale");
        {
            let mut pending = broker.pending.lock();
            for bucket in pending.values_mut() {
                for command in bucket.iter_mut() {
                    command.created_at = Utc::now() - chrono::Duration::seconds(600);
                }
            }
        }
        let expired = broker.sweep_expired();
        assert_eq!(expired, 1);
        assert!(!broker.is_hold_active("hash", "default"));
    }
}
