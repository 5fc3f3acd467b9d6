//! Presence operations over the session store.
//!
//! Per username the state is binary: absent or online. Every mutation is
//! published on a broadcast channel; publishing never waits on receivers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use presence_core::{Identity, PresenceEntry, PresenceError, PresenceUser, SessionStore};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_anonymous: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub total_online: usize,
    pub online_users: Vec<PresenceUser>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub total_online: usize,
    pub online_users: Vec<PresenceUser>,
    pub message: String,
    /// False when the user was already offline.
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub total: usize,
    pub users: Vec<PresenceUser>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStats {
    pub total_online: usize,
    pub anonymous_online: usize,
    pub uptime_seconds: u64,
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Joined,
    Refreshed,
    LoggedOut,
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceChange {
    pub kind: ChangeKind,
    pub username: String,
}

// ---------------------------------------------------------------------------
// PresenceService
// ---------------------------------------------------------------------------

/// Heartbeat, logout and snapshot operations.
///
/// Owns a handle to an injected [`SessionStore`]; several services over
/// distinct stores can coexist in one process.
#[derive(Debug)]
pub struct PresenceService {
    store: Arc<SessionStore>,
    events: broadcast::Sender<PresenceChange>,
    stale_after: Duration,
    started_at: Instant,
}

impl PresenceService {
    pub fn new(store: Arc<SessionStore>, stale_after: Duration, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            store,
            events,
            stale_after,
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Receiver for every subsequent presence change.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.events.subscribe()
    }

    /// Upsert the caller's entry and return the resulting snapshot.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse, PresenceError> {
        let username = required_username(req.username.as_deref())?;
        if !presence_core::validate_format(username) {
            return Err(PresenceError::Validation(format!(
                "invalid username '{username}': expected 3-30 letters, digits or underscores"
            )));
        }

        let display_name = req
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(username);
        let identity = Identity::new(username, display_name, req.is_anonymous.unwrap_or(false))
            .with_session_id(req.session_id.unwrap_or_default());

        let joined = self.store.upsert(identity);
        let kind = if joined {
            tracing::debug!(username = %username, "user came online");
            ChangeKind::Joined
        } else {
            tracing::trace!(username = %username, "heartbeat refreshed");
            ChangeKind::Refreshed
        };
        self.publish(kind, username);

        let online_users = self.users();
        Ok(HeartbeatResponse {
            total_online: online_users.len(),
            online_users,
        })
    }

    /// Remove the caller's entry. Logging out an absent user succeeds.
    pub fn logout(&self, req: LogoutRequest) -> Result<LogoutResponse, PresenceError> {
        let username = required_username(req.username.as_deref())?.trim();

        let removed = self.store.remove(username);
        let message = if removed {
            tracing::debug!(username = %username, "user logged out");
            self.publish(ChangeKind::LoggedOut, username);
            format!("User {username} logged out")
        } else {
            tracing::debug!(username = %username, "logout for user not online");
            format!("User {username} not found (already offline)")
        };

        let online_users = self.users();
        Ok(LogoutResponse {
            total_online: online_users.len(),
            online_users,
            message,
            removed,
        })
    }

    pub fn get_presence(&self) -> PresenceSnapshot {
        let users = self.users();
        PresenceSnapshot {
            total: users.len(),
            users,
        }
    }

    pub fn stats(&self) -> PresenceStats {
        let entries = self.store.snapshot();
        PresenceStats {
            total_online: entries.len(),
            anonymous_online: entries.iter().filter(|e| e.identity.is_anonymous).count(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Evict entries older than the staleness threshold. Each eviction is
    /// announced like a logout.
    pub fn reap(&self) -> Vec<String> {
        let removed = self.store.evict_older_than(self.stale_after);
        if !removed.is_empty() {
            tracing::info!(
                removed = removed.len(),
                users = ?removed,
                stale_after_secs = self.stale_after.as_secs(),
                "evicted stale presence entries"
            );
        }
        for username in &removed {
            self.publish(ChangeKind::Evicted, username);
        }
        removed
    }

    /// Snapshot sorted by display name (case-insensitive), then username.
    fn users(&self) -> Vec<PresenceUser> {
        let mut entries: Vec<PresenceEntry> = self.store.snapshot();
        entries.sort_by(|a, b| {
            a.identity
                .display_name
                .to_lowercase()
                .cmp(&b.identity.display_name.to_lowercase())
                .then_with(|| a.identity.username.cmp(&b.identity.username))
        });
        entries.iter().map(PresenceUser::from).collect()
    }

    fn publish(&self, kind: ChangeKind, username: &str) {
        // Err only means nobody is listening.
        let _ = self.events.send(PresenceChange {
            kind,
            username: username.to_string(),
        });
    }
}

/// The username as submitted, rejecting a missing or blank one.
fn required_username(username: Option<&str>) -> Result<&str, PresenceError> {
    match username {
        Some(u) if !u.trim().is_empty() => Ok(u),
        _ => Err(PresenceError::Validation("username is required".into())),
    }
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

/// Periodically evict stale entries until `cancel` fires.
pub async fn run_reaper(
    service: Arc<PresenceService>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be stale yet.
    ticker.tick().await;

    tracing::info!(
        interval_secs = every.as_secs(),
        stale_after_secs = service.stale_after().as_secs(),
        "reaper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.reap();
            }
            _ = cancel.cancelled() => {
                tracing::info!("reaper: cancellation requested, stopping");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn service() -> PresenceService {
        PresenceService::new(Arc::new(SessionStore::new()), Duration::from_secs(90), 64)
    }

    fn hb(username: &str, display_name: &str, is_anonymous: bool) -> HeartbeatRequest {
        HeartbeatRequest {
            username: Some(username.into()),
            display_name: Some(display_name.into()),
            is_anonymous: Some(is_anonymous),
            session_id: None,
        }
    }

    fn logout(username: &str) -> LogoutRequest {
        LogoutRequest {
            username: Some(username.into()),
        }
    }

    #[test]
    fn heartbeat_then_presence_contains_user_once() {
        let svc = service();
        let resp = svc.heartbeat(hb("user1", "User One", false)).unwrap();
        assert_eq!(resp.total_online, 1);
        assert_eq!(resp.online_users[0].username, "user1");

        let snap = svc.get_presence();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.users.iter().filter(|u| u.username == "user1").count(), 1);
    }

    #[test]
    fn repeated_heartbeats_never_duplicate() {
        let svc = service();
        for _ in 0..5 {
            svc.heartbeat(hb("user1", "User One", false)).unwrap();
        }
        let resp = svc.heartbeat(hb("user1", "Renamed", true)).unwrap();
        assert_eq!(resp.total_online, 1);
        assert_eq!(resp.online_users[0].display_name, "Renamed");
        assert!(resp.online_users[0].is_anonymous);
    }

    #[test]
    fn heartbeat_defaults_display_name_and_flags() {
        let svc = service();
        let req = HeartbeatRequest {
            username: Some("plain_user".into()),
            display_name: Some("   ".into()),
            ..Default::default()
        };
        let resp = svc.heartbeat(req).unwrap();
        assert_eq!(resp.online_users[0].display_name, "plain_user");
        assert!(!resp.online_users[0].is_anonymous);
    }

    #[test]
    fn heartbeat_keeps_session_id_in_store() {
        let svc = service();
        let req = HeartbeatRequest {
            session_id: Some("sess-42".into()),
            ..hb("user1", "User One", false)
        };
        svc.heartbeat(req).unwrap();
        let entry = svc.store().get("user1").unwrap();
        assert_eq!(entry.identity.session_id, "sess-42");
    }

    #[test]
    fn heartbeat_missing_username_rejected_without_mutation() {
        let svc = service();
        let err = svc.heartbeat(HeartbeatRequest::default()).unwrap_err();
        assert_eq!(err, PresenceError::Validation("username is required".into()));

        let blank = HeartbeatRequest {
            username: Some("  ".into()),
            ..Default::default()
        };
        assert!(svc.heartbeat(blank).is_err());
        assert!(svc.store().is_empty());
    }

    #[test]
    fn heartbeat_bad_format_rejected() {
        let svc = service();
        assert!(svc.heartbeat(hb("no spaces allowed", "x", false)).is_err());
        assert!(svc.heartbeat(hb("ab", "x", false)).is_err());
        assert!(svc.store().is_empty());
    }

    #[test]
    fn heartbeat_username_with_surrounding_whitespace_rejected() {
        let svc = service();
        let err = svc.heartbeat(hb(" user1 ", "User One", false)).unwrap_err();
        assert!(matches!(err, PresenceError::Validation(msg) if msg.contains("' user1 '")));
        assert!(svc.store().is_empty());
    }

    #[test]
    fn logout_trims_username() {
        let svc = service();
        svc.heartbeat(hb("user1", "User One", false)).unwrap();
        let resp = svc.logout(logout("  user1 ")).unwrap();
        assert!(resp.removed);
        assert_eq!(resp.message, "User user1 logged out");
    }

    #[test]
    fn logout_removes_and_is_idempotent() {
        let svc = service();
        svc.heartbeat(hb("user1", "User One", false)).unwrap();

        let first = svc.logout(logout("user1")).unwrap();
        assert!(first.removed);
        assert_eq!(first.total_online, 0);
        assert_eq!(first.message, "User user1 logged out");

        let second = svc.logout(logout("user1")).unwrap();
        assert!(!second.removed);
        assert!(second.message.contains("not found"));
        assert!(svc.get_presence().users.is_empty());
    }

    #[test]
    fn logout_missing_username_rejected() {
        let svc = service();
        assert!(svc.logout(LogoutRequest::default()).is_err());
    }

    #[test]
    fn end_to_end_scenario() {
        let svc = service();
        svc.heartbeat(hb("user1", "Named User", false)).unwrap();
        let resp = svc.heartbeat(hb("user2", "Anon Fox", true)).unwrap();
        assert_eq!(resp.total_online, 2);

        let out = svc.logout(logout("user1")).unwrap();
        assert_eq!(out.total_online, 1);
        assert!(out.online_users.iter().all(|u| u.username != "user1"));
        assert!(out.online_users.iter().any(|u| u.username == "user2"));

        let missing = svc.logout(logout("nonexistent_user")).unwrap();
        assert_eq!(missing.total_online, 1);
        assert_eq!(missing.message, "User nonexistent_user not found (already offline)");
    }

    #[test]
    fn snapshot_sorted_by_display_name() {
        let svc = service();
        svc.heartbeat(hb("zed", "bravo", false)).unwrap();
        svc.heartbeat(hb("amy", "Charlie", false)).unwrap();
        svc.heartbeat(hb("bob", "Alpha", false)).unwrap();
        let names: Vec<_> = svc
            .get_presence()
            .users
            .into_iter()
            .map(|u| u.display_name)
            .collect();
        assert_eq!(names, vec!["Alpha", "bravo", "Charlie"]);
    }

    #[test]
    fn stats_count_anonymous() {
        let svc = service();
        svc.heartbeat(hb("user1", "One", false)).unwrap();
        svc.heartbeat(hb("user2", "Two", true)).unwrap();
        let stats = svc.stats();
        assert_eq!(stats.total_online, 2);
        assert_eq!(stats.anonymous_online, 1);
    }

    #[test]
    fn reap_evicts_stale_and_keeps_fresh() {
        let svc = service();
        let old = Utc::now() - chrono::Duration::seconds(300);
        svc.store()
            .upsert_at(Identity::new("gone_user", "Gone", true), old);
        svc.heartbeat(hb("live_user", "Live", false)).unwrap();

        let removed = svc.reap();
        assert_eq!(removed, vec!["gone_user".to_string()]);
        let snap = svc.get_presence();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.users[0].username, "live_user");
    }

    #[test]
    fn mutations_are_published() {
        let svc = service();
        let mut rx = svc.subscribe();

        svc.heartbeat(hb("user1", "One", false)).unwrap();
        svc.heartbeat(hb("user1", "One", false)).unwrap();
        svc.logout(logout("user1")).unwrap();
        svc.logout(logout("user1")).unwrap();
        svc.store().upsert_at(
            Identity::new("stale_one", "Stale", false),
            Utc::now() - chrono::Duration::seconds(300),
        );
        svc.reap();

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| (c.kind, c.username))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Joined, "user1".to_string()),
                (ChangeKind::Refreshed, "user1".to_string()),
                (ChangeKind::LoggedOut, "user1".to_string()),
                (ChangeKind::Evicted, "stale_one".to_string()),
            ]
        );
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let svc = service();
        assert!(svc.heartbeat(hb("user1", "One", false)).is_ok());
    }

    #[tokio::test]
    async fn concurrent_logouts_are_independent() {
        let svc = Arc::new(service());
        svc.heartbeat(hb("user_a", "A", false)).unwrap();
        svc.heartbeat(hb("user_b", "B", false)).unwrap();
        svc.heartbeat(hb("user_c", "C", false)).unwrap();

        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.logout(logout("user_a")) })
        };
        let b = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.logout(logout("user_b")) })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert!(a.removed);
        assert!(b.removed);

        let snap = svc.get_presence();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.users[0].username, "user_c");
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_evicts_on_tick_and_stops_on_cancel() {
        let svc = Arc::new(PresenceService::new(
            Arc::new(SessionStore::new()),
            Duration::from_secs(60),
            16,
        ));
        svc.store().upsert_at(
            Identity::new("sleepy", "Sleepy", true),
            Utc::now() - chrono::Duration::seconds(600),
        );
        let mut rx = svc.subscribe();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_reaper(
            Arc::clone(&svc),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        let change = tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("reaper should tick")
            .expect("channel open");
        assert_eq!(change.kind, ChangeKind::Evicted);
        assert_eq!(change.username, "sleepy");
        assert!(svc.store().is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reaper should stop")
            .unwrap();
    }
}
