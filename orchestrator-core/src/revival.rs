//! Revival Detector: on demand, scans git state for unfinished session
//! branches left behind by an agent session that never reported back, and
//! surfaces them to the user as a prompt to resume.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::branch::{BranchCoordinator, WorkStatus};
use crate::error::OrchestratorResult;

const PLAN_PREVIEW_CHARS: usize = 200;

/// What the revival detector found, ready to show the user or feed into a
/// low-priority revival job.
#[derive(Debug, Clone)]
pub struct RevivalInfo {
    pub first_session_branch: Option<String>,
    pub all_session_branches: Vec<String>,
    pub has_uncommitted_changes: bool,
    pub active_plan_preview: Option<String>,
}

/// What gets recorded when a revival prompt is sent, so a later bridge
/// reaction or reply can be correlated back to the session it was about.
#[derive(Debug, Clone)]
pub struct RevivalNotification {
    pub session_id: String,
    pub branch: String,
    pub project_key: String,
    pub working_dir: String,
}

fn now() -> SystemTime {
    SystemTime::now()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

/// Tracks per-chat cooldowns and notification correlations. Both maps are
/// in-memory and process-wide, matching the Job Store's peers (the
/// Steering Queue consumer, the agent registry) in being guarded by a
/// plain mutex rather than anything fancier — contention here is rare.
pub struct RevivalDetector {
    coordinator: BranchCoordinator,
    cooldown: Mutex<HashMap<String, SystemTime>>,
    notifications: Mutex<HashMap<(String, i64), RevivalNotification>>,
    cooldown_window: Duration,
}

impl RevivalDetector {
    pub fn new(cooldown_window: Duration) -> Self {
        Self {
            coordinator: BranchCoordinator::new(),
            cooldown: Mutex::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            cooldown_window,
        }
    }

    fn within_cooldown(&self, chat_id: &str) -> bool {
        let cooldown = self.cooldown.lock().expect("cooldown map poisoned");
        match cooldown.get(chat_id) {
            Some(last) => now().duration_since(*last).unwrap_or_default() < self.cooldown_window,
            None => false,
        }
    }

    /// Check whether `working_dir` has unfinished session work worth
    /// prompting the chat about. Returns `None` both when the chat was
    /// notified too recently and when there is genuinely nothing to report.
    pub fn check_revival(
        &self,
        _project_key: &str,
        working_dir: &Path,
        chat_id: &str,
    ) -> OrchestratorResult<Option<RevivalInfo>> {
        if self.within_cooldown(chat_id) {
            return Ok(None);
        }

        let branches = self.coordinator.list_session_branches(working_dir)?;
        let state = self.coordinator.get_state(working_dir)?;

        if branches.is_empty() && !matches!(state.work_status, WorkStatus::InProgress) {
            return Ok(None);
        }

        let active_plan_preview = state
            .active_plan
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|contents| truncate_chars(contents.trim(), PLAN_PREVIEW_CHARS));

        Ok(Some(RevivalInfo {
            first_session_branch: branches.first().cloned(),
            all_session_branches: branches,
            has_uncommitted_changes: state.has_uncommitted_changes,
            active_plan_preview,
        }))
    }

    /// Record that a revival prompt was sent, starting the cooldown window
    /// and remembering enough to turn a later reaction or reply into an
    /// enqueue call.
    pub fn record_notification(
        &self,
        chat_id: &str,
        message_id: i64,
        notification: RevivalNotification,
    ) {
        self.cooldown
            .lock()
            .expect("cooldown map poisoned")
            .insert(chat_id.to_string(), now());
        self.notifications
            .lock()
            .expect("notification map poisoned")
            .insert((chat_id.to_string(), message_id), notification);
    }

    /// Look up (without removing) the notification a reaction or reply is
    /// responding to.
    pub fn lookup_notification(
        &self,
        chat_id: &str,
        message_id: i64,
    ) -> Option<RevivalNotification> {
        self.notifications
            .lock()
            .expect("notification map poisoned")
            .get(&(chat_id.to_string(), message_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").args(["init"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.email", "test@test.com"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["checkout", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        dir
    }

    #[test]
    fn no_session_branches_and_clean_main_returns_none() {
        let dir = init_repo();
        let detector = RevivalDetector::new(Duration::from_secs(86400));
        let result = detector.check_revival("proj", dir.path(), "chat-1").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn an_abandoned_session_branch_is_surfaced() {
        let dir = init_repo();
        let coordinator = BranchCoordinator::new();
        coordinator.checkout_session_branch(dir.path(), "session/abandoned").unwrap();
        std::fs::write(dir.path().join("wip.txt"), "half done").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "wip"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["checkout", "main"]).current_dir(dir.path()).output().unwrap();

        let detector = RevivalDetector::new(Duration::from_secs(86400));
        let result = detector.check_revival("proj", dir.path(), "chat-1").unwrap();
        let info = result.expect("expected a revival candidate");
        assert_eq!(info.first_session_branch.as_deref(), Some("session/abandoned"));
        assert_eq!(info.all_session_branches, vec!["session/abandoned"]);
    }

    #[test]
    fn repeated_checks_within_cooldown_return_none() {
        let dir = init_repo();
        let coordinator = BranchCoordinator::new();
        coordinator.checkout_session_branch(dir.path(), "session/abandoned").unwrap();
        Command::new("git").args(["checkout", "main"]).current_dir(dir.path()).output().unwrap();

        let detector = RevivalDetector::new(Duration::from_secs(86400));
        let first = detector.check_revival("proj", dir.path(), "chat-1").unwrap();
        assert!(first.is_some());

        detector.record_notification(
            "chat-1",
            42,
            RevivalNotification {
                session_id: "session/abandoned".to_string(),
                branch: "session/abandoned".to_string(),
                project_key: "proj".to_string(),
                working_dir: dir.path().to_string_lossy().to_string(),
            },
        );

        let second = detector.check_revival("proj", dir.path(), "chat-1").unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn notification_lookup_round_trips() {
        let detector = RevivalDetector::new(Duration::from_secs(86400));
        detector.record_notification(
            "chat-1",
            7,
            RevivalNotification {
                session_id: "sess-1".to_string(),
                branch: "session/sess-1".to_string(),
                project_key: "proj".to_string(),
                working_dir: "/repo".to_string(),
            },
        );
        let found = detector.lookup_notification("chat-1", 7).unwrap();
        assert_eq!(found.session_id, "sess-1");
        assert!(detector.lookup_notification("chat-1", 999).is_none());
    }

    #[test]
    fn plan_preview_is_truncated_to_200_chars() {
        let dir = init_repo();
        let coordinator = BranchCoordinator::new();
        coordinator.checkout_session_branch(dir.path(), "session/plan-test").unwrap();
        std::fs::create_dir_all(dir.path().join("docs").join("plans")).unwrap();
        let long_plan = "x".repeat(500);
        std::fs::write(
            dir.path().join("docs").join("plans").join("ACTIVE-foo.md"),
            &long_plan,
        )
        .unwrap();

        let detector = RevivalDetector::new(Duration::from_secs(86400));
        let result = detector.check_revival("proj", dir.path(), "chat-1").unwrap();
        let info = result.expect("expected a revival candidate");
        let preview = info.active_plan_preview.expect("expected a plan preview");
        assert!(preview.chars().count() <= PLAN_PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));
    }
}
