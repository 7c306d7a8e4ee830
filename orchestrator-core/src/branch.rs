//! Branch Coordinator: wraps the git CLI for session branch lifecycle,
//! work-plan scaffolding and advisory completion checks.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use chrono::Utc;

use crate::error::BranchError;

type BranchResult<T> = Result<T, BranchError>;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Clean,
    InProgress,
    Blocked,
}

#[derive(Debug, Clone)]
pub struct BranchState {
    pub current_branch: String,
    pub is_main: bool,
    pub has_uncommitted_changes: bool,
    pub active_plan: Option<PathBuf>,
    pub work_status: WorkStatus,
}

#[derive(Debug, Clone)]
pub struct WorkPlan {
    pub branch_name: String,
    pub plan_path: PathBuf,
    pub user_request: String,
    pub success_criteria: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionReport {
    pub git_clean: bool,
    pub ahead_of_remote: bool,
    pub last_commit: Option<String>,
    pub missing_artifacts: Vec<String>,
}

impl CompletionReport {
    pub fn is_complete(&self) -> bool {
        self.git_clean && self.missing_artifacts.is_empty()
    }
}

pub struct BranchCoordinator {
    max_retries: u32,
}

impl Default for BranchCoordinator {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }
}

impl BranchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_git(&self, dir: &Path, args: &[&str]) -> BranchResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| BranchError::git("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BranchError::git(args.join(" "), stderr.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_git_ignore_status(&self, dir: &Path, args: &[&str]) -> BranchResult<(bool, String)> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| BranchError::git("execute", e.to_string()))?;
        let text = if output.status.success() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };
        Ok((output.status.success(), text))
    }

    fn run_git_with_retry(&self, dir: &Path, args: &[&str]) -> BranchResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.run_git(dir, args) {
                Ok(output) => return Ok(output),
                Err(e) => {
                    if e.is_retryable() && attempt < self.max_retries {
                        let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                        std::thread::sleep(Duration::from_millis(delay));
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BranchError::git("retry", "max retries exceeded")))
    }

    /// Strip branch names down to `[a-z0-9-]`, collapse hyphen runs, trim to
    /// 50 chars. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
    pub fn sanitize_branch_name(description: &str) -> String {
        let lowered = description.to_lowercase();
        let mut out = String::with_capacity(lowered.len());
        let mut last_was_hyphen = false;
        for ch in lowered.chars() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch);
                last_was_hyphen = false;
            } else if !last_was_hyphen {
                out.push('-');
                last_was_hyphen = true;
            }
        }
        let trimmed = out.trim_matches('-');
        let truncated: String = trimmed.chars().take(50).collect();
        truncated.trim_matches('-').to_string()
    }

    pub fn session_branch_name(session_id: &str) -> String {
        format!("session/{}", Self::sanitize_branch_name(session_id))
    }

    /// List every local branch under the `session/` namespace, used by the
    /// revival detector to find work left behind by an abandoned session.
    pub fn list_session_branches(&self, dir: &Path) -> BranchResult<Vec<String>> {
        let output = self.run_git(
            dir,
            &["branch", "--list", "session/*", "--format=%(refname:short)"],
        )?;
        Ok(output
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn find_active_plan(&self, dir: &Path) -> Option<PathBuf> {
        let plans_dir = dir.join("docs").join("plans");
        let entries = std::fs::read_dir(&plans_dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("ACTIVE-") && n.ends_with(".md"))
                    .unwrap_or(false)
            })
    }

    pub fn get_state(&self, dir: &Path) -> BranchResult<BranchState> {
        let current_branch = self.run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let is_main = current_branch == "main" || current_branch == "master";
        let status = self.run_git(dir, &["status", "--porcelain"])?;
        let has_uncommitted_changes = !status.is_empty();
        let active_plan = self.find_active_plan(dir);

        let work_status = if is_main && !has_uncommitted_changes && active_plan.is_none() {
            WorkStatus::Clean
        } else if !is_main || active_plan.is_some() {
            WorkStatus::InProgress
        } else {
            WorkStatus::Blocked
        };

        Ok(BranchState {
            current_branch,
            is_main,
            has_uncommitted_changes,
            active_plan,
            work_status,
        })
    }

    /// Try `checkout <branch>`; on failure, fall back to `checkout main`
    /// then `checkout -b <branch>`.
    pub fn checkout_session_branch(&self, dir: &Path, branch_name: &str) -> BranchResult<bool> {
        if self.run_git(dir, &["checkout", branch_name]).is_ok() {
            return Ok(true);
        }
        self.run_git_with_retry(dir, &["checkout", "main"])?;
        self.run_git(dir, &["checkout", "-b", branch_name])?;
        Ok(true)
    }

    /// Commit/merge/push/park a session branch. Returns
    /// `Ok(true)` on clean finalization, `Ok(false)` on merge conflict (the
    /// branch is left intact, not an error).
    pub fn finish_branch(
        &self,
        dir: &Path,
        branch_name: &str,
        auto_merge: bool,
    ) -> BranchResult<bool> {
        let status = self.run_git(dir, &["status", "--porcelain"])?;
        if !status.is_empty() {
            self.run_git_with_retry(dir, &["add", "-A"])?;
            let message = format!("Auto-commit session work: {branch_name}");
            self.run_git_with_retry(dir, &["commit", "-m", &message])?;
        }

        if auto_merge {
            self.run_git_with_retry(dir, &["checkout", "main"])?;
            let (ok, stderr) =
                self.run_git_ignore_status(dir, &["merge", "--no-ff", branch_name])?;
            if !ok {
                tracing::warn!(branch = branch_name, error = %stderr, "merge conflict finishing branch");
                return Ok(false);
            }
            self.run_git_with_retry(dir, &["branch", "-d", branch_name])?;
            if let Err(e) = self.run_git_with_retry(dir, &["push"]) {
                tracing::warn!(branch = branch_name, error = %e, "push after merge failed, local history is authoritative");
            }
        } else {
            if let Err(e) = self.run_git_with_retry(dir, &["push", "-u", "origin", branch_name]) {
                tracing::warn!(branch = branch_name, error = %e, "push to park branch failed");
            }
            if let Err(e) = self.run_git_with_retry(dir, &["checkout", "main"]) {
                tracing::warn!(branch = branch_name, error = %e, "failed to return to main after parking branch");
            }
        }
        Ok(true)
    }

    /// Best-effort recovery path used on any unexpected failure mid-finish.
    pub fn return_to_main(&self, dir: &Path) {
        if self.run_git(dir, &["checkout", "main"]).is_err() {
            if let Err(e) = self.run_git(dir, &["checkout", "master"]) {
                tracing::warn!(error = %e, "failed to return to main or master");
            }
        }
    }

    /// ≥2 multi-step indicator keywords, or message length > 100 chars.
    pub fn should_create_work_plan(message_text: &str) -> bool {
        const INDICATORS: &[&str] = &[
            "first", "then", "after that", "step", "plan", "implement",
            "refactor", "migrate", "design", "multiple", "several",
        ];
        let lowered = message_text.to_lowercase();
        let hits = INDICATORS.iter().filter(|kw| lowered.contains(*kw)).count();
        hits >= 2 || message_text.len() > 100
    }

    /// Creates a dated `feature/<YYYYMMDD>-<sanitized>` branch and writes a
    /// plan document as its first commit.
    pub fn create_work_plan(
        &self,
        dir: &Path,
        description: &str,
        success_criteria: &str,
        base_branch: &str,
    ) -> BranchResult<WorkPlan> {
        self.run_git_with_retry(dir, &["checkout", base_branch])?;

        let suffix = Self::sanitize_branch_name(description);
        let date = Utc::now().format("%Y%m%d");
        let branch_name = format!("feature/{date}-{suffix}");
        self.run_git_with_retry(dir, &["checkout", "-b", &branch_name])?;

        let plans_dir = dir.join("docs").join("plans");
        std::fs::create_dir_all(&plans_dir)?;
        let plan_path = plans_dir.join(format!("ACTIVE-{suffix}.md"));
        let created_at = Utc::now();
        let contents = format!(
            "# Work Plan: {description}\n\n\
             ## Original Request\n\n{description}\n\n\
             ## Success Criteria\n\n{success_criteria}\n\n\
             ## Implementation Notes\n\n_(filled in as work proceeds)_\n\n\
             ## Completion Checklist\n\n- [ ] Success criteria verified\n- [ ] Tests passing\n- [ ] Plan document archived\n"
        );
        std::fs::write(&plan_path, contents)?;

        self.run_git_with_retry(dir, &["add", "-A"])?;
        self.run_git_with_retry(
            dir,
            &["commit", "-m", &format!("plan: {description}")],
        )?;

        Ok(WorkPlan {
            branch_name,
            plan_path,
            user_request: description.to_string(),
            success_criteria: success_criteria.to_string(),
            created_at,
        })
    }

    /// Advisory only: git cleanliness plus existence of claimed artifacts.
    /// Never gates auto-continue or delivery.
    pub fn verify_completion(
        &self,
        dir: &Path,
        claimed_artifacts: &[String],
    ) -> BranchResult<CompletionReport> {
        let status = self.run_git(dir, &["status", "--porcelain"])?;
        let git_clean = status.is_empty();

        let ahead_of_remote = self
            .run_git(dir, &["status", "-sb"])
            .map(|s| s.contains("ahead"))
            .unwrap_or(false);

        let last_commit = self
            .run_git(dir, &["log", "-1", "--format=%h %s"])
            .ok()
            .filter(|s| !s.is_empty());

        let missing_artifacts = claimed_artifacts
            .iter()
            .filter(|artifact| {
                let path = dir.join(artifact);
                !path.exists() && !artifact.starts_with("http")
            })
            .cloned()
            .collect();

        Ok(CompletionReport {
            git_clean,
            ahead_of_remote,
            last_commit,
            missing_artifacts,
        })
    }
}
