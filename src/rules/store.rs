//! Shared rule store: snapshot, reviewer toggles and chat commands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::error::RulesError;
use crate::tickets::TicketKind;

use super::file::{ApprovalRule, RuleSet};

/// Recognized chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    Enable,
    Disable,
    Status,
    PollNow,
}

/// Result of a toggle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Updated { enabled: bool },
    /// Sender is outside the allowlist; the toggle is unchanged.
    Unauthorized,
}

/// Rule snapshot plus runtime state.
///
/// The snapshot swaps atomically when the file changes on disk; a broken
/// edit keeps the previous snapshot active. Per-operator toggles live only
/// in memory and reset to the file default on restart.
#[derive(Debug)]
pub struct RuleStore {
    set: ArcSwap<RuleSet>,
    path: Option<PathBuf>,
    modified: Mutex<Option<SystemTime>>,
    toggles: Mutex<HashMap<String, bool>>,
}

impl RuleStore {
    /// Loads the rules file. Any read, parse or validation error here is
    /// fatal; startup must not continue with a guessed rule set.
    pub fn load(path: PathBuf) -> Result<Self, RulesError> {
        let set = RuleSet::load(&path)?;
        let modified = file_mtime(&path);
        Ok(Self {
            set: ArcSwap::from_pointee(set),
            path: Some(path),
            modified: Mutex::new(modified),
            toggles: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a store from an in-memory snapshot.
    #[must_use]
    pub fn from_set(set: RuleSet) -> Self {
        Self {
            set: ArcSwap::from_pointee(set),
            path: None,
            modified: Mutex::new(None),
            toggles: Mutex::new(HashMap::new()),
        }
    }

    /// Current snapshot. Lock-free.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.set.load_full()
    }

    /// Re-reads the rules file when its mtime moved. A file that fails to
    /// parse after startup keeps the active snapshot and is retried on the
    /// next call.
    pub fn maybe_reload(&self) {
        let Some(path) = &self.path else { return };
        let current = file_mtime(path);
        {
            let mut guard = self
                .modified
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *guard == current {
                return;
            }
            *guard = current;
        }
        match RuleSet::load(path) {
            Ok(fresh) => {
                self.set.store(Arc::new(fresh));
                tracing::info!(path = %path.display(), "approval rules reloaded");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "rules reload failed, keeping previous snapshot");
            }
        }
    }

    /// Behavior for `kind` under the current snapshot.
    #[must_use]
    pub fn get_rule(&self, kind: TicketKind) -> ApprovalRule {
        self.set.load().rule(kind)
    }

    #[must_use]
    pub fn operators(&self) -> Vec<String> {
        self.set.load().operators.clone()
    }

    #[must_use]
    pub fn is_operator(&self, user_id: &str) -> bool {
        self.set.load().is_operator(user_id)
    }

    /// Whether auto-approval currently runs for `operator`.
    #[must_use]
    pub fn is_enabled(&self, operator: &str) -> bool {
        let toggles = self
            .toggles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        toggles
            .get(operator)
            .copied()
            .unwrap_or_else(|| self.set.load().default_enabled)
    }

    /// Flips the toggle for `operator`. Only allowlisted reviewers may
    /// change their own state; everyone else gets an explicit refusal.
    pub fn set_enabled(&self, operator: &str, enabled: bool) -> ToggleOutcome {
        if !self.is_operator(operator) {
            tracing::warn!(operator, "toggle attempt from outside the allowlist");
            return ToggleOutcome::Unauthorized;
        }
        let mut toggles = self
            .toggles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        toggles.insert(operator.to_string(), enabled);
        tracing::info!(operator, enabled, "auto-approval toggle updated");
        ToggleOutcome::Updated { enabled }
    }

    /// Exact-match lookup against the configured command vocabulary.
    #[must_use]
    pub fn parse_command(&self, text: &str) -> Option<SwitchCommand> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let set = self.set.load();
        let words = &set.commands;
        let hit = |list: &[String]| list.iter().any(|w| w == text);
        if hit(&words.enable) {
            Some(SwitchCommand::Enable)
        } else if hit(&words.disable) {
            Some(SwitchCommand::Disable)
        } else if hit(&words.status) {
            Some(SwitchCommand::Status)
        } else if hit(&words.poll) {
            Some(SwitchCommand::PollNow)
        } else {
            None
        }
    }

    /// Status reply for the `status` command.
    #[must_use]
    pub fn status_text(&self, operator: &str) -> String {
        let set = self.set.load();
        let mut lines = vec![format!(
            "🤖 自动审批：{}",
            if self.is_enabled(operator) {
                "已开启"
            } else {
                "已关闭"
            }
        )];
        for kind in TicketKind::all() {
            let line = if set.is_excluded(kind) {
                format!("· {}：不参与", kind.display_name())
            } else {
                let rule = set.rule(kind);
                match (rule.auto_approve, rule.ai_review) {
                    (true, true) => format!("· {}：开启（AI 审查）", kind.display_name()),
                    (true, false) => format!("· {}：开启", kind.display_name()),
                    (false, _) => format!("· {}：关闭", kind.display_name()),
                }
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
