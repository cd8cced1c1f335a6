//! Rules file schema and validation.
//!
//! The YAML file names reviewers, per-kind auto-approval behavior, excluded
//! kinds, approval-code overrides and chat command synonyms. Kind keys accept
//! either the registry slug (`seal-use`) or the Chinese display name.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::RulesError;
use crate::tickets::TicketKind;

/// Auto-approval behavior for one ticket kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalRule {
    /// The poller may decide tasks of this kind.
    pub auto_approve: bool,
    /// Decisions require an attachment compliance judgment first.
    pub ai_review: bool,
    /// Decision comment used on approval, overriding the kind default.
    pub pass_comment: Option<String>,
}

/// Chat command vocabulary, overridable per deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandWords {
    #[serde(default = "default_enable_words")]
    pub enable: Vec<String>,
    #[serde(default = "default_disable_words")]
    pub disable: Vec<String>,
    #[serde(default = "default_status_words")]
    pub status: Vec<String>,
    #[serde(default = "default_poll_words")]
    pub poll: Vec<String>,
}

impl Default for CommandWords {
    fn default() -> Self {
        Self {
            enable: default_enable_words(),
            disable: default_disable_words(),
            status: default_status_words(),
            poll: default_poll_words(),
        }
    }
}

fn default_enable_words() -> Vec<String> {
    vec!["开启自动审批".into(), "打开自动审批".into()]
}

fn default_disable_words() -> Vec<String> {
    vec!["关闭自动审批".into()]
}

fn default_status_words() -> Vec<String> {
    vec!["自动审批状态".into(), "自动审批开没开".into()]
}

fn default_poll_words() -> Vec<String> {
    vec!["轮询".into()]
}

#[derive(Debug, Clone, Deserialize)]
struct RuleEntry {
    #[serde(default = "default_true")]
    auto_approve: bool,
    #[serde(default)]
    ai_review: bool,
    #[serde(default)]
    pass_comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    default_enabled: bool,
    #[serde(default)]
    operators: Vec<String>,
    #[serde(default)]
    rules: HashMap<String, RuleEntry>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    code_override: HashMap<String, String>,
    #[serde(default)]
    commands: CommandWords,
}

/// Validated, immutable rule snapshot.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Initial per-operator toggle value.
    pub default_enabled: bool,
    /// Reviewer allowlist. Auto-processing never acts for anyone else.
    pub operators: Vec<String>,
    rules: HashMap<TicketKind, ApprovalRule>,
    exclude: HashSet<TicketKind>,
    overrides: HashMap<TicketKind, String>,
    pub commands: CommandWords,
}

impl RuleSet {
    /// Parses and validates YAML rule text.
    pub fn parse(text: &str) -> Result<Self, RulesError> {
        let file: RulesFile =
            serde_yaml::from_str(text).map_err(|e| RulesError::Parse(e.to_string()))?;

        let mut rules = HashMap::new();
        for (key, entry) in file.rules {
            let kind = parse_kind(&key)?;
            let previous = rules.insert(
                kind,
                ApprovalRule {
                    auto_approve: entry.auto_approve,
                    ai_review: entry.ai_review,
                    pass_comment: entry.pass_comment,
                },
            );
            if previous.is_some() {
                return Err(RulesError::Parse(format!(
                    "duplicate rule for {kind} (slug and display name both present)"
                )));
            }
        }

        let mut exclude = HashSet::new();
        for key in &file.exclude {
            exclude.insert(parse_kind(key)?);
        }

        let mut overrides = HashMap::new();
        for (key, code) in file.code_override {
            overrides.insert(parse_kind(&key)?, code);
        }

        Ok(Self {
            default_enabled: file.default_enabled,
            operators: file.operators,
            rules,
            exclude,
            overrides,
            commands: file.commands,
        })
    }

    /// Reads and validates the rules file at `path`.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|e| RulesError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Behavior for `kind`. Total: kinds absent from the file, and excluded
    /// kinds, get the no-auto-approval default.
    #[must_use]
    pub fn rule(&self, kind: TicketKind) -> ApprovalRule {
        if self.exclude.contains(&kind) {
            return ApprovalRule::default();
        }
        self.rules.get(&kind).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn is_excluded(&self, kind: TicketKind) -> bool {
        self.exclude.contains(&kind)
    }

    #[must_use]
    pub fn is_operator(&self, user_id: &str) -> bool {
        self.operators.iter().any(|id| id == user_id)
    }

    /// Effective approval definition code, honoring overrides.
    #[must_use]
    pub fn approval_code(&self, kind: TicketKind) -> &str {
        self.overrides
            .get(&kind)
            .map_or_else(|| kind.approval_code(), String::as_str)
    }

    /// Kinds the poller queries, with their effective codes. Excluded kinds
    /// are skipped entirely; they may not even exist in the workspace.
    #[must_use]
    pub fn kinds_to_poll(&self) -> Vec<(TicketKind, String)> {
        TicketKind::all()
            .filter(|kind| !self.exclude.contains(kind))
            .map(|kind| (kind, self.approval_code(kind).to_string()))
            .collect()
    }

    /// Reverse lookup from an approval code (default or overridden).
    #[must_use]
    pub fn kind_for_code(&self, code: &str) -> Option<TicketKind> {
        TicketKind::all().find(|kind| {
            kind.approval_code() == code || self.overrides.get(kind).is_some_and(|c| c == code)
        })
    }
}

fn parse_kind(key: &str) -> Result<TicketKind, RulesError> {
    key.parse::<TicketKind>()
        .ok()
        .or_else(|| TicketKind::from_display_name(key))
        .ok_or_else(|| RulesError::UnknownType(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_enabled: true
operators: ["7131112233"]
rules:
  purchase: { auto_approve: true }
  用印申请: { auto_approve: true, ai_review: true, pass_comment: "印章核查通过" }
exclude: [outbound-report]
code_override:
  purchase: "AAAA-BBBB"
"#;

    #[test]
    fn parses_slug_and_display_name_keys() {
        let set = RuleSet::parse(SAMPLE).unwrap();
        assert!(set.rule(TicketKind::Purchase).auto_approve);
        let seal = set.rule(TicketKind::SealUse);
        assert!(seal.ai_review);
        assert_eq!(seal.pass_comment.as_deref(), Some("印章核查通过"));
    }

    #[test]
    fn one_kind_named_twice_is_rejected() {
        let err = RuleSet::parse(
            "rules:\n  seal-use: { auto_approve: true }\n  用印申请: { auto_approve: false }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_kind_key_fails_closed() {
        let err = RuleSet::parse("rules:\n  onboarding: { auto_approve: true }\n").unwrap_err();
        assert!(err.to_string().contains("onboarding"));
    }

    #[test]
    fn malformed_yaml_fails_closed() {
        assert!(RuleSet::parse("rules: [not a map").is_err());
    }

    #[test]
    fn unlisted_kind_gets_safe_default() {
        let set = RuleSet::parse(SAMPLE).unwrap();
        let rule = set.rule(TicketKind::ReceptionSupplies);
        assert_eq!(rule, ApprovalRule::default());
        assert!(!rule.auto_approve);
    }

    #[test]
    fn excluded_kind_is_never_polled_nor_approved() {
        let set = RuleSet::parse(
            "rules:\n  outbound-report: { auto_approve: true }\nexclude: [outbound-report]\n",
        )
        .unwrap();
        assert!(!set.rule(TicketKind::OutboundReport).auto_approve);
        assert!(
            !set
                .kinds_to_poll()
                .iter()
                .any(|(kind, _)| *kind == TicketKind::OutboundReport)
        );
    }

    #[test]
    fn code_override_applies_both_ways() {
        let set = RuleSet::parse(SAMPLE).unwrap();
        assert_eq!(set.approval_code(TicketKind::Purchase), "AAAA-BBBB");
        assert_eq!(set.kind_for_code("AAAA-BBBB"), Some(TicketKind::Purchase));
        assert_eq!(
            set.kind_for_code(TicketKind::Purchase.approval_code()),
            Some(TicketKind::Purchase)
        );
    }

    #[test]
    fn empty_file_yields_empty_allowlist() {
        let set = RuleSet::parse("{}").unwrap();
        assert!(set.operators.is_empty());
        assert!(!set.default_enabled);
        assert_eq!(set.commands.enable[0], "开启自动审批");
    }

    #[test]
    fn entry_defaults_enable_auto_approve() {
        let set = RuleSet::parse("rules:\n  invoice: {}\n").unwrap();
        let rule = set.rule(TicketKind::Invoice);
        assert!(rule.auto_approve);
        assert!(!rule.ai_review);
        assert!(rule.pass_comment.is_none());
    }
}
