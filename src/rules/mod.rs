//! Approval rules: YAML schema, parsed rule set and the live store.

mod file;
mod store;

pub use file::{ApprovalRule, CommandWords, RuleSet};
pub use store::{RuleStore, SwitchCommand, ToggleOutcome};
