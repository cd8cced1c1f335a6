//! Per-conversation state.
//!
//! A [`Session`] is pure data: the rolling chat history handed to the
//! classifier, fields recovered from uploaded documents, and the current
//! [`ConvState`]. Transitions are driven entirely by classifier output and
//! message text, so the whole machine is testable without a network.

use serde_json::Value;

use crate::llm::ChatTurn;
use crate::tickets::{FieldMap, TicketKind};

/// Turns of history kept per conversation. Older turns fall off the front.
const HISTORY_CAP: usize = 10;

/// Where a conversation stands.
///
/// `Confirming` holds a fully collected ticket awaiting the sender's go-ahead.
/// Submitted and aborted are terminal outcomes, not states: both collapse to
/// a fresh `Collecting` the moment they happen, so a sender can start the
/// next ticket in the same conversation without any reset command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvState {
    Collecting,
    Confirming { kind: TicketKind, fields: FieldMap },
}

impl Default for ConvState {
    fn default() -> Self {
        Self::Collecting
    }
}

/// How a reply reads while a ticket sits in the confirming phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmReading {
    Affirm,
    Cancel,
    /// Neither; the message goes back through classification as a revision.
    Other,
}

const CANCEL_WORDS: &[&str] = &["取消", "不用了", "算了", "不提交"];
const AFFIRM_WORDS: &[&str] = &[
    "确认", "提交", "确认提交", "好的", "好", "是", "嗯", "对", "可以", "ok", "OK",
];

/// Reads a confirming-phase message. Cancel wins over affirm ("好的，取消吧"
/// is a cancellation); affirmations must be the whole message so that a
/// revision like "是不是还要发票" falls through to re-classification.
pub fn read_confirmation(text: &str) -> ConfirmReading {
    let trimmed = text
        .trim()
        .trim_end_matches(['。', '！', '!', '.', '~', '，', ',']);
    if CANCEL_WORDS.iter().any(|word| trimmed.contains(word)) {
        return ConfirmReading::Cancel;
    }
    if AFFIRM_WORDS.iter().any(|word| trimmed == *word) {
        return ConfirmReading::Affirm;
    }
    ConfirmReading::Other
}

/// Lays classifier output over attachment-derived values. An explicit
/// statement in the conversation beats a document scan; empty strings and
/// nulls from the model never clobber a real value.
pub fn overlay_fields(base: &FieldMap, over: &FieldMap) -> FieldMap {
    let mut merged = base.clone();
    for (key, value) in over {
        match value {
            Value::Null => {}
            Value::String(s) if s.trim().is_empty() => {}
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Drops from `missing` every field the merged map already satisfies. The
/// model lists document-derived fields as missing when it has only seen the
/// text side of the conversation.
pub fn unresolved_missing(missing: &[String], merged: &FieldMap) -> Vec<String> {
    missing
        .iter()
        .filter(|name| !merged.contains_key(name.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct Session {
    state: ConvState,
    history: Vec<ChatTurn>,
    /// Values pulled out of uploaded attachments, keyed by logical field name.
    extracted: FieldMap,
    /// Last kind the classifier settled on; routes attachments before the
    /// ticket is complete.
    kind_hint: Option<TicketKind>,
}

impl Session {
    pub fn state(&self) -> &ConvState {
        &self.state
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.history.push(ChatTurn::user(text));
        self.cap_history();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.history.push(ChatTurn::assistant(text));
        self.cap_history();
    }

    fn cap_history(&mut self) {
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }

    /// Records the kind the classifier settled on. Changing kinds drops any
    /// attachment-derived fields; they belonged to the abandoned ticket.
    pub fn note_kind(&mut self, kind: TicketKind) {
        if self.kind_hint.is_some_and(|prev| prev != kind) {
            self.extracted.clear();
        }
        self.kind_hint = Some(kind);
    }

    pub fn kind_hint(&self) -> Option<TicketKind> {
        self.kind_hint
    }

    pub fn extracted(&self) -> &FieldMap {
        &self.extracted
    }

    /// Records attachment-derived fields. A newer upload overwrites an older
    /// one for the same field.
    pub fn merge_extracted(&mut self, fields: FieldMap) {
        for (key, value) in fields {
            self.extracted.insert(key, value);
        }
    }

    pub fn begin_confirming(&mut self, kind: TicketKind, fields: FieldMap) {
        self.state = ConvState::Confirming { kind, fields };
    }

    /// Takes the pending ticket out of the confirming phase, leaving the
    /// session collecting again.
    pub fn take_confirming(&mut self) -> Option<(TicketKind, FieldMap)> {
        match std::mem::take(&mut self.state) {
            ConvState::Confirming { kind, fields } => Some((kind, fields)),
            ConvState::Collecting => None,
        }
    }

    /// Fresh start: clears history, extracted fields and state. Runs after a
    /// successful submission and after a cancellation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
