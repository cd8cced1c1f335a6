//! Ticket-type registry.
//!
//! The set of administrative ticket kinds is closed. Each kind carries its
//! platform approval definition code, its form field declarations and the
//! administrative comment attached on submission. Adding a kind means adding
//! an enum variant plus a module with its tables; every `match` below is
//! exhaustive, so the compiler points at each site that needs the new case.

mod invoice;
mod outbound;
mod purchase;
mod reception;
mod seal;

pub use invoice::AUTO_FIELDS;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;

/// Logical field name -> extracted value, as produced by intent
/// classification and form reverse-parsing. Values stay JSON so list
/// fields keep their row structure.
pub type FieldMap = serde_json::Map<String, Value>;

/// Declaration of one form field on a ticket kind.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Logical name used in classification output and field maps.
    pub name: &'static str,
    /// Chinese label as it appears on the platform form.
    pub label: &'static str,
    /// Alternative form labels mapping to the same logical field.
    pub aliases: &'static [&'static str],
    /// Known widget id, used when label matching fails.
    pub fallback_id: Option<&'static str>,
    /// Value is a calendar date (`YYYY-MM-DD`).
    pub date: bool,
    /// Sub-field structure for `fieldList` widgets, used when the fetched
    /// definition does not expose one.
    pub sub_fields: &'static [SubFieldSpec],
}

/// One column of a `fieldList` widget.
#[derive(Debug, Clone, Copy)]
pub struct SubFieldSpec {
    pub id: &'static str,
    pub widget: &'static str,
    pub label: &'static str,
}

impl FieldSpec {
    const fn text(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            aliases: &[],
            fallback_id: None,
            date: false,
            sub_fields: &[],
        }
    }

    const fn date(name: &'static str, label: &'static str) -> Self {
        let mut spec = Self::text(name, label);
        spec.date = true;
        spec
    }

    const fn fallback(mut self, id: &'static str) -> Self {
        self.fallback_id = Some(id);
        self
    }

    const fn aliased(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    const fn rows(mut self, sub_fields: &'static [SubFieldSpec]) -> Self {
        self.sub_fields = sub_fields;
        self
    }

    /// True when `label` is the declared label or one of its aliases.
    #[must_use]
    pub fn matches_label(&self, label: &str) -> bool {
        self.label == label || self.aliases.contains(&label)
    }
}

/// The closed set of ticket kinds this assistant handles.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TicketKind {
    SealUse,
    Purchase,
    Invoice,
    ReceptionSupplies,
    OutboundReport,
}

impl TicketKind {
    /// All registered kinds, in menu order.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Platform-facing Chinese name, as shown in chat and on forms.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::SealUse => seal::DISPLAY_NAME,
            Self::Purchase => purchase::DISPLAY_NAME,
            Self::Invoice => invoice::DISPLAY_NAME,
            Self::ReceptionSupplies => reception::DISPLAY_NAME,
            Self::OutboundReport => outbound::DISPLAY_NAME,
        }
    }

    /// Default approval definition code. Deployments carrying different
    /// definitions override this through the rules file.
    #[must_use]
    pub fn approval_code(self) -> &'static str {
        match self {
            Self::SealUse => seal::APPROVAL_CODE,
            Self::Purchase => purchase::APPROVAL_CODE,
            Self::Invoice => invoice::APPROVAL_CODE,
            Self::ReceptionSupplies => reception::APPROVAL_CODE,
            Self::OutboundReport => outbound::APPROVAL_CODE,
        }
    }

    /// Field declarations in form display order.
    #[must_use]
    pub fn field_specs(self) -> &'static [FieldSpec] {
        match self {
            Self::SealUse => seal::FIELDS,
            Self::Purchase => purchase::FIELDS,
            Self::Invoice => invoice::FIELDS,
            Self::ReceptionSupplies => reception::FIELDS,
            Self::OutboundReport => outbound::FIELDS,
        }
    }

    /// Extraction hints handed to the classifier prompt.
    #[must_use]
    pub fn field_hints(self) -> &'static str {
        match self {
            Self::SealUse => seal::FIELD_HINTS,
            Self::Purchase => purchase::FIELD_HINTS,
            Self::Invoice => invoice::FIELD_HINTS,
            Self::ReceptionSupplies => reception::FIELD_HINTS,
            Self::OutboundReport => outbound::FIELD_HINTS,
        }
    }

    /// Administrative comment attached when a ticket of this kind is
    /// submitted through chat.
    #[must_use]
    pub fn admin_comment(self, fields: &FieldMap) -> String {
        match self {
            Self::SealUse => seal::admin_comment(fields),
            Self::Purchase => purchase::admin_comment(fields),
            Self::Invoice => invoice::admin_comment(fields),
            Self::ReceptionSupplies => reception::admin_comment(fields),
            Self::OutboundReport => outbound::admin_comment(fields),
        }
    }

    /// Kinds whose attachments feed field extraction during chat.
    #[must_use]
    pub fn supports_extraction(self) -> bool {
        matches!(self, Self::Invoice)
    }

    /// Look a kind up by its platform-facing Chinese name.
    #[must_use]
    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.display_name() == name)
    }

    /// Field declaration for a logical name.
    #[must_use]
    pub fn field(self, logical: &str) -> Option<&'static FieldSpec> {
        self.field_specs().iter().find(|spec| spec.name == logical)
    }

    /// Reverse lookup: form label (or alias) -> logical name.
    #[must_use]
    pub fn logical_for_label(self, label: &str) -> Option<&'static str> {
        self.field_specs()
            .iter()
            .find(|spec| spec.matches_label(label))
            .map(|spec| spec.name)
    }

    /// Reverse lookup: known widget id -> logical name.
    #[must_use]
    pub fn logical_for_widget(self, widget_id: &str) -> Option<&'static str> {
        self.field_specs()
            .iter()
            .find(|spec| spec.fallback_id == Some(widget_id))
            .map(|spec| spec.name)
    }

    /// Chinese label for a logical field, when declared.
    #[must_use]
    pub fn label_for(self, logical: &str) -> Option<&'static str> {
        self.field(logical).map(|spec| spec.label)
    }
}
