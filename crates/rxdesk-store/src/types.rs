//! Domain types stored in the backend.
//!
//! These types represent the persisted state of conversations and products,
//! plus the partial-field patch shape shared by change events and writes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rxdesk_core::{AgentId, ConversationId, ProductId};
use serde::{Deserialize, Deserializer, Serialize};

/// A customer conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Backend-assigned identifier.
    pub id: ConversationId,
    /// Customer display name.
    pub customer_name: String,
    /// Customer phone number, as entered.
    pub customer_phone: String,
    /// Text of the latest message.
    pub last_message: String,
    /// Timestamp of the latest message; drives board ordering.
    pub last_message_time: DateTime<Utc>,
    /// Workflow column.
    pub status: ConversationStatus,
    /// Routing classification, fixed at creation.
    #[serde(rename = "type")]
    pub kind: ConversationType,
    /// Agent currently owning the conversation.
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    /// Arrived through a live insert and not yet acknowledged by the view.
    ///
    /// Local only: never serialized, always `false` when decoded.
    #[serde(skip)]
    pub is_new: bool,
}

/// Workflow status of a conversation, one per board column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Handled by the automated assistant, no agent involved yet.
    Ongoing,
    /// Claimed by an agent, waiting on human attention.
    Waiting,
    /// Closed.
    Completed,
}

impl ConversationStatus {
    /// All statuses in board column order.
    pub const ALL: [Self; 3] = [Self::Ongoing, Self::Waiting, Self::Completed];

    /// The wire name of the status (also the board column id).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ongoing" => Ok(Self::Ongoing),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            other => Err(UnknownVariant {
                kind: "conversation status",
                value: other.to_string(),
            }),
        }
    }
}

/// Which desk a conversation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    /// Sales questions.
    Vendor,
    /// Clinical questions.
    Pharmacist,
}

impl ConversationType {
    /// The wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::Pharmacist => "pharmacist",
        }
    }
}

/// A string did not name any variant of an enumerated column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    /// The column being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// One mutable column of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchField {
    /// `customer_name`
    CustomerName,
    /// `customer_phone`
    CustomerPhone,
    /// `last_message`
    LastMessage,
    /// `last_message_time`
    LastMessageTime,
    /// `status`
    Status,
    /// `assigned_to`
    AssignedTo,
}

impl PatchField {
    /// Every patchable field.
    pub const ALL: [Self; 6] = [
        Self::CustomerName,
        Self::CustomerPhone,
        Self::LastMessage,
        Self::LastMessageTime,
        Self::Status,
        Self::AssignedTo,
    ];
}

/// A partial update of a conversation.
///
/// Used for remote `Updated` events, outbound writes, and for the field-level
/// snapshots the reconciliation engine keeps while a write is in flight.
/// `id`, `type` and `is_new` cannot be expressed, so a patch can never change
/// the routing class or leak the local `is_new` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPatch {
    /// New customer name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// New customer phone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    /// New latest message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// New latest message time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// New workflow status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    /// New assignee; `Some(None)` clears the assignment.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub assigned_to: Option<Option<AgentId>>,
}

/// Distinguishes an explicit `null` from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ConversationPatch {
    /// A patch that only sets the status.
    #[must_use]
    pub fn status(status: ConversationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A patch that only sets the assignee.
    #[must_use]
    pub fn assigned_to(agent: Option<AgentId>) -> Self {
        Self {
            assigned_to: Some(agent),
            ..Self::default()
        }
    }

    /// Add an assignee to this patch.
    #[must_use]
    pub fn with_assigned_to(mut self, agent: Option<AgentId>) -> Self {
        self.assigned_to = Some(agent);
        self
    }

    /// A patch carrying every mutable field of `record`.
    #[must_use]
    pub fn from_record(record: &Conversation) -> Self {
        Self::capture(record, PatchField::ALL)
    }

    /// Snapshot the current values of `fields` from `record`.
    #[must_use]
    pub fn capture(record: &Conversation, fields: impl IntoIterator<Item = PatchField>) -> Self {
        let mut patch = Self::default();
        for field in fields {
            match field {
                PatchField::CustomerName => {
                    patch.customer_name = Some(record.customer_name.clone());
                }
                PatchField::CustomerPhone => {
                    patch.customer_phone = Some(record.customer_phone.clone());
                }
                PatchField::LastMessage => patch.last_message = Some(record.last_message.clone()),
                PatchField::LastMessageTime => {
                    patch.last_message_time = Some(record.last_message_time);
                }
                PatchField::Status => patch.status = Some(record.status),
                PatchField::AssignedTo => patch.assigned_to = Some(record.assigned_to.clone()),
            }
        }
        patch
    }

    /// Returns true if the patch sets no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Returns true if the patch sets `field`.
    #[must_use]
    pub const fn touches(&self, field: PatchField) -> bool {
        match field {
            PatchField::CustomerName => self.customer_name.is_some(),
            PatchField::CustomerPhone => self.customer_phone.is_some(),
            PatchField::LastMessage => self.last_message.is_some(),
            PatchField::LastMessageTime => self.last_message_time.is_some(),
            PatchField::Status => self.status.is_some(),
            PatchField::AssignedTo => self.assigned_to.is_some(),
        }
    }

    /// The fields this patch sets.
    #[must_use]
    pub fn fields(&self) -> Vec<PatchField> {
        PatchField::ALL
            .into_iter()
            .filter(|field| self.touches(*field))
            .collect()
    }

    /// Copy `field` from `source` into this patch (unsetting it if `source`
    /// does not set it).
    pub fn copy_field(&mut self, source: &Self, field: PatchField) {
        match field {
            PatchField::CustomerName => self.customer_name.clone_from(&source.customer_name),
            PatchField::CustomerPhone => self.customer_phone.clone_from(&source.customer_phone),
            PatchField::LastMessage => self.last_message.clone_from(&source.last_message),
            PatchField::LastMessageTime => self.last_message_time = source.last_message_time,
            PatchField::Status => self.status = source.status,
            PatchField::AssignedTo => self.assigned_to.clone_from(&source.assigned_to),
        }
    }

    /// Write the set fields into `record`. Returns true if anything changed.
    pub fn apply_to(&self, record: &mut Conversation) -> bool {
        let before = record.clone();
        if let Some(name) = &self.customer_name {
            record.customer_name.clone_from(name);
        }
        if let Some(phone) = &self.customer_phone {
            record.customer_phone.clone_from(phone);
        }
        if let Some(message) = &self.last_message {
            record.last_message.clone_from(message);
        }
        if let Some(time) = self.last_message_time {
            record.last_message_time = time;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(agent) = &self.assigned_to {
            record.assigned_to.clone_from(agent);
        }
        *record != before
    }
}

/// An inventory product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Backend-assigned identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Free-form description, searchable.
    #[serde(default)]
    pub description: String,
    /// Unit price.
    pub price: f64,
    /// Units on hand; never negative.
    pub stock_quantity: u32,
    /// At or below this quantity the product counts as low on stock.
    pub low_stock_threshold: u32,
    /// Category label.
    pub category: String,
    /// Dispensed only against a prescription.
    #[serde(default)]
    pub requires_prescription: bool,
    /// Optional product picture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Product {
    /// Returns true if stock is at or below the low-stock threshold.
    #[must_use]
    pub const fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.low_stock_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Conversation {
        Conversation {
            id: ConversationId::new("1").unwrap(),
            customer_name: "Ana".to_string(),
            customer_phone: "+55 11 9999-0000".to_string(),
            last_message: "Do you have dipyrone?".to_string(),
            last_message_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            status: ConversationStatus::Ongoing,
            kind: ConversationType::Pharmacist,
            assigned_to: None,
            is_new: true,
        }
    }

    #[test]
    fn is_new_never_serialized() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("is_new").is_none());
        assert_eq!(json["type"], "pharmacist");
        assert_eq!(json["status"], "ongoing");
    }

    #[test]
    fn decoded_rows_are_not_new() {
        let json = serde_json::json!({
            "id": "9",
            "customer_name": "Bia",
            "customer_phone": "1",
            "last_message": "hi",
            "last_message_time": "2024-05-01T10:00:00Z",
            "status": "waiting",
            "type": "vendor",
            "assigned_to": "agent-1",
            "is_new": true
        });
        let record: Conversation = serde_json::from_value(json).unwrap();
        assert!(!record.is_new);
        assert_eq!(record.assigned_to, Some(AgentId::new("agent-1").unwrap()));
    }

    #[test]
    fn unknown_status_rejected() {
        assert!("archived".parse::<ConversationStatus>().is_err());
        assert_eq!(
            "waiting".parse::<ConversationStatus>().unwrap(),
            ConversationStatus::Waiting
        );
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let agent = AgentId::new("A").unwrap();
        let patch =
            ConversationPatch::status(ConversationStatus::Waiting).with_assigned_to(Some(agent));
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "waiting", "assigned_to": "A"})
        );
    }

    #[test]
    fn patch_distinguishes_null_from_missing() {
        let cleared: ConversationPatch =
            serde_json::from_str(r#"{"assigned_to": null}"#).unwrap();
        assert_eq!(cleared.assigned_to, Some(None));

        let untouched: ConversationPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(untouched.assigned_to, None);
        assert!(untouched.is_empty());
    }

    #[test]
    fn capture_and_apply() {
        let mut record = sample();
        let baseline = ConversationPatch::capture(&record, [PatchField::Status]);
        assert_eq!(baseline.fields(), vec![PatchField::Status]);

        let changed = ConversationPatch::status(ConversationStatus::Completed).apply_to(&mut record);
        assert!(changed);
        assert_eq!(record.status, ConversationStatus::Completed);

        assert!(baseline.apply_to(&mut record));
        assert_eq!(record.status, ConversationStatus::Ongoing);
        assert!(!baseline.apply_to(&mut record));
    }

    #[test]
    fn copy_fields() {
        let source = ConversationPatch::status(ConversationStatus::Waiting);
        let mut patch = ConversationPatch::assigned_to(None);
        patch.copy_field(&source, PatchField::Status);
        assert_eq!(patch.status, Some(ConversationStatus::Waiting));

        patch.copy_field(&source, PatchField::AssignedTo);
        assert_eq!(patch.fields(), vec![PatchField::Status]);
    }

    #[test]
    fn low_stock() {
        let product = Product {
            id: ProductId::new("p1").unwrap(),
            name: "Dipyrone 500mg".to_string(),
            description: String::new(),
            price: 9.9,
            stock_quantity: 5,
            low_stock_threshold: 5,
            category: "analgesic".to_string(),
            requires_prescription: false,
            image_url: None,
        };
        assert!(product.is_low_stock());
    }
}
