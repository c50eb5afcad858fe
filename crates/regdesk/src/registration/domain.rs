use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

identifier!(
    /// Identifier of an event owning forms, attributes and participants.
    EventId
);
identifier!(
    /// Identifier of a registration form.
    FormId
);
identifier!(
    /// Identifier of an organizer-defined attribute.
    AttributeId
);
identifier!(
    /// Identifier of a node in a block tree.
    BlockId
);
identifier!(
    /// Identifier of a registered participant.
    ParticipantId
);

impl BlockId {
    /// Occupancy records store block admissions as the decimal id.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().map(Self)
    }

    pub fn as_value(self) -> String {
        self.0.to_string()
    }
}

/// Opaque token handed to a participant so later forms can find their record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantToken(pub String);

impl ParticipantToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for ParticipantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared type of an attribute as configured by the organizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeType {
    Text,
    LongText,
    Number,
    File,
    SingleSelect,
    MultiSelect,
    Block,
    Date,
    Time,
    Datetime,
    Email,
    Phone,
    Color,
    Checkbox,
}

impl AttributeType {
    pub const fn label(self) -> &'static str {
        match self {
            AttributeType::Text => "text",
            AttributeType::LongText => "long-text",
            AttributeType::Number => "number",
            AttributeType::File => "file",
            AttributeType::SingleSelect => "single-select",
            AttributeType::MultiSelect => "multi-select",
            AttributeType::Block => "block",
            AttributeType::Date => "date",
            AttributeType::Time => "time",
            AttributeType::Datetime => "datetime",
            AttributeType::Email => "email",
            AttributeType::Phone => "phone",
            AttributeType::Color => "color",
            AttributeType::Checkbox => "checkbox",
        }
    }

    pub const fn is_block(self) -> bool {
        matches!(self, AttributeType::Block)
    }
}

/// Organizer-defined form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub event_id: EventId,
    pub name: String,
    pub slug: String,
    pub attribute_type: AttributeType,
    pub options: Vec<String>,
    pub order: Option<i32>,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDraft {
    pub name: String,
    pub slug: String,
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
}

fn visible_by_default() -> bool {
    true
}

impl AttributeDraft {
    pub fn new(name: impl Into<String>, slug: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            attribute_type,
            options: Vec::new(),
            order: None,
            visible: true,
        }
    }

    pub fn with_options<I, T>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// A capacity-bounded node in the resource tree owned by a block attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub attribute_id: AttributeId,
    pub parent_id: Option<BlockId>,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    pub order: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Block {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Effective seat limit; unset and zero both mean unlimited.
    pub fn limit(&self) -> Option<u32> {
        self.capacity.filter(|capacity| *capacity > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDraft {
    pub attribute_id: AttributeId,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    pub order: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

impl BlockDraft {
    pub fn new(attribute_id: AttributeId, name: impl Into<String>) -> Self {
        Self {
            attribute_id,
            name: name.into(),
            description: None,
            capacity: None,
            order: None,
            created_at: None,
        }
    }

    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Administrative edit of a block; `None` leaves the field untouched and a zero
/// capacity resets the block to unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub order: Option<i32>,
}

/// Which submission outcome fires a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    FormSubmitted,
    BlockAdmitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    FormSubmitted {
        form_id: FormId,
    },
    /// `block_id: None` matches admission to any block of the attribute.
    BlockAdmitted {
        attribute_id: AttributeId,
        block_id: Option<BlockId>,
    },
}

impl TriggerCondition {
    pub const fn kind(&self) -> TriggerKind {
        match self {
            TriggerCondition::FormSubmitted { .. } => TriggerKind::FormSubmitted,
            TriggerCondition::BlockAdmitted { .. } => TriggerKind::BlockAdmitted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTrigger {
    pub template: String,
    pub condition: TriggerCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    /// Attributes whose values, space-joined, label an occupant in the tree view.
    pub label_attributes: Vec<AttributeId>,
    pub triggers: Vec<NotificationTrigger>,
}

/// Per-form override of an attribute's behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub attribute_id: AttributeId,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "editable_by_default")]
    pub editable: bool,
    #[serde(default)]
    pub order: Option<i32>,
}

fn editable_by_default() -> bool {
    true
}

impl FormField {
    pub fn required(attribute_id: AttributeId) -> Self {
        Self {
            attribute_id,
            required: true,
            editable: true,
            order: None,
        }
    }

    pub fn optional(attribute_id: AttributeId) -> Self {
        Self {
            required: false,
            ..Self::required(attribute_id)
        }
    }

    pub fn locked(mut self) -> Self {
        self.editable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub event_id: EventId,
    pub name: String,
    pub is_first: bool,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDraft {
    pub name: String,
    #[serde(default)]
    pub is_first: bool,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub template: String,
    pub trigger: TriggerKind,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub event_id: EventId,
    pub email: String,
    pub token: ParticipantToken,
    pub created_at: DateTime<Utc>,
    /// Occupancy records keyed by attribute.
    pub values: BTreeMap<AttributeId, String>,
    pub notifications: Vec<NotificationRecord>,
}

impl Participant {
    pub fn value(&self, attribute_id: AttributeId) -> Option<&str> {
        self.values.get(&attribute_id).map(String::as_str)
    }
}

/// Raw upload as handed over by the validation layer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Already type-checked value for one submitted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Choices(Vec<String>),
    Upload(Upload),
}

impl RawValue {
    pub fn text(value: impl Into<String>) -> Self {
        RawValue::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Text(text) => text.trim().is_empty(),
            RawValue::Choices(choices) => choices.iter().all(|choice| choice.trim().is_empty()),
            RawValue::Upload(upload) => upload.data.is_empty(),
        }
    }
}

/// Form submission keyed by attribute id or slug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub fields: BTreeMap<String, RawValue>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: RawValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "block_id", rename_all = "snake_case")]
pub enum ResolvedKind {
    Plain,
    File,
    Block(BlockId),
}

/// Value ready to be written as an occupancy record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub attribute_id: AttributeId,
    pub value: String,
    pub kind: ResolvedKind,
}

impl ResolvedValue {
    pub fn admission(&self) -> Option<BlockId> {
        match self.kind {
            ResolvedKind::Block(block_id) => Some(block_id),
            ResolvedKind::Plain | ResolvedKind::File => None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
