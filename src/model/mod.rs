//! Runtime-described record model.
//!
//! Records arrive with a field layout only known at runtime. A
//! [`MessageType`] describes that layout as an ordered list of
//! [`FieldDef`]s, each tagged with a [`FieldKind`]:
//! - `Scalar` / `ScalarArray` for leaf values
//! - `Message` / `MessageArray` for nested sub-records, referring to the
//!   nested type's own descriptor
//!
//! A [`Record`] pairs a type with values aligned to its fields.

mod timestamp;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use timestamp::Timestamp;

/// Separator line between nested type sections of a definition text.
const DEFINITION_RULE: &str =
    "================================================================================";

/// Number of hex characters kept from the definition digest.
const HASH_LEN: usize = 32;

/// Errors raised while assembling a record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Type {type_name} has {expected} fields, got {actual} values")]
    FieldCount {
        type_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Value for field {type_name}.{field} does not match declared kind {kind}")]
    KindMismatch {
        type_name: String,
        field: String,
        kind: String,
    },
}

/// Identity of a record type: name plus definition hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey {
    pub name: String,
    pub hash: String,
}

impl TypeKey {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.hash)
    }
}

/// Leaf value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Bytes,
    /// Point in time as signed nanoseconds.
    Time,
    /// Span of time as signed nanoseconds.
    Duration,
}

impl ScalarKind {
    /// Name used in definition texts.
    pub fn type_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "int8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt8 => "uint8",
            ScalarKind::UInt16 => "uint16",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Time => "time",
            ScalarKind::Duration => "duration",
        }
    }

    /// Whether a value can be stored in a field of this kind.
    pub fn accepts(self, value: &Scalar) -> bool {
        match (self, value) {
            (ScalarKind::Bool, Scalar::Bool(_)) => true,
            (
                ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::Time
                | ScalarKind::Duration,
                Scalar::Int(_),
            ) => true,
            (
                ScalarKind::UInt8 | ScalarKind::UInt16 | ScalarKind::UInt32 | ScalarKind::UInt64,
                Scalar::UInt(_),
            ) => true,
            (ScalarKind::Float32 | ScalarKind::Float64, Scalar::Float(_)) => true,
            (ScalarKind::String, Scalar::Text(_)) => true,
            (ScalarKind::Bytes, Scalar::Bytes(_)) => true,
            _ => false,
        }
    }
}

/// A single leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Int(n) => serde_json::Value::from(*n),
            Scalar::UInt(n) => serde_json::Value::from(*n),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
            Scalar::Bytes(b) => serde_json::Value::Array(b.iter().map(|x| (*x).into()).collect()),
        }
    }
}

macro_rules! scalar_from {
    ($variant:ident, $target:ty, [$($source:ty),*]) => {
        $(
            impl From<$source> for Scalar {
                fn from(value: $source) -> Self {
                    Scalar::$variant(<$target>::from(value))
                }
            }
        )*
    };
}

scalar_from!(Bool, bool, [bool]);
scalar_from!(Int, i64, [i8, i16, i32, i64]);
scalar_from!(UInt, u64, [u8, u16, u32, u64]);
scalar_from!(Float, f64, [f32, f64]);
scalar_from!(Text, String, [&str, String]);
scalar_from!(Bytes, Vec<u8>, [Vec<u8>]);

/// Field-tree node kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    ScalarArray(ScalarKind),
    Message(Arc<MessageType>),
    MessageArray(Arc<MessageType>),
}

impl FieldKind {
    /// Type name as written in definition texts, `[]`-suffixed for arrays.
    pub fn type_name(&self) -> String {
        match self {
            FieldKind::Scalar(kind) => kind.type_name().to_string(),
            FieldKind::ScalarArray(kind) => format!("{}[]", kind.type_name()),
            FieldKind::Message(t) => t.name().to_string(),
            FieldKind::MessageArray(t) => format!("{}[]", t.name()),
        }
    }

    /// Nested message type, if this is a message or message array field.
    pub fn message_type(&self) -> Option<&Arc<MessageType>> {
        match self {
            FieldKind::Message(t) | FieldKind::MessageArray(t) => Some(t),
            _ => None,
        }
    }
}

/// Named field of a message type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name, FieldKind::Scalar(kind))
    }

    pub fn array(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name, FieldKind::ScalarArray(kind))
    }

    pub fn message(name: impl Into<String>, msg_type: Arc<MessageType>) -> Self {
        Self::new(name, FieldKind::Message(msg_type))
    }

    pub fn messages(name: impl Into<String>, msg_type: Arc<MessageType>) -> Self {
        Self::new(name, FieldKind::MessageArray(msg_type))
    }
}

/// Runtime description of a record type.
#[derive(Debug, PartialEq)]
pub struct MessageType {
    name: String,
    hash: String,
    definition: String,
    fields: Vec<FieldDef>,
}

impl MessageType {
    /// Create a type, deriving definition text and hash from its fields.
    ///
    /// The hash covers the flattened definition including every nested
    /// type's definition, so identical layouts hash identically across runs.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let definition = render_definition(&fields);
        let hash = definition_hash(&definition);
        Self {
            name: name.into(),
            hash,
            definition,
            fields,
        }
    }

    /// Create a type with externally supplied hash and definition text.
    pub fn with_definition(
        name: impl Into<String>,
        hash: impl Into<String>,
        definition: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            definition: definition.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn key(&self) -> TypeKey {
        TypeKey::new(&self.name, &self.hash)
    }
}

/// Render the full definition text: own fields, then each nested type once.
fn render_definition(fields: &[FieldDef]) -> String {
    let mut text = field_lines(fields);
    let mut seen = HashSet::new();
    let mut stack: Vec<&Arc<MessageType>> = fields
        .iter()
        .rev()
        .filter_map(|f| f.kind.message_type())
        .collect();

    while let Some(nested) = stack.pop() {
        if !seen.insert(nested.name().to_string()) {
            continue;
        }
        text.push_str(&format!(
            "\n{}\nMSG: {}\n{}",
            DEFINITION_RULE,
            nested.name(),
            field_lines(nested.fields())
        ));
        stack.extend(
            nested
                .fields()
                .iter()
                .rev()
                .filter_map(|f| f.kind.message_type()),
        );
    }
    text
}

fn field_lines(fields: &[FieldDef]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.kind.type_name(), f.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn definition_hash(definition: &str) -> String {
    let digest = Sha256::digest(definition.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}

/// Value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    ScalarArray(Vec<Scalar>),
    Message(Record),
    MessageArray(Vec<Record>),
}

impl Value {
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Value::Scalar(value.into())
    }

    pub fn array<T: Into<Scalar>>(values: impl IntoIterator<Item = T>) -> Self {
        Value::ScalarArray(values.into_iter().map(Into::into).collect())
    }

    pub fn message(record: Record) -> Self {
        Value::Message(record)
    }

    pub fn messages(records: Vec<Record>) -> Self {
        Value::MessageArray(records)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(s) => s.to_json(),
            Value::ScalarArray(items) => {
                serde_json::Value::Array(items.iter().map(Scalar::to_json).collect())
            }
            Value::Message(r) => r.to_json(),
            Value::MessageArray(items) => {
                serde_json::Value::Array(items.iter().map(Record::to_json).collect())
            }
        }
    }

    fn matches(&self, kind: &FieldKind) -> bool {
        match (kind, self) {
            (FieldKind::Scalar(k), Value::Scalar(s)) => k.accepts(s),
            (FieldKind::ScalarArray(k), Value::ScalarArray(items)) => {
                items.iter().all(|s| k.accepts(s))
            }
            (FieldKind::Message(t), Value::Message(r)) => r.msg_type().key() == t.key(),
            (FieldKind::MessageArray(t), Value::MessageArray(items)) => {
                items.iter().all(|r| r.msg_type().key() == t.key())
            }
            _ => false,
        }
    }
}

/// A typed record instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    msg_type: Arc<MessageType>,
    values: Vec<Value>,
    raw: Vec<u8>,
}

impl Record {
    /// Create a record, validating values against the type's fields.
    pub fn new(msg_type: Arc<MessageType>, values: Vec<Value>) -> Result<Self, RecordError> {
        if values.len() != msg_type.fields().len() {
            return Err(RecordError::FieldCount {
                type_name: msg_type.name().to_string(),
                expected: msg_type.fields().len(),
                actual: values.len(),
            });
        }
        for (field, value) in msg_type.fields().iter().zip(&values) {
            if !value.matches(&field.kind) {
                return Err(RecordError::KindMismatch {
                    type_name: msg_type.name().to_string(),
                    field: field.name.clone(),
                    kind: field.kind.type_name(),
                });
            }
        }
        Ok(Self {
            msg_type,
            values,
            raw: Vec::new(),
        })
    }

    /// Attach the raw serialized payload the record was decoded from.
    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = raw;
        self
    }

    pub fn msg_type(&self) -> &Arc<MessageType> {
        &self.msg_type
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Fields paired with their values, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDef, &Value)> {
        self.msg_type.fields().iter().zip(&self.values)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields().find(|(f, _)| f.name == name).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields()
            .map(|(f, v)| (f.name.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Rendered text form stored in the flat message log.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.to_json())
    }
}
