//! Protobuf reflection adapter.
//!
//! Converts `prost_reflect` descriptors and dynamic messages into the
//! runtime record model, so any message from a `DescriptorPool` can be
//! written to a store without generated code.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use prost::Message;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage};

use crate::model::{FieldDef, FieldKind, MessageType, Record, RecordError, Scalar, ScalarKind, Value};

/// Errors that can occur while reflecting protobuf messages.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error("Recursive message type: {0}")]
    RecursiveType(String),

    #[error("Unexpected value for field {field}")]
    UnexpectedValue { field: String },

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

/// Record types derived from protobuf descriptors, cached by full name.
#[derive(Debug, Default)]
pub struct TypeCache {
    types: HashMap<String, Arc<MessageType>>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record type for a message descriptor.
    ///
    /// Map fields become arrays of their entry type. Message types that
    /// contain themselves, directly or transitively, are rejected.
    pub fn message_type(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Arc<MessageType>, ReflectError> {
        self.resolve(descriptor, &mut Vec::new())
    }

    fn resolve(
        &mut self,
        descriptor: &MessageDescriptor,
        stack: &mut Vec<String>,
    ) -> Result<Arc<MessageType>, ReflectError> {
        let name = descriptor.full_name();
        if let Some(cached) = self.types.get(name) {
            return Ok(cached.clone());
        }
        if stack.iter().any(|s| s == name) {
            return Err(ReflectError::RecursiveType(name.to_string()));
        }

        stack.push(name.to_string());
        let mut fields = Vec::new();
        for field in descriptor.fields() {
            let kind = match field.kind() {
                Kind::Message(nested) => {
                    let nested = self.resolve(&nested, stack)?;
                    if field.is_list() || field.is_map() {
                        FieldKind::MessageArray(nested)
                    } else {
                        FieldKind::Message(nested)
                    }
                }
                other if field.is_list() => FieldKind::ScalarArray(scalar_kind(&other)),
                other => FieldKind::Scalar(scalar_kind(&other)),
            };
            fields.push(FieldDef::new(field.name(), kind));
        }
        stack.pop();

        let msg_type = Arc::new(MessageType::new(name, fields));
        self.types.insert(name.to_string(), msg_type.clone());
        Ok(msg_type)
    }

    /// Record for a dynamic message, carrying its encoded bytes as raw payload.
    pub fn record(&mut self, message: &DynamicMessage) -> Result<Record, ReflectError> {
        let msg_type = self.message_type(&message.descriptor())?;
        Ok(build(&msg_type, message)?.with_raw(message.encode_to_vec()))
    }
}

fn scalar_kind(kind: &Kind) -> ScalarKind {
    match kind {
        Kind::Double => ScalarKind::Float64,
        Kind::Float => ScalarKind::Float32,
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => ScalarKind::Int64,
        Kind::Uint64 | Kind::Fixed64 => ScalarKind::UInt64,
        Kind::Uint32 | Kind::Fixed32 => ScalarKind::UInt32,
        Kind::Bool => ScalarKind::Bool,
        Kind::String => ScalarKind::String,
        Kind::Bytes => ScalarKind::Bytes,
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 | Kind::Enum(_) | Kind::Message(_) => {
            ScalarKind::Int32
        }
    }
}

fn build(msg_type: &Arc<MessageType>, message: &DynamicMessage) -> Result<Record, ReflectError> {
    let descriptor = message.descriptor();
    let mut values = Vec::with_capacity(msg_type.fields().len());
    for (def, field) in msg_type.fields().iter().zip(descriptor.fields()) {
        values.push(convert(def, &field, &message.get_field(&field))?);
    }
    Ok(Record::new(msg_type.clone(), values)?)
}

fn convert(
    def: &FieldDef,
    field: &FieldDescriptor,
    value: &prost_reflect::Value,
) -> Result<Value, ReflectError> {
    use prost_reflect::Value as V;

    let unexpected = || ReflectError::UnexpectedValue {
        field: field.full_name().to_string(),
    };

    match (&def.kind, value) {
        (FieldKind::Scalar(_), v) => Ok(Value::Scalar(scalar(v).ok_or_else(unexpected)?)),
        (FieldKind::ScalarArray(_), V::List(items)) => Ok(Value::ScalarArray(
            items
                .iter()
                .map(|v| scalar(v).ok_or_else(unexpected))
                .collect::<Result<_, _>>()?,
        )),
        (FieldKind::Message(t), V::Message(m)) => Ok(Value::Message(build(t, m)?)),
        (FieldKind::MessageArray(t), V::List(items)) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                let V::Message(m) = item else {
                    return Err(unexpected());
                };
                records.push(build(t, m)?);
            }
            Ok(Value::MessageArray(records))
        }
        (FieldKind::MessageArray(t), V::Map(map)) => {
            let value_field = match field.kind() {
                Kind::Message(entry) if entry.is_map_entry() => entry.map_entry_value_field(),
                _ => return Err(unexpected()),
            };
            let value_def = t.fields().get(1).ok_or_else(unexpected)?;

            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| compare_keys(a, b));

            let mut records = Vec::with_capacity(entries.len());
            for (key, v) in entries {
                records.push(Record::new(
                    t.clone(),
                    vec![
                        Value::Scalar(map_key_scalar(key)),
                        convert(value_def, &value_field, v)?,
                    ],
                )?);
            }
            Ok(Value::MessageArray(records))
        }
        _ => Err(unexpected()),
    }
}

fn scalar(value: &prost_reflect::Value) -> Option<Scalar> {
    use prost_reflect::Value as V;
    Some(match value {
        V::Bool(b) => Scalar::Bool(*b),
        V::I32(n) => Scalar::Int(i64::from(*n)),
        V::I64(n) => Scalar::Int(*n),
        V::U32(n) => Scalar::UInt(u64::from(*n)),
        V::U64(n) => Scalar::UInt(*n),
        V::F32(f) => Scalar::Float(f64::from(*f)),
        V::F64(f) => Scalar::Float(*f),
        V::String(s) => Scalar::Text(s.clone()),
        V::Bytes(b) => Scalar::Bytes(b.to_vec()),
        V::EnumNumber(n) => Scalar::Int(i64::from(*n)),
        V::Message(_) | V::List(_) | V::Map(_) => return None,
    })
}

fn map_key_scalar(key: &MapKey) -> Scalar {
    match key {
        MapKey::Bool(b) => Scalar::Bool(*b),
        MapKey::I32(n) => Scalar::Int(i64::from(*n)),
        MapKey::I64(n) => Scalar::Int(*n),
        MapKey::U32(n) => Scalar::UInt(u64::from(*n)),
        MapKey::U64(n) => Scalar::UInt(*n),
        MapKey::String(s) => Scalar::Text(s.clone()),
    }
}

fn format_map_key(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(n) => n.to_string(),
        MapKey::I64(n) => n.to_string(),
        MapKey::U32(n) => n.to_string(),
        MapKey::U64(n) => n.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

/// Numeric keys order numerically, everything else by rendered text.
fn compare_keys(a: &MapKey, b: &MapKey) -> Ordering {
    match (a, b) {
        (MapKey::Bool(x), MapKey::Bool(y)) => x.cmp(y),
        (MapKey::I32(x), MapKey::I32(y)) => x.cmp(y),
        (MapKey::I64(x), MapKey::I64(y)) => x.cmp(y),
        (MapKey::U32(x), MapKey::U32(y)) => x.cmp(y),
        (MapKey::U64(x), MapKey::U64(y)) => x.cmp(y),
        _ => format_map_key(a).cmp(&format_map_key(b)),
    }
}
