//! Decoded record values
//!
//! The decoder hands over trees of [`Value`]. Records carry a [`TypeRef`]:
//! a numeric tag, or a readable type name when the dump spells it out.
//!
//! JSON dumps mark records with a `"$__type"` key, e.g.
//! `{"$__type": 701229577, "m_name": "Fireball"}` or
//! `{"$__type": "class SpellEffect", ...}`. Objects without it are plain maps.

use serde_json::{Map as JsonMap, Number, Value as Json};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric type tag (the type-name hash in the data source)
pub type TypeTag = u32;

/// Key marking a JSON object as a tagged record
pub const TYPE_KEY: &str = "$__type";

/// How a record names its type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Tag(TypeTag),
    Name(String),
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Tag(tag) => write!(f, "#{}", tag),
            TypeRef::Name(name) => f.write_str(name),
        }
    }
}

/// Type-tagged map of named fields
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedRecord {
    pub type_ref: TypeRef,
    pub fields: BTreeMap<String, Value>,
}

impl TaggedRecord {
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_tag(tag: TypeTag) -> Self {
        Self::new(TypeRef::Tag(tag))
    }

    /// Builder-style field insertion
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// One decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Record(TaggedRecord),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short variant name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&TaggedRecord> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Convert a JSON dump node, recognising `"$__type"` records
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                // u64 beyond i64 and real numbers both land here
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => match map.get(TYPE_KEY).and_then(parse_type_ref) {
                Some(type_ref) => {
                    let fields = map
                        .iter()
                        .filter(|(k, _)| k.as_str() != TYPE_KEY)
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect();
                    Value::Record(TaggedRecord { type_ref, fields })
                }
                None => Value::Map(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                ),
            },
        }
    }

    /// Inverse of [`Value::from_json`]; non-finite floats become `null`
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number(Number::from(*i)),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<_, _>>(),
            ),
            Value::Record(record) => {
                let mut map = JsonMap::new();
                let type_json = match &record.type_ref {
                    TypeRef::Tag(tag) => Json::Number(Number::from(*tag)),
                    TypeRef::Name(name) => Json::String(name.clone()),
                };
                map.insert(TYPE_KEY.to_string(), type_json);
                for (k, v) in &record.fields {
                    map.insert(k.clone(), v.to_json());
                }
                Json::Object(map)
            }
        }
    }
}

fn parse_type_ref(json: &Json) -> Option<TypeRef> {
    match json {
        Json::Number(n) => n.as_u64().and_then(|t| TypeTag::try_from(t).ok()).map(TypeRef::Tag),
        Json::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else if let Ok(tag) = trimmed.parse::<TypeTag>() {
                Some(TypeRef::Tag(tag))
            } else {
                Some(TypeRef::Name(trimmed.to_string()))
            }
        }
        _ => None,
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<TaggedRecord> for Value {
    fn from(v: TaggedRecord) -> Self {
        Value::Record(v)
    }
}
