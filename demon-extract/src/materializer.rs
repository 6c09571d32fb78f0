//! Record materializer
//!
//! Converts decoded [`Value`] trees into typed objects using the
//! [`TypeRegistry`]:
//!
//! 1. A record whose type resolves becomes a [`MaterializedObject`] holding
//!    exactly the registry's merged field set. Present fields are converted
//!    to their declared type, absent ones take the declared default, and raw
//!    fields the schema does not declare are dropped.
//! 2. A record whose type does not resolve is passed through unchanged and
//!    counted as skipped. This never fails.
//! 3. Lists are converted element by element. An element that fails keeps
//!    its raw value in place, so list length never changes.
//! 4. Scalars and plain maps pass through; maps are traversed for embedded
//!    records.
//!
//! A conversion failure is contained at the field that caused it: the field
//! falls back to its raw value (or default) and the enclosing object is still
//! built.

use crate::error::FieldConversionError;
use crate::registry::{FieldDecl, FieldType, TypeRegistry};
use crate::stats::{IssueKind, RunStatistics, DEFAULT_SAMPLE_LIMIT};
use crate::value::{TaggedRecord, TypeRef, TypeTag, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Nesting depth beyond which a field is treated as failed
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Typed object built from a resolvable record
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedObject {
    pub tag: TypeTag,
    pub type_name: String,
    pub fields: BTreeMap<String, Materialized>,
}

impl MaterializedObject {
    /// Re-serialize to a raw record (tagged by number)
    pub fn to_record(&self) -> TaggedRecord {
        TaggedRecord {
            type_ref: TypeRef::Tag(self.tag),
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_value()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Materialized> {
        self.fields.get(field)
    }
}

/// Result of materializing one value
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Object(MaterializedObject),
    List(Vec<Materialized>),
    Map(BTreeMap<String, Materialized>),
    /// Scalar, or a value passed through unchanged
    Value(Value),
}

impl Materialized {
    /// Re-serialize to the raw value form
    pub fn to_value(&self) -> Value {
        match self {
            Materialized::Object(obj) => Value::Record(obj.to_record()),
            Materialized::List(items) => Value::List(items.iter().map(Materialized::to_value).collect()),
            Materialized::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Materialized::Value(value) => value.clone(),
        }
    }

    pub fn as_object(&self) -> Option<&MaterializedObject> {
        match self {
            Materialized::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Materialized::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Materialized::Value(Value::Null))
    }
}

/// Whether an object was built cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeStatus {
    Complete,
    /// At least one field or element fell back
    Partial,
}

impl MaterializeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterializeStatus::Complete => "complete",
            MaterializeStatus::Partial => "partial",
        }
    }
}

/// Output and statistics of one top-level call
#[derive(Debug, Clone)]
pub struct Materialization {
    pub value: Materialized,
    pub status: MaterializeStatus,
    pub stats: RunStatistics,
}

impl Materialization {
    pub fn object(&self) -> Option<&MaterializedObject> {
        self.value.as_object()
    }

    pub fn into_object(self) -> Option<MaterializedObject> {
        match self.value {
            Materialized::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

/// Converts records against a shared, read-only registry
#[derive(Debug, Clone, Copy)]
pub struct Materializer<'r> {
    registry: &'r TypeRegistry,
    sample_limit: usize,
    max_depth: usize,
}

impl<'r> Materializer<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// Resolve a record's type reference to a registered tag
    pub fn resolve(&self, type_ref: &TypeRef) -> Option<TypeTag> {
        match type_ref {
            TypeRef::Tag(tag) => self.registry.resolve_by_tag(*tag).map(|s| s.tag),
            TypeRef::Name(name) => self.registry.resolve_by_name(name),
        }
    }

    pub fn materialize(&self, value: &Value) -> Materialization {
        self.materialize_at("", value)
    }

    /// Materialize one top-level value; `context` (usually the source path)
    /// prefixes error samples
    pub fn materialize_at(&self, context: &str, value: &Value) -> Materialization {
        let mut walk = Walk {
            registry: self.registry,
            max_depth: self.max_depth,
            stats: RunStatistics::with_sample_limit(self.sample_limit),
            path: vec![context.to_string()],
        };
        walk.stats.processed = 1;

        let value = match value {
            Value::Record(record) => match self.resolve(&record.type_ref) {
                Some(tag) => Materialized::Object(walk.object(tag, record, 0)),
                None => {
                    debug!("{}: unknown type {}, passed through", context, record.type_ref);
                    walk.stats.skipped = 1;
                    return Materialization {
                        value: Materialized::Value(value.clone()),
                        status: MaterializeStatus::Complete,
                        stats: walk.stats,
                    };
                }
            },
            other => walk.generic(other, 0),
        };

        let status = if walk.stats.field_fallbacks + walk.stats.element_fallbacks > 0 {
            walk.stats.failed = 1;
            MaterializeStatus::Partial
        } else {
            walk.stats.succeeded = 1;
            MaterializeStatus::Complete
        };

        Materialization {
            value,
            status,
            stats: walk.stats,
        }
    }
}

/// State of one top-level call
struct Walk<'r> {
    registry: &'r TypeRegistry,
    max_depth: usize,
    stats: RunStatistics,
    path: Vec<String>,
}

impl<'r> Walk<'r> {
    fn context(&self) -> String {
        self.path
            .iter()
            .filter(|segment| !segment.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(".")
    }

    fn note_depth(&mut self, depth: usize) {
        self.stats.max_depth = self.stats.max_depth.max(depth);
    }

    fn object(&mut self, tag: TypeTag, record: &TaggedRecord, depth: usize) -> MaterializedObject {
        self.note_depth(depth);
        let registry = self.registry;
        let type_name = registry.name_of(tag).unwrap_or_default().to_string();

        let mut fields = BTreeMap::new();
        if let Some(field_set) = registry.fields(tag) {
            for (name, decl) in field_set {
                self.path.push(name.clone());
                let value = self.field(decl, record.fields.get(name), depth);
                self.path.pop();
                fields.insert(name.clone(), value);
            }
        }

        MaterializedObject { tag, type_name, fields }
    }

    fn field(&mut self, decl: &FieldDecl, raw: Option<&Value>, depth: usize) -> Materialized {
        match raw {
            // Null stands for "not set" in dumps
            None | Some(Value::Null) if !matches!(decl.field_type, FieldType::Any | FieldType::Object(_)) => {
                self.default_value(decl, depth)
            }
            None => self.default_value(decl, depth),
            Some(raw) => match self.convert(raw, &decl.field_type, depth + 1) {
                Ok(value) => value,
                Err(err) => {
                    self.stats.field_fallbacks += 1;
                    let context = self.context();
                    debug!("{}: field fell back to raw value: {}", context, err);
                    self.stats.errors.push(IssueKind::FieldConversion, context, err.to_string());
                    Materialized::Value(raw.clone())
                }
            },
        }
    }

    /// Defaults go through the same conversion as raw values so that a
    /// re-serialized object materializes to the same result
    fn default_value(&mut self, decl: &FieldDecl, depth: usize) -> Materialized {
        match self.convert(&decl.default, &decl.field_type, depth + 1) {
            Ok(value) => value,
            Err(_) => Materialized::Value(decl.default.clone()),
        }
    }

    fn convert(
        &mut self,
        raw: &Value,
        field_type: &FieldType,
        depth: usize,
    ) -> Result<Materialized, FieldConversionError> {
        if depth > self.max_depth {
            return Err(FieldConversionError::DepthExceeded(self.max_depth));
        }

        let mismatch = || FieldConversionError::TypeMismatch {
            expected: field_type.describe(),
            found: raw.kind().to_string(),
        };

        match field_type {
            FieldType::Any => Ok(self.generic(raw, depth)),

            FieldType::Bool => match raw {
                Value::Bool(b) => Ok(Materialized::Value(Value::Bool(*b))),
                Value::Int(0) => Ok(Materialized::Value(Value::Bool(false))),
                Value::Int(1) => Ok(Materialized::Value(Value::Bool(true))),
                _ => Err(mismatch()),
            },

            FieldType::Int => match raw {
                Value::Int(i) => Ok(Materialized::Value(Value::Int(*i))),
                Value::Bool(b) => Ok(Materialized::Value(Value::Int(i64::from(*b)))),
                Value::Float(f) if f.fract() == 0.0 => {
                    if *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                        Ok(Materialized::Value(Value::Int(*f as i64)))
                    } else {
                        Err(FieldConversionError::OutOfRange(f.to_string()))
                    }
                }
                _ => Err(mismatch()),
            },

            FieldType::Float => match raw {
                Value::Float(f) => Ok(Materialized::Value(Value::Float(*f))),
                Value::Int(i) => Ok(Materialized::Value(Value::Float(*i as f64))),
                _ => Err(mismatch()),
            },

            FieldType::String => match raw {
                Value::Str(s) => Ok(Materialized::Value(Value::Str(s.clone()))),
                _ => Err(mismatch()),
            },

            FieldType::Object(_) => match raw {
                Value::Record(_) | Value::Map(_) | Value::Null => Ok(self.generic(raw, depth)),
                _ => Err(mismatch()),
            },

            FieldType::List(element_type) => match raw {
                Value::List(items) => Ok(Materialized::List(self.list(items, element_type, depth))),
                _ => Err(mismatch()),
            },
        }
    }

    fn list(&mut self, items: &[Value], element_type: &FieldType, depth: usize) -> Vec<Materialized> {
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            self.path.push(format!("[{}]", index));
            match self.convert(item, element_type, depth + 1) {
                Ok(value) => out.push(value),
                Err(err) => {
                    self.stats.element_fallbacks += 1;
                    let context = self.context();
                    debug!("{}: element kept raw: {}", context, err);
                    self.stats.errors.push(IssueKind::FieldConversion, context, err.to_string());
                    out.push(Materialized::Value(item.clone()));
                }
            }
            self.path.pop();
        }
        out
    }

    /// Untyped traversal: resolve embedded records, keep everything else
    fn generic(&mut self, raw: &Value, depth: usize) -> Materialized {
        self.note_depth(depth);
        match raw {
            Value::Record(record) => {
                let tag = match &record.type_ref {
                    TypeRef::Tag(tag) => self.registry.resolve_by_tag(*tag).map(|s| s.tag),
                    TypeRef::Name(name) => self.registry.resolve_by_name(name),
                };
                match tag {
                    Some(tag) if depth < self.max_depth => {
                        self.stats.nested_objects += 1;
                        Materialized::Object(self.object(tag, record, depth))
                    }
                    Some(_) => {
                        self.stats.field_fallbacks += 1;
                        let context = self.context();
                        self.stats.errors.push(
                            IssueKind::FieldConversion,
                            context,
                            FieldConversionError::DepthExceeded(self.max_depth).to_string(),
                        );
                        Materialized::Value(raw.clone())
                    }
                    None => {
                        self.stats.nested_skipped += 1;
                        Materialized::Value(raw.clone())
                    }
                }
            }
            Value::List(items) => Materialized::List(self.list(items, &FieldType::Any, depth)),
            Value::Map(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    self.path.push(key.clone());
                    let converted = if depth + 1 > self.max_depth {
                        Materialized::Value(value.clone())
                    } else {
                        self.generic(value, depth + 1)
                    };
                    self.path.pop();
                    out.insert(key.clone(), converted);
                }
                Materialized::Map(out)
            }
            scalar => Materialized::Value(scalar.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaDefinition;

    fn registry() -> TypeRegistry {
        TypeRegistry::from_definitions(vec![
            SchemaDefinition::new(100, "Simple")
                .with_field("a", FieldDecl::new(FieldType::Int, Value::Int(0)))
                .with_field("b", FieldDecl::new(FieldType::String, Value::from(""))),
            SchemaDefinition::new(200, "class SpellEffect")
                .with_field("m_damage", FieldDecl::of(FieldType::Int))
                .with_field("m_school", FieldDecl::of(FieldType::String)),
            SchemaDefinition::new(300, "class SpellTemplate")
                .with_field("m_name", FieldDecl::of(FieldType::String))
                .with_field("m_pvp", FieldDecl::of(FieldType::Bool))
                .with_field("m_accuracy", FieldDecl::of(FieldType::Float))
                .with_field(
                    "m_effects",
                    FieldDecl::of(FieldType::List(Box::new(FieldType::Object(Some(
                        "SpellEffect".into(),
                    ))))),
                )
                .with_field("m_primary", FieldDecl::of(FieldType::Object(Some("SpellEffect".into())))),
            SchemaDefinition::new(301, "class TreasureSpell")
                .with_ancestors(vec![300])
                .with_field("m_rarity", FieldDecl::new(FieldType::Int, Value::Int(1))),
        ])
    }

    fn effect(damage: i64) -> Value {
        TaggedRecord::with_tag(200)
            .field("m_damage", Value::Int(damage))
            .field("m_school", "Fire".into())
            .into()
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let registry = registry();
        let input: Value = TaggedRecord::with_tag(100).field("a", Value::Int(5)).into();

        let result = Materializer::new(&registry).materialize(&input);
        let obj = result.object().unwrap();

        assert_eq!(obj.fields.len(), 2);
        assert_eq!(obj.fields["a"], Materialized::Value(Value::Int(5)));
        assert_eq!(obj.fields["b"], Materialized::Value(Value::from("")));
        assert_eq!(result.stats.succeeded, 1);
        assert_eq!(result.status, MaterializeStatus::Complete);
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let registry = registry();
        let input: Value = TaggedRecord::with_tag(999).field("x", Value::Int(1)).into();

        let result = Materializer::new(&registry).materialize(&input);

        assert_eq!(result.value, Materialized::Value(input));
        assert_eq!(result.stats.skipped, 1);
        assert_eq!(result.stats.failed, 0);
        assert_eq!(result.stats.processed, 1);
    }

    #[test]
    fn test_list_keeps_unknown_element_in_place() {
        let registry = registry();
        let unknown: Value = TaggedRecord::with_tag(999).field("x", Value::Int(1)).into();
        let input: Value = TaggedRecord::with_tag(300)
            .field("m_effects", Value::List(vec![effect(10), unknown.clone(), effect(30)]))
            .into();

        let result = Materializer::new(&registry).materialize(&input);
        let obj = result.object().unwrap();
        let Materialized::List(items) = &obj.fields["m_effects"] else {
            panic!("expected list");
        };

        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0].as_object().unwrap().fields["m_damage"],
            Materialized::Value(Value::Int(10))
        );
        assert_eq!(items[1], Materialized::Value(unknown));
        assert_eq!(
            items[2].as_object().unwrap().fields["m_damage"],
            Materialized::Value(Value::Int(30))
        );
        assert_eq!(result.stats.nested_skipped, 1);
        assert_eq!(result.stats.nested_objects, 2);
    }

    #[test]
    fn test_element_conversion_failure_keeps_raw() {
        let registry = TypeRegistry::from_definitions(vec![SchemaDefinition::new(1, "Ids")
            .with_field("m_ids", FieldDecl::of(FieldType::List(Box::new(FieldType::Int))))]);
        let input: Value = TaggedRecord::with_tag(1)
            .field("m_ids", Value::List(vec![Value::Int(1), Value::from("two"), Value::Int(3)]))
            .into();

        let result = Materializer::new(&registry).materialize(&input);
        let Materialized::List(items) = &result.object().unwrap().fields["m_ids"] else {
            panic!("expected list");
        };

        assert_eq!(items.len(), 3);
        assert_eq!(items[1], Materialized::Value(Value::from("two")));
        assert_eq!(result.stats.element_fallbacks, 1);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.status, MaterializeStatus::Partial);
        assert_eq!(result.stats.errors.samples()[0].context, "m_ids.[1]");

        let at_path = Materializer::new(&registry).materialize_at("Data/Ids.xml", &input);
        assert_eq!(at_path.stats.errors.samples()[0].context, "Data/Ids.xml.m_ids.[1]");
    }

    #[test]
    fn test_field_failure_falls_back_to_raw() {
        let registry = registry();
        let input: Value = TaggedRecord::with_tag(300)
            .field("m_name", Value::Int(42))
            .field("m_accuracy", Value::Int(90))
            .into();

        let result = Materializer::new(&registry).materialize_at("Spells/Odd.xml", &input);
        let obj = result.object().unwrap();

        assert_eq!(obj.fields["m_name"], Materialized::Value(Value::Int(42)));
        assert_eq!(obj.fields["m_accuracy"], Materialized::Value(Value::Float(90.0)));
        assert_eq!(result.stats.field_fallbacks, 1);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.errors.samples()[0].context, "Spells/Odd.xml.m_name");
    }

    #[test]
    fn test_coercions() {
        let registry = registry();
        let input: Value = TaggedRecord::with_tag(300)
            .field("m_pvp", Value::Int(1))
            .field("m_unknown_raw", Value::from("dropped"))
            .into();

        let result = Materializer::new(&registry).materialize(&input);
        let obj = result.object().unwrap();

        assert_eq!(obj.fields["m_pvp"], Materialized::Value(Value::Bool(true)));
        assert!(!obj.fields.contains_key("m_unknown_raw"));
        assert!(obj.fields["m_primary"].is_null());
    }

    #[test]
    fn test_inherited_field_set() {
        let registry = registry();
        let input: Value = TaggedRecord::new(TypeRef::Name("class TreasureSpell".into()))
            .field("m_name", "Meteor".into())
            .into();

        let result = Materializer::new(&registry).materialize(&input);
        let obj = result.object().unwrap();

        assert_eq!(obj.tag, 301);
        assert_eq!(obj.type_name, "TreasureSpell");
        let expected: Vec<&str> = registry.fields(301).unwrap().keys().map(String::as_str).collect();
        let actual: Vec<&str> = obj.fields.keys().map(String::as_str).collect();
        assert_eq!(actual, expected);
        assert_eq!(obj.fields["m_rarity"], Materialized::Value(Value::Int(1)));
    }

    #[test]
    fn test_nested_name_resolution() {
        let registry = registry();
        let nested: Value = TaggedRecord::new(TypeRef::Name("class SpellEffect".into()))
            .field("m_damage", Value::Float(50.0))
            .into();
        let input: Value = TaggedRecord::with_tag(300).field("m_primary", nested).into();

        let result = Materializer::new(&registry).materialize(&input);
        let primary = result.object().unwrap().fields["m_primary"].as_object().unwrap();

        assert_eq!(primary.tag, 200);
        assert_eq!(primary.fields["m_damage"], Materialized::Value(Value::Int(50)));
    }

    #[test]
    fn test_rematerialize_is_idempotent() {
        let registry = registry();
        let unknown: Value = TaggedRecord::with_tag(999).field("x", Value::Int(1)).into();
        let input: Value = TaggedRecord::with_tag(301)
            .field("m_name", Value::Int(7))
            .field("m_pvp", Value::Int(0))
            .field("m_effects", Value::List(vec![effect(5), unknown]))
            .field(
                "m_primary",
                TaggedRecord::new(TypeRef::Name("SpellEffect".into()))
                    .field("m_damage", Value::Bool(true))
                    .into(),
            )
            .into();

        let materializer = Materializer::new(&registry);
        let first = materializer.materialize(&input).into_object().unwrap();
        let second = materializer
            .materialize(&Value::Record(first.to_record()))
            .into_object()
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_depth_limit_contains_runaway_nesting() {
        let registry = TypeRegistry::from_definitions(vec![SchemaDefinition::new(1, "Node")
            .with_field("m_child", FieldDecl::of(FieldType::Object(Some("Node".into()))))]);

        let mut value: Value = TaggedRecord::with_tag(1).into();
        for _ in 0..10 {
            value = TaggedRecord::with_tag(1).field("m_child", value).into();
        }

        let result = Materializer::new(&registry).with_max_depth(4).materialize(&value);

        assert!(result.object().is_some());
        assert_eq!(result.status, MaterializeStatus::Partial);
        assert!(result.stats.max_depth <= 4);
    }

    #[test]
    fn test_plain_values_pass_through() {
        let registry = registry();
        let materializer = Materializer::new(&registry);

        let scalar = materializer.materialize(&Value::Int(3));
        assert_eq!(scalar.value, Materialized::Value(Value::Int(3)));
        assert_eq!(scalar.stats.succeeded, 1);

        let mut map = BTreeMap::new();
        map.insert("inner".to_string(), effect(9));
        let result = materializer.materialize(&Value::Map(map));
        let Materialized::Map(out) = result.value else {
            panic!("expected map");
        };
        assert!(out["inner"].as_object().is_some());
    }
}
