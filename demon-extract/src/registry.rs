//! Type registry
//!
//! Maps type tags to schema definitions and resolves each tag's full field
//! set by walking its ancestor chain root→leaf. A field redeclared by a more
//! specific schema overrides the ancestor's declaration.
//!
//! The tag↔name map is built at registration time, so resolving a nested
//! record that carries a readable type name is a single hash lookup.

use crate::value::{TypeTag, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Declared semantic type of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    /// Nested record, optionally naming the declared type
    Object(Option<String>),
    List(Box<FieldType>),
    /// No coercion; the value is only traversed
    Any,
}

impl FieldType {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Bool | FieldType::Int | FieldType::Float | FieldType::String
        )
    }

    /// Zero value used when a dump declares no default
    pub fn zero_value(&self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Int => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::String => Value::Str(String::new()),
            FieldType::List(_) => Value::List(Vec::new()),
            FieldType::Object(_) | FieldType::Any => Value::Null,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FieldType::Bool => "bool".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Object(Some(name)) => format!("object<{}>", name),
            FieldType::Object(None) => "object".to_string(),
            FieldType::List(inner) => format!("list<{}>", inner.describe()),
            FieldType::Any => "any".to_string(),
        }
    }
}

/// Type and default of one declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub field_type: FieldType,
    pub default: Value,
}

impl FieldDecl {
    pub fn new(field_type: FieldType, default: Value) -> Self {
        Self { field_type, default }
    }

    /// Declaration defaulting to the type's zero value
    pub fn of(field_type: FieldType) -> Self {
        let default = field_type.zero_value();
        Self { field_type, default }
    }
}

/// Merged field set of a resolved type
pub type FieldSet = BTreeMap<String, FieldDecl>;

/// Schema of one type tag
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    pub tag: TypeTag,
    pub name: String,
    /// Ancestor tags, root first, excluding `tag` itself
    pub ancestors: Vec<TypeTag>,
    /// Fields declared by this type only
    pub fields: FieldSet,
}

impl SchemaDefinition {
    pub fn new(tag: TypeTag, name: impl Into<String>) -> Self {
        Self {
            tag,
            name: normalize_type_name(&name.into()),
            ancestors: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_ancestors(mut self, ancestors: Vec<TypeTag>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, decl: FieldDecl) -> Self {
        self.fields.insert(name.into(), decl);
        self
    }
}

/// Strip `class `/`struct `/`enum ` qualifiers and whitespace
pub fn normalize_type_name(name: &str) -> String {
    let trimmed = name.trim();
    for qualifier in ["class ", "struct ", "enum "] {
        if let Some(rest) = trimmed.strip_prefix(qualifier) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Run-scoped tag → schema mapping
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    schemas: HashMap<TypeTag, SchemaDefinition>,
    by_name: HashMap<String, TypeTag>,
    resolved: HashMap<TypeTag, FieldSet>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full set of definitions, resolving every field set once
    pub fn from_definitions(definitions: impl IntoIterator<Item = SchemaDefinition>) -> Self {
        let mut registry = Self::new();
        for schema in definitions {
            registry.insert(schema);
        }

        let tags: Vec<TypeTag> = registry.schemas.keys().copied().collect();
        for tag in tags {
            registry.resolve(tag);
        }

        debug!("Type registry built with {} schemas", registry.len());
        registry
    }

    /// Add or replace one schema.
    ///
    /// Every registered type whose chain includes `schema.tag` is re-resolved,
    /// so registration order does not matter.
    pub fn register(&mut self, schema: SchemaDefinition) {
        let tag = schema.tag;
        self.insert(schema);

        let affected: Vec<TypeTag> = self
            .schemas
            .values()
            .filter(|s| s.tag == tag || s.ancestors.contains(&tag))
            .map(|s| s.tag)
            .collect();
        for t in affected {
            self.resolve(t);
        }
    }

    fn insert(&mut self, schema: SchemaDefinition) {
        if let Some(previous) = self.schemas.get(&schema.tag) {
            if previous.name != schema.name && self.by_name.get(&previous.name) == Some(&schema.tag) {
                self.by_name.remove(&previous.name);
            }
        }
        if let Some(&other) = self.by_name.get(&schema.name) {
            if other != schema.tag {
                warn!(
                    "Type name '{}' registered for tags {} and {}; keeping {}",
                    schema.name, other, schema.tag, schema.tag
                );
            }
        }
        self.by_name.insert(schema.name.clone(), schema.tag);
        self.schemas.insert(schema.tag, schema);
    }

    fn resolve(&mut self, tag: TypeTag) {
        let Some(schema) = self.schemas.get(&tag) else {
            return;
        };

        let mut fields = FieldSet::new();
        for ancestor in &schema.ancestors {
            match self.schemas.get(ancestor) {
                Some(parent) => {
                    for (name, decl) in &parent.fields {
                        fields.insert(name.clone(), decl.clone());
                    }
                }
                None => warn!(
                    "Type {} ({}) names unregistered ancestor {}; its fields are skipped",
                    schema.name, tag, ancestor
                ),
            }
        }
        for (name, decl) in &schema.fields {
            fields.insert(name.clone(), decl.clone());
        }

        self.resolved.insert(tag, fields);
    }

    pub fn resolve_by_tag(&self, tag: TypeTag) -> Option<&SchemaDefinition> {
        self.schemas.get(&tag)
    }

    /// Reverse lookup; accepts qualified names such as `class SpellTemplate`
    pub fn resolve_by_name(&self, name: &str) -> Option<TypeTag> {
        match self.by_name.get(name) {
            Some(tag) => Some(*tag),
            None => self.by_name.get(&normalize_type_name(name)).copied(),
        }
    }

    /// Full inherited field set of `tag`
    pub fn fields(&self, tag: TypeTag) -> Option<&FieldSet> {
        self.resolved.get(&tag)
    }

    pub fn name_of(&self, tag: TypeTag) -> Option<&str> {
        self.schemas.get(&tag).map(|s| s.name.as_str())
    }

    /// Whether `tag` is `ancestor` or inherits from it
    pub fn is_a(&self, tag: TypeTag, ancestor: TypeTag) -> bool {
        tag == ancestor
            || self
                .schemas
                .get(&tag)
                .is_some_and(|s| s.ancestors.contains(&ancestor))
    }

    /// Whether `tag` is any of `roots` (an empty set accepts everything)
    pub fn is_any_of(&self, tag: TypeTag, roots: &HashSet<TypeTag>) -> bool {
        roots.is_empty() || roots.iter().any(|root| self.is_a(tag, *root))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDefinition> {
        self.schemas.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<SchemaDefinition> {
        vec![
            SchemaDefinition::new(1, "class CoreTemplate")
                .with_field("m_id", FieldDecl::of(FieldType::Int))
                .with_field("m_name", FieldDecl::new(FieldType::String, Value::from("core"))),
            SchemaDefinition::new(2, "class WizGameObjectTemplate")
                .with_ancestors(vec![1])
                .with_field("m_school", FieldDecl::of(FieldType::String)),
            SchemaDefinition::new(3, "class MobTemplate")
                .with_ancestors(vec![1, 2])
                .with_field("m_name", FieldDecl::new(FieldType::String, Value::from("mob")))
                .with_field("m_level", FieldDecl::new(FieldType::Int, Value::Int(1))),
        ]
    }

    #[test]
    fn test_merge_root_to_leaf() {
        let registry = TypeRegistry::from_definitions(chain());
        let fields = registry.fields(3).unwrap();

        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["m_id", "m_level", "m_name", "m_school"]);
        // Leaf redeclaration wins
        assert_eq!(fields["m_name"].default, Value::from("mob"));
        assert_eq!(registry.fields(2).unwrap()["m_name"].default, Value::from("core"));
    }

    #[test]
    fn test_name_lookup_normalizes() {
        let registry = TypeRegistry::from_definitions(chain());
        assert_eq!(registry.resolve_by_name("MobTemplate"), Some(3));
        assert_eq!(registry.resolve_by_name("class MobTemplate"), Some(3));
        assert_eq!(registry.resolve_by_name("struct MobTemplate"), Some(3));
        assert_eq!(registry.resolve_by_name("NoSuchTemplate"), None);
        assert!(registry.resolve_by_tag(999).is_none());
        assert!(registry.fields(999).is_none());
    }

    #[test]
    fn test_register_reresolves_descendants() {
        let mut registry = TypeRegistry::new();
        // Child registered before its ancestor
        registry.register(
            SchemaDefinition::new(3, "MobTemplate")
                .with_ancestors(vec![1])
                .with_field("m_level", FieldDecl::of(FieldType::Int)),
        );
        assert_eq!(registry.fields(3).unwrap().len(), 1);

        registry.register(
            SchemaDefinition::new(1, "CoreTemplate").with_field("m_id", FieldDecl::of(FieldType::Int)),
        );
        assert_eq!(registry.fields(3).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_ancestor_is_skipped() {
        let registry = TypeRegistry::from_definitions(vec![SchemaDefinition::new(5, "Orphan")
            .with_ancestors(vec![404])
            .with_field("m_a", FieldDecl::of(FieldType::Bool))]);
        assert_eq!(registry.fields(5).unwrap().len(), 1);
    }

    #[test]
    fn test_is_a() {
        let registry = TypeRegistry::from_definitions(chain());
        assert!(registry.is_a(3, 2));
        assert!(registry.is_a(3, 3));
        assert!(!registry.is_a(2, 3));

        let roots: HashSet<TypeTag> = [2].into_iter().collect();
        assert!(registry.is_any_of(3, &roots));
        assert!(!registry.is_any_of(1, &roots));
        assert!(registry.is_any_of(1, &HashSet::new()));
    }

    #[test]
    fn test_rename_drops_stale_name() {
        let mut registry = TypeRegistry::from_definitions(chain());
        registry.register(SchemaDefinition::new(3, "BossTemplate").with_ancestors(vec![1, 2]));
        assert_eq!(registry.resolve_by_name("MobTemplate"), None);
        assert_eq!(registry.resolve_by_name("BossTemplate"), Some(3));
        assert!(!registry.fields(3).unwrap().contains_key("m_level"));
    }
}
