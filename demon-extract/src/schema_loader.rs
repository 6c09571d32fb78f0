//! Type-definition dump loader
//!
//! Reads the JSON type dump produced by the game's reflection tooling:
//!
//! ```json
//! {"version": 2, "classes": {
//!   "701229577": {
//!     "name": "class SpellTemplate",
//!     "bases": ["class CoreTemplate"],
//!     "properties": {
//!       "m_name": {"type": "std::string", "container": "Static"},
//!       "m_effects": {"type": "class SharedPointer<class SpellEffect>", "container": "List"}
//!     }
//!   }
//! }}
//! ```
//!
//! `properties` may also be an array of objects carrying a `name` key. An
//! optional `default` overrides the type's zero value.

use crate::error::{ExtractError, Result};
use crate::registry::{normalize_type_name, FieldDecl, FieldType, SchemaDefinition};
use crate::value::{TypeTag, Value};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Read and parse a type dump file
pub fn load_schemas(path: &Path) -> Result<Vec<SchemaDefinition>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ExtractError::SchemaLoad(format!("{}: {}", path.display(), e)))?;
    let schemas = parse_schemas(&text)?;
    info!("Loaded {} type definitions from {}", schemas.len(), path.display());
    Ok(schemas)
}

/// One class entry before ancestor linearization
struct RawClass {
    tag: TypeTag,
    name: String,
    bases: Vec<String>,
    fields: Vec<(String, FieldDecl)>,
}

pub fn parse_schemas(text: &str) -> Result<Vec<SchemaDefinition>> {
    let root: Json = serde_json::from_str(text)
        .map_err(|e| ExtractError::SchemaLoad(format!("invalid JSON: {}", e)))?;
    let classes = root
        .get("classes")
        .and_then(Json::as_object)
        .ok_or_else(|| ExtractError::SchemaLoad("missing 'classes' object".to_string()))?;

    let mut raw = Vec::with_capacity(classes.len());
    for (hash, class) in classes {
        raw.push(parse_class(hash, class)?);
    }

    let by_name: HashMap<&str, usize> = raw
        .iter()
        .enumerate()
        .map(|(idx, class)| (class.name.as_str(), idx))
        .collect();

    let mut schemas = Vec::with_capacity(raw.len());
    for (idx, class) in raw.iter().enumerate() {
        let mut ancestors = Vec::new();
        let mut visiting = HashSet::from([idx]);
        linearize(idx, &raw, &by_name, &mut visiting, &mut ancestors);

        let mut schema = SchemaDefinition::new(class.tag, class.name.clone()).with_ancestors(ancestors);
        for (name, decl) in &class.fields {
            schema = schema.with_field(name.clone(), decl.clone());
        }
        schemas.push(schema);
    }

    Ok(schemas)
}

fn parse_class(hash: &str, class: &Json) -> Result<RawClass> {
    let tag: TypeTag = hash
        .trim()
        .parse()
        .map_err(|_| ExtractError::SchemaLoad(format!("class key '{}' is not a type hash", hash)))?;
    let name = class
        .get("name")
        .and_then(Json::as_str)
        .map(normalize_type_name)
        .ok_or_else(|| ExtractError::SchemaLoad(format!("class {} has no name", hash)))?;

    let bases = class
        .get("bases")
        .and_then(Json::as_array)
        .map(|bases| {
            bases
                .iter()
                .filter_map(Json::as_str)
                .map(normalize_type_name)
                .collect()
        })
        .unwrap_or_default();

    let fields = match class.get("properties") {
        Some(Json::Object(props)) => props
            .iter()
            .filter_map(|(name, prop)| prop.as_object().map(|p| (name.clone(), parse_property(p))))
            .collect(),
        Some(Json::Array(props)) => props
            .iter()
            .filter_map(Json::as_object)
            .filter_map(|p| {
                let name = p.get("name").and_then(Json::as_str)?;
                Some((name.to_string(), parse_property(p)))
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(RawClass { tag, name, bases, fields })
}

fn parse_property(prop: &JsonMap<String, Json>) -> FieldDecl {
    let declared = prop.get("type").and_then(Json::as_str).unwrap_or("");
    let element = map_type(declared);
    let field_type = match prop.get("container").and_then(Json::as_str) {
        Some("Vector") | Some("List") => FieldType::List(Box::new(element)),
        _ => element,
    };

    match prop.get("default") {
        Some(default) => FieldDecl::new(field_type, Value::from_json(default)),
        None => FieldDecl::of(field_type),
    }
}

/// Map a native type spelling onto a field type
fn map_type(declared: &str) -> FieldType {
    let t = declared.trim();

    if let Some(inner) = t
        .strip_prefix("class SharedPointer<")
        .or_else(|| t.strip_prefix("SharedPointer<"))
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return FieldType::Object(Some(normalize_type_name(inner)));
    }

    match t {
        "bool" => FieldType::Bool,
        "int" | "unsigned int" | "char" | "unsigned char" | "short" | "unsigned short" | "long"
        | "unsigned long" | "__int64" | "unsigned __int64" | "gid" | "s8" | "u8" | "s16" | "u16"
        | "s32" | "u32" | "s64" | "u64" => FieldType::Int,
        "float" | "double" => FieldType::Float,
        "std::string" | "std::wstring" | "char*" | "wchar_t*" => FieldType::String,
        _ if t.starts_with("class ") => match normalize_type_name(t).as_str() {
            // Geometry and colour values are plain structs in the dumps
            "Vector3D" | "Point<int>" | "Point<float>" | "Rect<int>" | "Rect<float>" | "Color"
            | "Size<int>" | "Euler" | "Matrix3x3" | "Quaternion" => FieldType::Any,
            name => FieldType::Object(Some(name.to_string())),
        },
        _ => FieldType::Any,
    }
}

/// Depth-first over all bases, root first; a base seen twice keeps its
/// first position
fn linearize(
    idx: usize,
    classes: &[RawClass],
    by_name: &HashMap<&str, usize>,
    visiting: &mut HashSet<usize>,
    out: &mut Vec<TypeTag>,
) {
    for base in &classes[idx].bases {
        let Some(&base_idx) = by_name.get(base.as_str()) else {
            warn!("{} names unknown base '{}'; skipped", classes[idx].name, base);
            continue;
        };
        if !visiting.insert(base_idx) {
            continue;
        }
        linearize(base_idx, classes, by_name, visiting, out);
        let tag = classes[base_idx].tag;
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;

    const DUMP: &str = r#"{
        "version": 2,
        "classes": {
            "1": {"name": "class PropertyClass", "bases": [], "properties": {}},
            "2": {
                "name": "class CoreTemplate",
                "bases": ["class PropertyClass"],
                "properties": {
                    "m_templateID": {"type": "unsigned int", "container": "Static"},
                    "m_objectName": {"type": "std::string", "container": "Static"}
                }
            },
            "3": {
                "name": "class SpellTemplate",
                "bases": ["class CoreTemplate"],
                "properties": [
                    {"name": "m_PvP", "type": "bool", "container": "Static"},
                    {"name": "m_accuracy", "type": "float", "container": "Static", "default": 0.9},
                    {"name": "m_effects", "type": "class SharedPointer<class SpellEffect>", "container": "List"},
                    {"name": "m_position", "type": "class Vector3D", "container": "Static"},
                    {"name": "m_school", "type": "enum MagicSchool", "container": "Static"}
                ]
            },
            "4": {"name": "class SpellEffect", "bases": ["class Missing"], "properties": {}}
        }
    }"#;

    #[test]
    fn test_parse_dump() {
        let schemas = parse_schemas(DUMP).unwrap();
        assert_eq!(schemas.len(), 4);

        let spell = schemas.iter().find(|s| s.tag == 3).unwrap();
        assert_eq!(spell.name, "SpellTemplate");
        assert_eq!(spell.ancestors, vec![1, 2]);
        assert_eq!(spell.fields["m_PvP"].field_type, FieldType::Bool);
        assert_eq!(spell.fields["m_accuracy"].default, Value::Float(0.9));
        assert_eq!(
            spell.fields["m_effects"].field_type,
            FieldType::List(Box::new(FieldType::Object(Some("SpellEffect".into()))))
        );
        assert_eq!(spell.fields["m_position"].field_type, FieldType::Any);
        assert_eq!(spell.fields["m_school"].field_type, FieldType::Any);

        let effect = schemas.iter().find(|s| s.tag == 4).unwrap();
        assert!(effect.ancestors.is_empty());
    }

    #[test]
    fn test_registry_from_dump_inherits_fields() {
        let registry = TypeRegistry::from_definitions(parse_schemas(DUMP).unwrap());
        let fields = registry.fields(3).unwrap();
        assert!(fields.contains_key("m_templateID"));
        assert!(fields.contains_key("m_PvP"));
        assert_eq!(fields["m_templateID"].field_type, FieldType::Int);
    }

    #[test]
    fn test_base_cycle_terminates() {
        let dump = r#"{"classes": {
            "10": {"name": "class A", "bases": ["class B"]},
            "11": {"name": "class B", "bases": ["class A"]}
        }}"#;
        let schemas = parse_schemas(dump).unwrap();
        let a = schemas.iter().find(|s| s.tag == 10).unwrap();
        assert_eq!(a.ancestors, vec![11]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_schemas("not json").is_err());
        assert!(parse_schemas(r#"{"types": {}}"#).is_err());
        assert!(parse_schemas(r#"{"classes": {"abc": {"name": "class X"}}}"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_schemas(Path::new("/nonexistent/types.json")).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaLoad(_)));
    }
}
