//! Entity table layouts
//!
//! Every resolvable entity type gets one primary table keyed by the record's
//! source path, plus one satellite table per list-typed field. Satellite rows
//! are keyed by (parent key, sequence index) so element order survives.
//! A list field declared on a satellite's element type gets its own child
//! satellite, keyed by the parent row's key plus its own sequence index.
//!
//! Every declared field maps to a column: scalar fields to typed columns,
//! object/untyped fields to JSON text, list fields to their satellite.

use crate::error::{ExtractError, Result};
use crate::materializer::{Materialized, MaterializedObject};
use crate::registry::{FieldType, TypeRegistry};
use crate::value::{TypeTag, Value};
use demon_common::db::{is_safe_identifier, quote_ident, ColumnDefinition, ForeignKey, TableDefinition};
use std::collections::HashSet;

/// Columns present on every primary table
pub const FIXED_COLUMNS: [&str; 5] = ["source_path", "type_name", "is_valid", "materialize_status", "run_id"];

/// Element columns present on every satellite table, after the key columns
const SATELLITE_COLUMNS: [&str; 2] = ["type_name", "payload"];

/// Tables created by store initialization; entity tables must not reuse them
const RESERVED_TABLES: [&str; 5] = [
    "schema_version",
    "metadata",
    "ingest_runs",
    "ingest_failures",
    "template_locations",
];

/// Storage class of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    /// Serialized JSON text
    Json,
}

impl ColumnKind {
    fn for_field(field_type: &FieldType) -> ColumnKind {
        match field_type {
            FieldType::Bool | FieldType::Int => ColumnKind::Integer,
            FieldType::Float => ColumnKind::Real,
            FieldType::String => ColumnKind::Text,
            FieldType::Object(_) | FieldType::Any | FieldType::List(_) => ColumnKind::Json,
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text | ColumnKind::Json => "TEXT",
        }
    }

    /// Encode a materialized value for this column.
    ///
    /// A value that fell back to the wrong type is stored as JSON text
    /// rather than dropped.
    pub fn encode(&self, value: &Materialized) -> SqlValue {
        match (self, value) {
            (_, Materialized::Value(Value::Null)) => SqlValue::Null,
            (ColumnKind::Integer, Materialized::Value(Value::Int(i))) => SqlValue::Int(*i),
            (ColumnKind::Integer, Materialized::Value(Value::Bool(b))) => SqlValue::Int(i64::from(*b)),
            (ColumnKind::Real, Materialized::Value(Value::Float(f))) => SqlValue::Real(*f),
            (ColumnKind::Real, Materialized::Value(Value::Int(i))) => SqlValue::Real(*i as f64),
            (ColumnKind::Text, Materialized::Value(Value::Str(s))) => SqlValue::Text(s.clone()),
            (_, other) => SqlValue::Text(other.to_value().to_json().to_string()),
        }
    }
}

/// Bindable SQL value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

/// One declared field mapped to a column
#[derive(Debug, Clone, PartialEq)]
pub struct FieldColumn {
    pub field: String,
    pub column: String,
    pub kind: ColumnKind,
}

/// How satellite rows hold their element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementLayout {
    /// Scalar or untyped elements in a single `value` column
    Value(ColumnKind),
    /// Object elements spread over the element type's fields
    Object(Vec<FieldColumn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteLayout {
    pub field: String,
    pub table: TableDefinition,
    /// Row key, outermost first: `parent_key`, any `parent_seq*`, then `seq`
    pub key_columns: Vec<String>,
    pub element: ElementLayout,
    /// Satellites of list fields declared on the element type
    pub children: Vec<SatelliteLayout>,
    pub insert_sql: String,
}

impl SatelliteLayout {
    /// This satellite followed by its descendants, parents first
    pub fn with_descendants(&self) -> Vec<&SatelliteLayout> {
        let mut all = vec![self];
        for child in &self.children {
            all.extend(child.with_descendants());
        }
        all
    }

    /// Bind values for one element row, after the key columns
    pub fn row_values(&self, element: &Materialized) -> Vec<SqlValue> {
        let type_name = match element {
            Materialized::Object(obj) => SqlValue::Text(obj.type_name.clone()),
            _ => SqlValue::Null,
        };
        let payload = SqlValue::Text(element.to_value().to_json().to_string());
        let mut values = vec![type_name, payload];

        match &self.element {
            ElementLayout::Value(kind) => values.push(kind.encode(element)),
            ElementLayout::Object(columns) => {
                let obj = element.as_object();
                for column in columns {
                    let value = obj.and_then(|o| o.get(&column.field));
                    values.push(match value {
                        Some(v) => column.kind.encode(v),
                        None => SqlValue::Null,
                    });
                }
            }
        }
        values
    }
}

/// Primary table plus satellites for one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct EntityLayout {
    pub tag: TypeTag,
    pub type_name: String,
    pub table: TableDefinition,
    pub columns: Vec<FieldColumn>,
    pub satellites: Vec<SatelliteLayout>,
    pub insert_sql: String,
    pub delete_sql: String,
}

impl EntityLayout {
    /// Derive the layout of `tag` from its resolved field set
    pub fn derive(registry: &TypeRegistry, tag: TypeTag) -> Result<Self> {
        let type_name = registry
            .name_of(tag)
            .ok_or_else(|| ExtractError::Config(format!("type {} is not registered", tag)))?
            .to_string();
        let fields = registry
            .fields(tag)
            .ok_or_else(|| ExtractError::Config(format!("type {} has no resolved fields", tag)))?;

        let table_name = entity_table_name(registry, tag, &type_name);

        let mut table = TableDefinition::new(table_name.clone())
            .column(ColumnDefinition::new("source_path", "TEXT").primary_key())
            .column(ColumnDefinition::new("type_name", "TEXT").not_null().default("''"))
            .column(ColumnDefinition::new("is_valid", "INTEGER").not_null().default("1"))
            .column(ColumnDefinition::new("materialize_status", "TEXT").not_null().default("'complete'"))
            .column(ColumnDefinition::new("run_id", "TEXT"));

        let mut used: HashSet<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut columns = Vec::new();
        let mut satellites = Vec::new();

        for (field, decl) in fields {
            let column = column_name_for(field, &mut used);
            match &decl.field_type {
                FieldType::List(element) => {
                    let mut chain = vec![tag];
                    satellites.push(satellite_for(registry, &table_name, None, field, &column, element, &mut chain)?);
                }
                field_type => {
                    let kind = ColumnKind::for_field(field_type);
                    table = table.column(ColumnDefinition::new(column.clone(), kind.sql_type()));
                    columns.push(FieldColumn {
                        field: field.clone(),
                        column,
                        kind,
                    });
                }
            }
        }

        table.validate()?;

        let mut insert_columns: Vec<&str> = FIXED_COLUMNS.to_vec();
        insert_columns.extend(columns.iter().map(|c| c.column.as_str()));
        let insert_sql = insert_statement(&table_name, &insert_columns);
        let delete_sql = format!("DELETE FROM {} WHERE source_path = ?", quote_ident(&table_name));

        Ok(Self {
            tag,
            type_name,
            table,
            columns,
            satellites,
            insert_sql,
            delete_sql,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// Every satellite at any depth, parents before children
    pub fn all_satellites(&self) -> Vec<&SatelliteLayout> {
        self.satellites.iter().flat_map(|s| s.with_descendants()).collect()
    }

    /// Read-only view exposing only validated rows
    pub fn lookup_view_sql(&self) -> String {
        format!(
            "CREATE VIEW IF NOT EXISTS {} AS SELECT * FROM {} WHERE is_valid = 1",
            quote_ident(&format!("{}_lookup", self.table.name)),
            quote_ident(&self.table.name)
        )
    }

    /// Bind values for the primary row, in `insert_sql` order
    pub fn row_values(
        &self,
        source_path: &str,
        obj: &MaterializedObject,
        is_valid: bool,
        status: &str,
        run_id: &str,
    ) -> Vec<SqlValue> {
        let mut values = vec![
            SqlValue::Text(source_path.to_string()),
            SqlValue::Text(obj.type_name.clone()),
            SqlValue::Int(i64::from(is_valid)),
            SqlValue::Text(status.to_string()),
            SqlValue::Text(run_id.to_string()),
        ];
        for column in &self.columns {
            values.push(match obj.get(&column.field) {
                Some(value) => column.kind.encode(value),
                None => SqlValue::Null,
            });
        }
        values
    }
}

/// Satellite of one list field.
///
/// `parent_key` is the parent satellite's key, or `None` under the primary
/// table. `chain` holds the element types on the way down; a type already on
/// it keeps its list fields as JSON columns so recursive types terminate.
fn satellite_for(
    registry: &TypeRegistry,
    parent_table: &str,
    parent_key: Option<&[String]>,
    field: &str,
    column: &str,
    element_type: &FieldType,
    chain: &mut Vec<TypeTag>,
) -> Result<SatelliteLayout> {
    let name = format!("{}__{}", parent_table, column);

    let (references, parent_columns) = match parent_key {
        None => (vec!["parent_key".to_string()], vec!["source_path".to_string()]),
        Some(parent) => {
            let depth = parent.len() - 1;
            let mut references = parent[..depth].to_vec();
            references.push(if depth == 1 {
                "parent_seq".to_string()
            } else {
                format!("parent_seq_{}", depth)
            });
            (references, parent.to_vec())
        }
    };
    let mut key_columns = references.clone();
    key_columns.push("seq".to_string());

    let mut table = TableDefinition::new(name.clone());
    for key in &key_columns {
        let sql_type = if key == "parent_key" { "TEXT" } else { "INTEGER" };
        table = table.column(ColumnDefinition::new(key.clone(), sql_type).not_null());
    }
    table = table
        .column(ColumnDefinition::new("type_name", "TEXT"))
        .column(ColumnDefinition::new("payload", "TEXT"))
        .composite_key(key_columns.clone())
        .foreign_key(ForeignKey {
            columns: references,
            parent_table: parent_table.to_string(),
            parent_columns,
            on_delete_cascade: true,
        });

    let element_tag = match element_type {
        FieldType::Object(Some(type_name)) => registry.resolve_by_name(type_name),
        _ => None,
    };
    let element_fields = element_tag.and_then(|tag| registry.fields(tag));

    let mut children = Vec::new();
    let element = match (element_tag, element_fields) {
        (Some(element_tag), Some(fields)) => {
            let recursive = chain.contains(&element_tag);
            chain.push(element_tag);

            let mut used: HashSet<String> = key_columns
                .iter()
                .cloned()
                .chain(SATELLITE_COLUMNS.iter().map(|c| c.to_string()))
                .collect();
            let mut columns = Vec::new();
            for (field, decl) in fields {
                let column = column_name_for(field, &mut used);
                match &decl.field_type {
                    FieldType::List(nested) if !recursive => {
                        children.push(satellite_for(
                            registry,
                            &name,
                            Some(&key_columns),
                            field,
                            &column,
                            nested,
                            chain,
                        )?);
                    }
                    field_type => {
                        let kind = ColumnKind::for_field(field_type);
                        table = table.column(ColumnDefinition::new(column.clone(), kind.sql_type()));
                        columns.push(FieldColumn {
                            field: field.clone(),
                            column,
                            kind,
                        });
                    }
                }
            }

            chain.pop();
            ElementLayout::Object(columns)
        }
        _ => {
            let kind = ColumnKind::for_field(element_type);
            table = table.column(ColumnDefinition::new("value", kind.sql_type()));
            ElementLayout::Value(kind)
        }
    };

    table.validate()?;

    let mut insert_columns: Vec<&str> = key_columns.iter().map(String::as_str).collect();
    insert_columns.extend(SATELLITE_COLUMNS);
    match &element {
        ElementLayout::Value(_) => insert_columns.push("value"),
        ElementLayout::Object(columns) => insert_columns.extend(columns.iter().map(|c| c.column.as_str())),
    }
    let insert_sql = insert_statement(&name, &insert_columns);

    Ok(SatelliteLayout {
        field: field.to_string(),
        table,
        key_columns,
        element,
        children,
        insert_sql,
    })
}

/// Table name of one entity type.
///
/// Depends only on the registry: when several types share a name, the lowest
/// tag keeps it and the others take a `_<tag>` suffix, whatever order the
/// records arrive in.
fn entity_table_name(registry: &TypeRegistry, tag: TypeTag, type_name: &str) -> String {
    let name = table_name_for(type_name);
    let owner = registry
        .schemas()
        .filter(|schema| table_name_for(&schema.name) == name)
        .map(|schema| schema.tag)
        .min();
    match owner {
        Some(owner) if owner != tag => format!("{}_{}", name, tag),
        _ => name,
    }
}

fn insert_statement(table: &str, columns: &[&str]) -> String {
    let names = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", quote_ident(table), names, placeholders)
}

/// `SpellTemplate` → `spell_template`, `Point<int>` → `point_int`
pub fn table_name_for(type_name: &str) -> String {
    let mut name = snake_case(type_name);
    if name.is_empty() {
        name = "entity".to_string();
    }
    if !is_safe_identifier(&name) {
        name = format!("t_{}", name);
    }
    if RESERVED_TABLES.contains(&name.as_str()) || name.contains("__") || name.ends_with("_lookup") {
        name = format!("entity_{}", name.replace("__", "_"));
    }
    name
}

/// Sanitized, unique column name for a field
fn column_name_for(field: &str, used: &mut HashSet<String>) -> String {
    let mut base: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if base.is_empty() || !is_safe_identifier(&base) || used.contains(&base) {
        base = format!("f_{}", base);
    }

    let mut name = base.clone();
    let mut n = 2;
    // Same-case-insensitive names collide in SQLite
    while used.iter().any(|u| u.eq_ignore_ascii_case(&name)) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
