//! Table definitions and schema synchronization
//!
//! Entity tables are derived at runtime from the type registry, so their
//! shape is described by a [`TableDefinition`] value rather than hand-written
//! DDL. Startup is two-phase:
//! 1. **CREATE TABLE IF NOT EXISTS** from the definition
//! 2. **Sync** - add columns the definition declares but the store lacks
//!
//! A store written against an older schema dump therefore gains columns for
//! newly declared fields instead of failing on insert.

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// Single-column PRIMARY KEY
    pub primary_key: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// DEFAULT value (SQL literal)
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn ddl(&self, inline_pk: bool) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if inline_pk && self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Foreign key from one or more local columns to a parent table
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub parent_table: String,
    pub parent_columns: Vec<String>,
    pub on_delete_cascade: bool,
}

/// Declarative shape of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    /// Column order is preserved in CREATE TABLE
    pub columns: Vec<ColumnDefinition>,
    /// Composite primary key; when empty, column-level `primary_key` flags apply
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn composite_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Check every identifier before any of them reaches SQL text
    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.name)?;
        for column in &self.columns {
            check_identifier(&column.name)?;
        }
        for key in &self.primary_key {
            if !self.has_column(key) {
                return Err(Error::InvalidInput(format!(
                    "Primary key column '{}' not declared on table '{}'",
                    key, self.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            check_identifier(&fk.parent_table)?;
            for col in fk.columns.iter().chain(fk.parent_columns.iter()) {
                check_identifier(col)?;
            }
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this definition
    pub fn create_sql(&self) -> String {
        let inline_pk = self.primary_key.is_empty();
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.ddl(inline_pk)).collect();

        if !inline_pk {
            parts.push(format!("PRIMARY KEY ({})", join_idents(&self.primary_key)));
        }

        for fk in &self.foreign_keys {
            let mut clause = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                join_idents(&fk.columns),
                quote_ident(&fk.parent_table),
                join_idents(&fk.parent_columns)
            );
            if fk.on_delete_cascade {
                clause.push_str(" ON DELETE CASCADE");
            }
            parts.push(clause);
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        )
    }
}

/// Accept only `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(name: &str) -> Result<()> {
    if is_safe_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Unsafe SQL identifier '{}'", name)))
    }
}

/// Double-quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn join_idents(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Actual column from PRAGMA table_info
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// Position in the primary key (0 = not part of it)
    pub pk: i32,
}

/// Difference between a definition and the store
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Column missing from the store (fixable)
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type differs (needs a manual migration)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
}

pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Columns in store order (by cid)
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        check_identifier(table_name)?;
        let query = format!("PRAGMA table_info({})", quote_ident(table_name));
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get("pk"),
            })
            .collect();

        columns.sort_by_key(|c| c.cid);
        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(table: &TableDefinition, actual: &[ActualColumn]) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected in &table.columns {
            match actual.iter().find(|c| c.name.eq_ignore_ascii_case(&expected.name)) {
                Some(found) => {
                    if !Self::types_compatible(&expected.sql_type, &found.type_name) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table.name.clone(),
                            column: expected.name.clone(),
                            expected: expected.sql_type.clone(),
                            actual: found.type_name.clone(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table.name.clone(),
                    column: expected.clone(),
                }),
            }
        }

        drift
    }

    /// SQLite type affinity comparison
    fn types_compatible(expected: &str, actual: &str) -> bool {
        fn affinity(sql_type: &str) -> &'static str {
            let t = sql_type.to_uppercase();
            if t.contains("INT") {
                "INTEGER"
            } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
                "TEXT"
            } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
                "REAL"
            } else if t.is_empty() || t.contains("BLOB") {
                "BLOB"
            } else {
                "NUMERIC"
            }
        }

        affinity(expected) == affinity(actual)
    }
}

pub struct SchemaSync;

impl SchemaSync {
    /// Create the table if needed, then add any missing columns.
    ///
    /// Type mismatches are logged and left alone; SQLite cannot alter a
    /// column type in place.
    pub async fn ensure_table(pool: &SqlitePool, table: &TableDefinition) -> Result<()> {
        table.validate()?;

        let existed = SchemaIntrospector::table_exists(pool, &table.name).await?;
        sqlx::query(&table.create_sql()).execute(pool).await?;

        if !existed {
            debug!("Created table '{}'", table.name);
            return Ok(());
        }

        Self::sync_table(pool, table).await
    }

    pub async fn sync_table(pool: &SqlitePool, table: &TableDefinition) -> Result<()> {
        let actual = SchemaIntrospector::introspect_table(pool, &table.name).await?;
        let drift = SchemaDiff::compare(table, &actual);

        if drift.is_empty() {
            debug!("Schema up to date for '{}'", table.name);
            return Ok(());
        }

        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'. Rebuild the store to change it.",
                        table, column, expected, actual
                    );
                }
            }
        }

        Ok(())
    }

    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(&column.name),
            column.sql_type
        );

        // ALTER TABLE cannot add PRIMARY KEY or UNIQUE columns, and NOT NULL needs a default
        if column.primary_key || column.unique {
            warn!(
                "Cannot add key constraint on {}.{} via ALTER TABLE; adding plain column",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Cannot add NOT NULL column {}.{} without DEFAULT; column will be nullable",
                table, column.name
            ),
            (None, false) => {}
        }

        info!("Adding column {}.{} ({})", table, column.name, column.sql_type);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                debug!("Column {}.{} already present", table, column.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn spells_table() -> TableDefinition {
        TableDefinition::new("spell_template")
            .column(ColumnDefinition::new("source_path", "TEXT").primary_key())
            .column(ColumnDefinition::new("m_name", "TEXT"))
            .column(ColumnDefinition::new("m_accuracy", "INTEGER").not_null().default("0"))
    }

    #[test]
    fn test_identifier_checks() {
        assert!(is_safe_identifier("m_spellEffects"));
        assert!(is_safe_identifier("_private"));
        assert!(!is_safe_identifier("1abc"));
        assert!(!is_safe_identifier("name; DROP TABLE x"));
        assert!(!is_safe_identifier(""));
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_sql_composite_key() {
        let satellite = TableDefinition::new("spell_template__m_effects")
            .column(ColumnDefinition::new("parent_key", "TEXT").not_null())
            .column(ColumnDefinition::new("seq", "INTEGER").not_null())
            .composite_key(["parent_key", "seq"])
            .foreign_key(ForeignKey {
                columns: vec!["parent_key".to_string()],
                parent_table: "spell_template".to_string(),
                parent_columns: vec!["source_path".to_string()],
                on_delete_cascade: true,
            });

        let sql = satellite.create_sql();
        assert!(sql.contains("PRIMARY KEY (\"parent_key\", \"seq\")"));
        assert!(sql.contains("REFERENCES \"spell_template\" (\"source_path\") ON DELETE CASCADE"));
        assert!(!sql.contains("\"parent_key\" TEXT PRIMARY KEY"));
    }

    #[test]
    fn test_validate_rejects_undeclared_key() {
        let table = TableDefinition::new("t")
            .column(ColumnDefinition::new("a", "TEXT"))
            .composite_key(["a", "b"]);
        assert!(table.validate().is_err());

        let table = TableDefinition::new("bad-name");
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_types_compatible() {
        assert!(SchemaDiff::types_compatible("TEXT", "TEXT"));
        assert!(SchemaDiff::types_compatible("integer", "INT"));
        assert!(SchemaDiff::types_compatible("TEXT", "VARCHAR(20)"));
        assert!(SchemaDiff::types_compatible("REAL", "DOUBLE"));
        assert!(!SchemaDiff::types_compatible("TEXT", "INTEGER"));
        assert!(!SchemaDiff::types_compatible("REAL", "TEXT"));
    }

    #[tokio::test]
    async fn test_ensure_table_creates_then_adds_columns() {
        let pool = setup_test_db().await;

        let original = TableDefinition::new("spell_template")
            .column(ColumnDefinition::new("source_path", "TEXT").primary_key())
            .column(ColumnDefinition::new("m_name", "TEXT"));
        SchemaSync::ensure_table(&pool, &original).await.unwrap();

        // A newer schema dump declares one more field
        SchemaSync::ensure_table(&pool, &spells_table()).await.unwrap();

        let columns = SchemaIntrospector::introspect_table(&pool, "spell_template")
            .await
            .unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].pk, 1);
        assert_eq!(columns[2].name, "m_accuracy");
        assert!(columns[2].not_null);
        assert_eq!(columns[2].default_value, Some("0".to_string()));
    }

    #[tokio::test]
    async fn test_detect_type_mismatch() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE spell_template (source_path TEXT PRIMARY KEY, m_name INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        let actual = SchemaIntrospector::introspect_table(&pool, "spell_template")
            .await
            .unwrap();
        let drift = SchemaDiff::compare(&spells_table(), &actual);

        assert_eq!(drift.len(), 2);
        assert!(drift.iter().any(|d| matches!(
            d,
            SchemaDrift::TypeMismatch { column, .. } if column == "m_name"
        )));
        assert!(drift.iter().any(|d| matches!(
            d,
            SchemaDrift::MissingColumn { column, .. } if column.name == "m_accuracy"
        )));
    }

    #[tokio::test]
    async fn test_table_exists() {
        let pool = setup_test_db().await;
        assert!(!SchemaIntrospector::table_exists(&pool, "spell_template").await.unwrap());
        SchemaSync::ensure_table(&pool, &spells_table()).await.unwrap();
        assert!(SchemaIntrospector::table_exists(&pool, "spell_template").await.unwrap());
    }
}
