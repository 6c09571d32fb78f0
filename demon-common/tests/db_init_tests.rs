//! Store initialization tests
//!
//! - New store is created with its fixed tables and views
//! - Existing store reopens without error
//! - Location views aggregate committed rows

use demon_common::db::{init_database, set_metadata, get_metadata, SchemaIntrospector};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("r777820_spells.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");

    let pool = pool.unwrap();
    for table in ["schema_version", "metadata", "ingest_runs", "ingest_failures", "template_locations"] {
        assert!(
            SchemaIntrospector::table_exists(&pool, table).await.unwrap(),
            "missing table {}",
            table
        );
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("store.db");

    let pool1 = init_database(&db_path).await.unwrap();
    set_metadata(&pool1, "revision", "r777820").await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    assert_eq!(
        get_metadata(&pool2, "revision").await.unwrap(),
        Some("r777820".to_string())
    );
}

#[tokio::test]
async fn test_location_views() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("store.db")).await.unwrap();

    let rows = [
        (1_i64, "Decks/FireMobDeck.xml", "FireMobDeck", "deck", 1_i64),
        (2, "Spells/Fire/Meteor.xml", "Meteor", "spell", 1),
        (3, "", "", "other", 0),
    ];
    for (id, filename, stem, file_type, valid) in rows {
        sqlx::query(
            "INSERT INTO template_locations (template_id, filename, file_name, file_directory, file_type, is_valid)
             VALUES (?, ?, ?, '', ?, ?)",
        )
        .bind(id)
        .bind(filename)
        .bind(stem)
        .bind(file_type)
        .bind(valid)
        .execute(&pool)
        .await
        .unwrap();
    }

    let (total, valid, invalid): (i64, i64, i64) = sqlx::query_as(
        "SELECT total_templates, valid_templates, invalid_templates FROM validation_summary",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((total, valid, invalid), (3, 2, 1));

    let lookup: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM template_lookup")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(lookup, 2);

    let decks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deck_files")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(decks, 1);
}
