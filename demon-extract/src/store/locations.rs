//! Location index persistence
//!
//! Stores the records that own their id into `template_locations`. The
//! analytics views over that table are created with the store.

use crate::error::Result;
use crate::location::LocationIndex;
use sqlx::SqlitePool;
use tracing::info;

/// Upsert the index; returns the number of rows written
pub async fn write_locations(pool: &SqlitePool, index: &LocationIndex) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for record in index.unique_records() {
        sqlx::query(
            r#"
            INSERT INTO template_locations
                (template_id, filename, file_name, file_directory, file_type, category, deck_kind, is_valid)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(template_id) DO UPDATE SET
                filename = excluded.filename,
                file_name = excluded.file_name,
                file_directory = excluded.file_directory,
                file_type = excluded.file_type,
                category = excluded.category,
                deck_kind = excluded.deck_kind,
                is_valid = excluded.is_valid
            "#,
        )
        .bind(record.id)
        .bind(&record.path)
        .bind(&record.file_name)
        .bind(&record.directory)
        .bind(record.kind.as_str())
        .bind(record.category.map(|c| c.as_str()))
        .bind(record.deck_kind.map(|d| d.as_str()))
        .bind(record.is_valid)
        .execute(&mut *tx)
        .await?;
        written += 1;
    }

    tx.commit().await?;
    info!("Stored {} template locations", written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::DuplicatePolicy;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_write_locations_and_views() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        demon_common::db::init_schema(&pool).await.unwrap();

        let index = LocationIndex::build(
            vec![
                (1, "ObjectData/Decks/FireMobDeck.xml"),
                (2, "Spells/Ice/Frostbite.xml"),
                (2, "Spells/Ice/Blizzard.xml"),
                (3, ""),
            ],
            DuplicatePolicy::LastWriteWins,
        )
        .unwrap();

        assert_eq!(write_locations(&pool, &index).await.unwrap(), 3);
        // Idempotent
        assert_eq!(write_locations(&pool, &index).await.unwrap(), 3);

        let filename: String = sqlx::query_scalar("SELECT filename FROM template_lookup WHERE template_id = 2")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(filename, "Spells/Ice/Blizzard.xml");

        let (total, valid): (i64, i64) =
            sqlx::query_as("SELECT total_templates, valid_templates FROM validation_summary")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((total, valid), (3, 2));

        let deck_kind: String = sqlx::query_scalar("SELECT deck_kind FROM deck_files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(deck_kind, "mob");
    }
}
