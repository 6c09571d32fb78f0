//! Batch writer behaviour against an on-disk store

use demon_common::db::init_database;
use demon_extract::materializer::{MaterializeStatus, Materializer};
use demon_extract::pipeline::JobReport;
use demon_extract::report::{RunOutcome, RunReport};
use demon_extract::stats::RunStatistics;
use demon_extract::store::BatchWriter;
use demon_extract::{FieldDecl, FieldType, SchemaDefinition, TaggedRecord, TypeRegistry, Value};
use tempfile::TempDir;

fn registry() -> TypeRegistry {
    TypeRegistry::from_definitions(vec![SchemaDefinition::new(42, "class ItemTemplate")
        .with_field("m_id", FieldDecl::of(FieldType::Int))
        .with_field("m_name", FieldDecl::of(FieldType::String))])
}

fn item(id: i64) -> Value {
    TaggedRecord::with_tag(42)
        .field("m_id", Value::Int(id))
        .field("m_name", Value::from(format!("Item {}", id)))
        .into()
}

#[tokio::test]
async fn test_colliding_rows_are_reported_not_rolled_back() {
    let temp = TempDir::new().unwrap();
    let pool = init_database(&temp.path().join("items.db")).await.unwrap();
    let registry = registry();
    let materializer = Materializer::new(&registry);

    // First run stores ids 3 and 7
    let mut writer = BatchWriter::new(pool.clone(), &registry, "seed");
    for id in [3, 7] {
        let obj = materializer.materialize(&item(id)).into_object().unwrap();
        writer
            .write(&format!("ObjectData/Items/{}.xml", id), &obj, MaterializeStatus::Complete)
            .await
            .unwrap();
    }
    writer.finish().await.unwrap();

    // Second run writes ids 1..=10 with a small batch size
    let mut writer = BatchWriter::new(pool.clone(), &registry, "run").with_batch_size(4);
    for id in 1..=10 {
        let result = materializer.materialize(&item(id));
        writer
            .write(
                &format!("ObjectData/Items/{}.xml", id),
                result.object().unwrap(),
                result.status,
            )
            .await
            .unwrap();
    }
    let stats = writer.finish().await.unwrap();

    assert_eq!(stats.attempted, 10);
    assert_eq!(stats.committed, 8);
    assert_eq!(stats.failed, 2);
    let failed: Vec<&str> = stats.failures.iter().map(|f| f.source_path.as_str()).collect();
    assert_eq!(failed, vec!["ObjectData/Items/3.xml", "ObjectData/Items/7.xml"]);

    let from_run: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_template WHERE run_id = 'run'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(from_run, 8);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_template")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 10);

    let job = JobReport {
        job: "items".to_string(),
        run_id: "run".to_string(),
        listed: 10,
        considered: 10,
        materialize: RunStatistics {
            processed: 10,
            succeeded: 10,
            ..RunStatistics::default()
        },
        write: stats,
        cancelled: false,
    };
    let mut report = RunReport::new(Some("r1".into()), "items.db", false, 0.95);
    report.jobs.push(job);
    assert_eq!(report.outcome(), RunOutcome::SuccessWithWarnings);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("reopen.db");
    let registry = registry();

    {
        let pool = init_database(&db_path).await.unwrap();
        let obj = Materializer::new(&registry).materialize(&item(1)).into_object().unwrap();
        let mut writer = BatchWriter::new(pool.clone(), &registry, "first");
        writer.write("ObjectData/Items/1.xml", &obj, MaterializeStatus::Complete).await.unwrap();
        writer.finish().await.unwrap();
        pool.close().await;
    }

    // A newer type dump declares an extra field
    let newer = TypeRegistry::from_definitions(vec![SchemaDefinition::new(42, "class ItemTemplate")
        .with_field("m_id", FieldDecl::of(FieldType::Int))
        .with_field("m_name", FieldDecl::of(FieldType::String))
        .with_field("m_level", FieldDecl::new(FieldType::Int, Value::Int(5)))]);

    let pool = init_database(&db_path).await.unwrap();
    let obj = Materializer::new(&newer).materialize(&item(2)).into_object().unwrap();
    let mut writer = BatchWriter::new(pool.clone(), &newer, "second");
    writer.write("ObjectData/Items/2.xml", &obj, MaterializeStatus::Complete).await.unwrap();
    let stats = writer.finish().await.unwrap();
    assert_eq!(stats.committed, 1);

    let levels: Vec<Option<i64>> = sqlx::query_scalar("SELECT m_level FROM item_template ORDER BY source_path")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(levels, vec![None, Some(5)]);
}
