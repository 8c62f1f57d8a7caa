//! Integration tests against a live PostgreSQL (TimescaleDB optional).
//!
//! Connection comes from PGTS_TEST_HOST / _PORT / _USER / _PASSWORD / _DATABASE.
//! Run: `cargo test --test integration -- --ignored`

use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone};
use pgts::prelude::*;
use serde_json::json;
use uuid::Uuid;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn test_config() -> PoolConfig {
    PoolConfig::new(
        &env_or("PGTS_TEST_HOST", "localhost"),
        env_or("PGTS_TEST_PORT", "5432").parse().unwrap_or(5432),
        &env_or("PGTS_TEST_USER", "postgres"),
        &env_or("PGTS_TEST_DATABASE", "postgres"),
    )
    .password(&env_or("PGTS_TEST_PASSWORD", "postgres"))
    .max_connections(4)
    .acquire_timeout(Duration::from_secs(5))
}

async fn driver() -> Driver {
    Driver::connect(test_config()).await.expect("connect to test database")
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn at(secs: i64) -> NaiveDateTime {
    (t0() + chrono::Duration::seconds(secs)).naive_utc()
}

async fn drop_table(db: &Driver, table: &str) {
    db.exec(&format!("DROP TABLE IF EXISTS \"{}\"", table), &[])
        .await
        .expect("drop table");
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_insert_query_round_trip() -> DbResult<()> {
    let db = driver().await;
    let table = unique("roundtrip");
    let fields = vec![
        Field::new("Time", Datatype::Timestamp),
        Field::new("i", Datatype::Integer),
        Field::new("b", Datatype::Bigint),
        Field::new("r", Datatype::Real),
        Field::new("d", Datatype::Double),
        Field::new("t", Datatype::Text),
        Field::new("ok", Datatype::Boolean),
        Field::new("blob", Datatype::Blob),
        Field::new("j", Datatype::Json),
        Field::new("u", Datatype::Uuid),
    ];
    let id = Uuid::new_v4();
    let rows = Rows::new(table.clone())
        .with_fields(fields.clone())
        .row(vec![
            at(0).into(),
            1i32.into(),
            10_000_000_000i64.into(),
            1.5f32.into(),
            2.25f64.into(),
            "it's".into(),
            true.into(),
            vec![0u8, 1, 255].into(),
            json!({"k": [1, 2]}).into(),
            id.into(),
        ])
        .row(vec![
            at(10).into(),
            2i32.into(),
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
        ]);

    db.create_table(&rows, false, &[]).await?;
    db.insert(&rows, &[]).await?;

    let back = db
        .query(&format!("SELECT * FROM \"{}\" ORDER BY \"i\"", table), &[])
        .await?;
    assert_eq!(back.table_name, table);
    assert_eq!(back.fields, fields);
    assert_eq!(back.values, rows.values);

    let (i, t): (i32, Option<String>) = db
        .query_one(
            &format!("SELECT \"i\", \"t\" FROM \"{}\" WHERE \"i\" = $1::int", table),
            &[Value::Int(1)],
        )
        .await?;
    assert_eq!((i, t.as_deref()), (1, Some("it's")));

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_empty_result_keeps_fields() -> DbResult<()> {
    let db = driver().await;
    let rows = db
        .query("SELECT 1::int AS one, 'x'::text AS two WHERE false", &[])
        .await?;
    assert!(rows.is_empty());
    assert_eq!(
        rows.fields,
        vec![Field::new("one", Datatype::Integer), Field::new("two", Datatype::Text)]
    );

    let missing = db.query_one::<(i32,)>("SELECT 1::int WHERE false", &[]).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_upsert_is_idempotent() -> DbResult<()> {
    let db = driver().await;
    let table = unique("tags");
    let rows = Rows::new(table.clone())
        .field(Field::new("name", Datatype::Text))
        .field(Field::new("value", Datatype::Double))
        .row(vec!["pump".into(), 1.0f64.into()]);
    db.create_table(&rows, false, &["name".to_string()]).await?;

    db.upsert(&rows, "name").await?;
    let updated = Rows {
        values: vec![vec!["pump".into(), 2.0f64.into()]],
        ..rows.clone()
    };
    db.upsert(&updated, "name").await?;
    db.upsert(&updated, "name").await?;

    let all: Vec<(String, f64)> = db
        .query_as(&format!("SELECT \"name\", \"value\" FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(all, vec![("pump".to_string(), 2.0)]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_update_and_delete() -> DbResult<()> {
    let db = driver().await;
    let table = unique("users");
    let rows = Rows::new(table.clone())
        .field(Field::new("id", Datatype::Integer))
        .field(Field::new("name", Datatype::Text))
        .row(vec![1i32.into(), "ada".into()])
        .row(vec![2i32.into(), "bob".into()]);
    db.create_table(&rows, false, &["id".to_string()]).await?;
    db.insert(&rows, &[]).await?;

    let req = UpdateRequest::new(table.clone(), Filter::eq("id", 1i32)).set("name", "O'Neil");
    assert_eq!(db.update(&req).await?, 1);
    assert_eq!(db.delete_by_id(&table, 2i32).await?, 1);
    assert_eq!(db.delete(&table, "name", "nobody").await?, 0);

    let left: Vec<(i32, String)> = db
        .query_as(&format!("SELECT \"id\", \"name\" FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(left, vec![(1, "O'Neil".to_string())]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_transaction_rollback_and_batch() -> DbResult<()> {
    let db = driver().await;
    let table = unique("events");
    let rows = Rows::new(table.clone())
        .field(Field::new("id", Datatype::Integer))
        .row(vec![1i32.into()]);
    db.create_table(&rows, false, &[]).await?;

    let mut tx = db.create_transaction().await?;
    db.insert_tx(&mut tx, &rows, &[]).await?;
    let inside = db
        .query_tx(&mut tx, &format!("SELECT count(*) FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(inside.values, vec![vec![Value::BigInt(1)]]);
    db.rollback(tx).await?;

    let mut batch = Batch::new();
    batch
        .push(format!("SELECT count(*) FROM \"{}\"", table))
        .push_with("SELECT $1::text AS label", vec!["second".into()]);
    let results = db.batch_query(&batch).await?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].values, vec![vec![Value::BigInt(0)]]);
    assert_eq!(results[1].values, vec![vec![Value::Text("second".into())]]);

    let counts = db
        .batch_exec(&Batch::with_args(
            &[format!("INSERT INTO \"{}\" VALUES ($1::int)", table)],
            &[vec![Value::Int(9)]],
        ))
        .await?;
    assert_eq!(counts, vec![1]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_copy_bulk_load() -> DbResult<()> {
    let db = driver().await;
    let table = unique("bulk");
    let mut rows = Rows::new(table.clone())
        .field(Field::new("Time", Datatype::Timestamp))
        .field(Field::new("note", Datatype::Text))
        .field(Field::new("v", Datatype::Double));
    for i in 0..1000 {
        rows.push(vec![at(i).into(), format!("line\t{}", i).into(), (i as f64).into()]);
    }
    rows.push(vec![at(1000).into(), Value::Null, f64::NAN.into()]);
    db.create_table(&rows, false, &[]).await?;

    assert_eq!(db.copy(&rows).await?, 1001);
    let (n,): (i64,) = db
        .query_one(&format!("SELECT count(*) FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(n, 1001);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_retention_on_plain_table() -> DbResult<()> {
    let db = driver().await;
    let table = unique("plain");
    let old = (Utc::now() - chrono::Duration::days(10)).naive_utc();
    let fresh = (Utc::now() - chrono::Duration::days(1)).naive_utc();
    let rows = Rows::new(table.clone())
        .field(Field::new("Time", Datatype::Timestamp))
        .field(Field::new("v", Datatype::Double))
        .row(vec![old.into(), 1.0f64.into()])
        .row(vec![fresh.into(), 2.0f64.into()]);
    db.create_table(&rows, false, &[]).await?;
    db.insert(&rows, &[]).await?;

    assert_eq!(db.delete_values_from_interval(&table, 7).await?, 1);
    let left: Vec<(f64,)> = db
        .query_as(&format!("SELECT \"v\" FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(left, vec![(2.0,)]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a TimescaleDB server - run with --ignored"]
async fn test_downsample_and_interpolate() -> DbResult<()> {
    let db = driver().await;
    if !db.has_timescale().await? {
        eprintln!("timescaledb not installed, skipping");
        return Ok(());
    }
    let table = unique("readings");
    let rows = Rows::new(table.clone())
        .field(Field::new("Time", Datatype::Timestamp))
        .field(Field::new("temp", Datatype::Double))
        .row(vec![at(0).into(), 10.0f64.into()])
        .row(vec![at(10).into(), 12.0f64.into()])
        .row(vec![at(30).into(), f64::NAN.into()]);
    db.create_table(&rows, true, &[]).await?;
    assert!(db.is_hypertable(&table).await?);
    db.insert(&rows, &[]).await?;

    let end = t0() + chrono::Duration::seconds(30);
    let first = db.get_down_sampled_values(&["temp"], &table, &t0(), &end, 10).await?;
    let again = db.get_down_sampled_values(&["temp"], &table, &t0(), &end, 10).await?;
    assert_eq!(first.len(), 1);
    let buckets = &first[0];
    assert_eq!(buckets.len(), 3);
    assert_eq!(buckets.values[0][0], Value::Timestamp(at(30)));
    assert!(f64::from_value(&buckets.values[0][1])?.is_nan());
    assert_eq!(buckets.values[1][1], Value::Double(12.0));
    assert_eq!(buckets.values[2][1], Value::Double(10.0));
    // NaN != NaN, so compare the finite buckets and the bucket keys.
    assert_eq!(again[0].values[1..], buckets.values[1..]);
    assert_eq!(again[0].values[0][0], buckets.values[0][0]);

    let filled = db.get_interpolated_values(&["temp"], &table, &t0(), &end, 10).await?;
    let gap = filled[0]
        .values
        .iter()
        .find(|row| row[0] == Value::Timestamp(at(20)))
        .expect("gap bucket present");
    assert_eq!(gap[1], Value::Double(12.0));

    let latest = db.get_latest_value(&["temp"], &table).await?;
    assert_eq!(latest[0].values[0][0], Value::Timestamp(at(30)));

    let counts = db
        .get_historian_aggr_count(&["temp"], &table, &t0(), &end, false, None, 60)
        .await?;
    assert_eq!(counts[0].values, vec![vec![Value::Timestamp(at(0)), Value::BigInt(2)]]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_pool_acquire_times_out() -> DbResult<()> {
    let db = Driver::connect(
        test_config()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(1)),
    )
    .await?;
    let held = db.create_transaction().await?;

    let started = std::time::Instant::now();
    let err = db.query("SELECT 1", &[]).await.unwrap_err();
    assert!(err.is_connection(), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_secs(5));

    db.rollback(held).await?;
    db.query("SELECT 1", &[]).await?;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_reset_and_stat() -> DbResult<()> {
    let db = driver().await;
    db.query("SELECT 1", &[]).await?;
    let before = db.stat();
    assert_eq!(before.max_connections, 4);
    assert!(before.current_connections >= 1);

    db.reset().await;
    assert_eq!(db.stat().available_connections, 0);
    db.query("SELECT 1", &[]).await?;

    db.close().await;
    assert!(db.is_closed());
    assert!(db.query("SELECT 1", &[]).await.unwrap_err().is_connection());
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_bulk_insert_above_bind_limit() -> DbResult<()> {
    let db = driver().await;
    let table = unique("wide");
    let mut rows = Rows::new(table.clone()).field(Field::new("x", Datatype::Integer));
    for i in 0..70_000 {
        rows.push(vec![Value::Int(i)]);
    }
    db.create_table(&rows, false, &["x".to_string()]).await?;

    db.insert(&rows, &[]).await?;
    let (n,): (i64,) = db
        .query_one(&format!("SELECT count(*) FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(n, 70_000);

    // Every key collides and there is no other column to update.
    assert_eq!(db.upsert(&rows, "x").await?, 0);

    db.exec(&format!("TRUNCATE \"{}\"", table), &[]).await?;
    let returned = db.insert(&rows, &[Field::new("x", Datatype::Integer)]).await?;
    assert_eq!(returned.len(), 70_000);
    assert_eq!(returned.fields, vec![Field::new("x", Datatype::Integer)]);
    assert_eq!(returned.values[69_999], vec![Value::Int(69_999)]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_null_parameter_into_typed_column() -> DbResult<()> {
    let db = driver().await;
    let table = unique("nullable");
    db.exec(&format!("CREATE TABLE \"{}\" (x int, t timestamp)", table), &[])
        .await?;

    let insert = format!("INSERT INTO \"{}\" (x, t) VALUES ($1, $2)", table);
    assert_eq!(db.exec(&insert, &[Value::Null, Value::Null]).await?, 1);
    let counts = db
        .batch_exec(&Batch::with_args(
            &[insert.clone(), insert.clone()],
            &[vec![Value::Null, Value::Null], vec![Value::Int(3), Value::Null]],
        ))
        .await?;
    assert_eq!(counts, vec![1, 1]);

    let (nulls,): (i64,) = db
        .query_one(&format!("SELECT count(*) FROM \"{}\" WHERE x IS NULL", table), &[])
        .await?;
    assert_eq!(nulls, 2);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_rename_refreshes_table_name() -> DbResult<()> {
    let db = driver().await;
    let before = unique("before");
    let after = unique("after");
    db.exec(&format!("CREATE TABLE \"{}\" (x int)", before), &[]).await?;

    let rows = db.query(&format!("SELECT x FROM \"{}\"", before), &[]).await?;
    assert_eq!(rows.table_name, before);

    db.exec(&format!("ALTER TABLE \"{}\" RENAME TO \"{}\"", before, after), &[])
        .await?;
    let rows = db.query(&format!("SELECT x FROM \"{}\"", after), &[]).await?;
    assert_eq!(rows.table_name, after);

    drop_table(&db, &after).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a TimescaleDB server - run with --ignored"]
async fn test_hypertable_retention_drops_chunks() -> DbResult<()> {
    let db = driver().await;
    if !db.has_timescale().await? {
        eprintln!("timescaledb not installed, skipping");
        return Ok(());
    }
    let table = unique("history");
    let days_ago = |d: i64| (Utc::now() - chrono::Duration::days(d)).naive_utc();
    let rows = Rows::new(table.clone())
        .field(Field::new("Time", Datatype::Timestamp))
        .field(Field::new("v", Datatype::Double))
        .row(vec![days_ago(20).into(), 1.0f64.into()])
        .row(vec![days_ago(15).into(), 2.0f64.into()])
        .row(vec![days_ago(1).into(), 3.0f64.into()]);
    db.create_table(&rows, true, &[]).await?;
    assert!(db.get_hypertables_name().await?.contains(&table));
    db.insert(&rows, &[]).await?;

    assert_eq!(db.delete_values_from_interval(&table, 7).await?, 2);
    let left: Vec<(f64,)> = db
        .query_as(&format!("SELECT \"v\" FROM \"{}\"", table), &[])
        .await?;
    assert_eq!(left, vec![(3.0,)]);

    drop_table(&db, &table).await;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a TimescaleDB server - run with --ignored"]
async fn test_hypertable_in_named_schema() -> DbResult<()> {
    let db = driver().await;
    if !db.has_timescale().await? {
        eprintln!("timescaledb not installed, skipping");
        return Ok(());
    }
    let schema = unique("metrics");
    db.exec(&format!("CREATE SCHEMA \"{}\"", schema), &[]).await?;
    let rows = Rows::new("readings")
        .schema(schema.clone())
        .field(Field::new("Time", Datatype::Timestamp))
        .field(Field::new("temp", Datatype::Double));
    db.create_table(&rows, true, &[]).await?;

    let (n,): (i64,) = db
        .query_one(
            "SELECT count(*) FROM timescaledb_information.hypertables \
             WHERE hypertable_schema = $1 AND hypertable_name = $2",
            &[Value::from(schema.as_str()), Value::from("readings")],
        )
        .await?;
    assert_eq!(n, 1);

    db.exec(&format!("DROP SCHEMA \"{}\" CASCADE", schema), &[]).await?;
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a PostgreSQL server - run with --ignored"]
async fn test_reset_ticker_closes_idle_connections() -> DbResult<()> {
    let db = Driver::connect(test_config().reset_interval(Duration::from_millis(300))).await?;
    db.query("SELECT 1", &[]).await?;
    assert!(db.stat().current_connections >= 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let stat = db.stat();
    assert_eq!(stat.available_connections, 0);
    assert_eq!(stat.current_connections, 0);

    // close() must not wait for the next tick.
    tokio::time::timeout(Duration::from_secs(2), db.close())
        .await
        .expect("close stops the reset ticker");
    assert!(db.is_closed());
    Ok(())
}
