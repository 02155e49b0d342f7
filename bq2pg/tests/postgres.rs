//! Runs the Postgres destination against a local Postgres instance, see
//! [`common::database::local_pg_connection_config`].

use bq2pg::destination::{Destination, DestinationConnector};
use bq2pg::types::{Cell, ColumnSchema, ColumnType, TableRow, TableSnapshot};
use bq2pg_telemetry::init_test_tracing;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Row};

use crate::common::database::{
    connect_to_database, drop_pg_database, local_connector, local_pg_connection_config,
    random_database_name,
};

mod common;

const TABLE_NAME: &str = "every_type";

fn every_type_snapshot() -> TableSnapshot {
    let column_schemas = vec![
        ColumnSchema::new("id", ColumnType::Int64, false),
        ColumnSchema::new("bool", ColumnType::Bool, true),
        ColumnSchema::new("int64", ColumnType::Int64, true),
        ColumnSchema::new("float64", ColumnType::Float64, true),
        ColumnSchema::new("numeric", ColumnType::Numeric, true),
        ColumnSchema::new("string", ColumnType::String, true),
        ColumnSchema::new("bytes", ColumnType::Bytes, true),
        ColumnSchema::new("date", ColumnType::Date, true),
        ColumnSchema::new("time", ColumnType::Time, true),
        ColumnSchema::new("datetime", ColumnType::DateTime, true),
        ColumnSchema::new("timestamp", ColumnType::Timestamp, true),
        ColumnSchema::new("json", ColumnType::Json, true),
    ];

    let full_row = TableRow::new(vec![
        Cell::I64(1),
        Cell::Bool(true),
        Cell::I64(-7),
        Cell::F64(1.5),
        Cell::Numeric("12345678901234567890.123456789".to_owned()),
        Cell::String("héllo".to_owned()),
        Cell::Bytes(vec![0, 1, 255]),
        Cell::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        Cell::Time(NaiveTime::from_hms_milli_opt(13, 45, 10, 250).unwrap()),
        Cell::DateTime(sample_datetime()),
        Cell::Timestamp(sample_timestamp()),
        Cell::Json(json!({"a": [1, 2]})),
    ]);

    let mut null_cells = vec![Cell::I64(2)];
    null_cells.extend(std::iter::repeat_n(Cell::Null, column_schemas.len() - 1));

    TableSnapshot::new(TABLE_NAME, column_schemas)
        .with_rows(vec![full_row, TableRow::new(null_cells)])
}

fn sample_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap()
}

fn sample_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn row_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar(&format!(r#"select count(*) from "{TABLE_NAME}""#))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn ensure_database_creates_once() {
    init_test_tracing();

    let config = local_pg_connection_config();
    let connector = local_connector(&config);
    let database_name = random_database_name();

    assert!(connector.ensure_database(&database_name).await.unwrap());
    assert!(!connector.ensure_database(&database_name).await.unwrap());

    drop_pg_database(&config, &database_name).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_fails_for_missing_database() {
    init_test_tracing();

    let config = local_pg_connection_config();
    let connector = local_connector(&config);

    assert!(connector.connect(&random_database_name()).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_with_every_column_type_is_written() {
    init_test_tracing();

    let config = local_pg_connection_config();
    let connector = local_connector(&config);
    let database_name = random_database_name();
    connector.ensure_database(&database_name).await.unwrap();

    let destination = connector.connect(&database_name).await.unwrap();
    destination.drop_table(TABLE_NAME).await.unwrap();
    destination.write_snapshot(&every_type_snapshot()).await.unwrap();
    destination.close().await;

    let pool = connect_to_database(&config, &database_name).await;

    let column_types: Vec<String> = sqlx::query_scalar(
        "select data_type::text from information_schema.columns where table_name = $1 order by ordinal_position",
    )
    .bind(TABLE_NAME)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        column_types,
        vec![
            "bigint",
            "boolean",
            "bigint",
            "double precision",
            "numeric",
            "text",
            "bytea",
            "date",
            "time without time zone",
            "timestamp without time zone",
            "timestamp with time zone",
            "jsonb",
        ]
    );

    let row = sqlx::query(&format!(
        r#"select "bool", "int64", "float64", "numeric"::text, "string", "bytes", "date", "time",
        "datetime", "timestamp", "json" from "{TABLE_NAME}" where "id" = 1"#
    ))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(row.get::<bool, _>(0));
    assert_eq!(row.get::<i64, _>(1), -7);
    assert_eq!(row.get::<f64, _>(2), 1.5);
    assert_eq!(row.get::<String, _>(3), "12345678901234567890.123456789");
    assert_eq!(row.get::<String, _>(4), "héllo");
    assert_eq!(row.get::<Vec<u8>, _>(5), vec![0, 1, 255]);
    assert_eq!(
        row.get::<NaiveDate, _>(6),
        NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
    );
    assert_eq!(
        row.get::<NaiveTime, _>(7),
        NaiveTime::from_hms_milli_opt(13, 45, 10, 250).unwrap()
    );
    assert_eq!(row.get::<NaiveDateTime, _>(8), sample_datetime());
    assert_eq!(row.get::<DateTime<Utc>, _>(9), sample_timestamp());
    assert_eq!(row.get::<serde_json::Value, _>(10), json!({"a": [1, 2]}));

    let nulls: i32 = sqlx::query_scalar(&format!(
        r#"select num_nulls("bool", "int64", "float64", "numeric", "string", "bytes", "date",
        "time", "datetime", "timestamp", "json") from "{TABLE_NAME}" where "id" = 2"#
    ))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(nulls, 11);

    pool.close().await;
    drop_pg_database(&config, &database_name).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_a_copy_replaces_the_table() {
    init_test_tracing();

    let config = local_pg_connection_config();
    let connector = local_connector(&config);
    let database_name = random_database_name();
    let snapshot = every_type_snapshot();

    for _ in 0..2 {
        connector.ensure_database(&database_name).await.unwrap();

        let destination = connector.connect(&database_name).await.unwrap();
        destination.drop_table(TABLE_NAME).await.unwrap();
        destination.write_snapshot(&snapshot).await.unwrap();
        destination.close().await;
    }

    let pool = connect_to_database(&config, &database_name).await;
    assert_eq!(row_count(&pool).await, 2);

    pool.close().await;
    drop_pg_database(&config, &database_name).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_leaves_no_table_behind() {
    init_test_tracing();

    let config = local_pg_connection_config();
    let connector = local_connector(&config);
    let database_name = random_database_name();
    connector.ensure_database(&database_name).await.unwrap();

    // The second row violates the not null constraint of "id", so the whole table is rolled
    // back.
    let snapshot = TableSnapshot::new(
        TABLE_NAME,
        vec![ColumnSchema::new("id", ColumnType::Int64, false)],
    )
    .with_rows(vec![
        TableRow::new(vec![Cell::I64(1)]),
        TableRow::new(vec![Cell::Null]),
    ]);

    let destination = connector.connect(&database_name).await.unwrap();
    assert!(destination.write_snapshot(&snapshot).await.is_err());
    destination.close().await;

    let pool = connect_to_database(&config, &database_name).await;
    let exists: bool = sqlx::query_scalar("select to_regclass($1) is not null")
        .bind(TABLE_NAME)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!exists);

    pool.close().await;
    drop_pg_database(&config, &database_name).await;
}
