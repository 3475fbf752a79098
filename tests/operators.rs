// tests/operators.rs
mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder, pipeline_config};
use crate::common::{at, hour, init_tracing};

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use etldag::dag::DagGraph;
use etldag::operators::{
    ExecutorError, LoadOperator, NoopOperator, Operator, QualityOperator, SqlOperator,
    StageOperator, TaskContext, render_key,
};
use etldag::resources::{
    ConnectionHandle, MemoryWarehouse, ObjectStoreCredentials, ResolveError, ResourceRegistry,
};
use etldag::types::{LoadMode, OperatorKind};

type TestResult = Result<(), Box<dyn Error>>;

fn context(registry: ResourceRegistry, logical_date: DateTime<Utc>) -> TaskContext {
    TaskContext {
        task: "under_test".to_string(),
        run_id: 1,
        logical_date,
        attempt: 1,
        registry: Arc::new(registry),
        cancel: CancellationToken::new(),
    }
}

/// Registry with `warehouse` as `redshift` and static keys as `aws`.
fn registry(warehouse: &Arc<MemoryWarehouse>) -> ResourceRegistry {
    ResourceRegistry::new()
        .with("redshift", ConnectionHandle::Warehouse(warehouse.clone()))
        .with(
            "aws",
            ConnectionHandle::Credentials(ObjectStoreCredentials::new(
                "AKIAEXAMPLE",
                "s3cr3t",
                Some("us-west-2".to_string()),
            )),
        )
}

fn stage_events(key: &str) -> StageOperator {
    StageOperator {
        conn_id: "redshift".to_string(),
        credentials_id: "aws".to_string(),
        table: "staging_events".to_string(),
        s3_bucket: "udacity-dend".to_string(),
        s3_key: key.to_string(),
        extra_params: Some("format as json 's3://udacity-dend/log_json_path.json'".to_string()),
    }
}

#[test]
fn object_keys_render_logical_date_placeholders() {
    assert_eq!(
        render_key("log_data/{year}/{month}/{day}/{ds}", hour(5)),
        "log_data/2020/03/03/2020-03-03"
    );
    assert_eq!(render_key("events-{ts}.json", hour(5)), "events-2020-03-03T05:00:00Z.json");
    assert_eq!(render_key("song_data/{unknown}", hour(5)), "song_data/{unknown}");

    let op = StageOperator {
        s3_bucket: "udacity-dend/".to_string(),
        ..stage_events("/log_data/{ds}/")
    };
    assert_eq!(op.source_for(hour(5)), "s3://udacity-dend/log_data/2020-03-03/");
}

#[tokio::test]
async fn staging_is_idempotent_per_logical_date() -> TestResult {
    init_tracing();
    let wh = Arc::new(
        MemoryWarehouse::new()
            .with_table("staging_events", 0)
            .with_object("s3://udacity-dend/log_data/2020-03-03/a.json", 5)
            .with_object("s3://udacity-dend/log_data/2020-03-04/a.json", 9),
    );
    let op = stage_events("log_data/{ds}/");
    let ctx = context(registry(&wh), hour(5));

    assert_eq!(op.execute(&ctx).await?, 5);
    assert_eq!(op.execute(&ctx).await?, 5);
    assert_eq!(op.execute(&ctx).await?, 5);
    assert_eq!(wh.table_rows("staging_events"), Some(5));

    let next_day = context(registry(&wh), at(2020, 3, 4, 5, 0));
    assert_eq!(op.execute(&next_day).await?, 9);
    assert_eq!(wh.table_rows("staging_events"), Some(9));

    let executed = wh.executed();
    assert_eq!(executed.len(), 8);
    assert_eq!(executed[0], "TRUNCATE staging_events");
    assert!(executed[1].starts_with("COPY staging_events FROM 's3://udacity-dend/log_data/2020-03-03/'"));
    assert!(executed[1].ends_with("format as json 's3://udacity-dend/log_json_path.json'"));
    assert!(executed.iter().all(|s| !s.contains("s3cr3t")));
    Ok(())
}

#[tokio::test]
async fn fact_loads_append() -> TestResult {
    let wh = Arc::new(
        MemoryWarehouse::new()
            .with_table("staging_events", 4)
            .with_table("songplays", 0),
    );
    let op = LoadOperator::fact("redshift", "songplays", "SELECT ts FROM staging_events");
    let ctx = context(registry(&wh), hour(5));

    assert_eq!(op.kind(), OperatorKind::LoadFact);
    assert_eq!(op.mode(), LoadMode::Append);
    assert_eq!(op.execute(&ctx).await?, 4);
    assert_eq!(op.execute(&ctx).await?, 4);
    assert_eq!(wh.table_rows("songplays"), Some(8));
    Ok(())
}

#[tokio::test]
async fn dimension_loads_replace_by_default() -> TestResult {
    let wh = Arc::new(
        MemoryWarehouse::new()
            .with_table("staging_events", 4)
            .with_table("users", 10),
    );
    let ctx = context(registry(&wh), hour(5));

    let replace = LoadOperator::dimension("redshift", "users", "SELECT userid FROM staging_events");
    assert_eq!(replace.kind(), OperatorKind::LoadDimension);
    assert_eq!(replace.mode(), LoadMode::TruncateInsert);
    assert_eq!(replace.execute(&ctx).await?, 4);
    assert_eq!(replace.execute(&ctx).await?, 4);
    assert_eq!(wh.table_rows("users"), Some(4));
    assert_eq!(wh.executed()[0], "DELETE FROM users");

    let append = replace.with_mode(LoadMode::Append);
    append.execute(&ctx).await?;
    assert_eq!(wh.table_rows("users"), Some(8));
    Ok(())
}

#[tokio::test]
async fn empty_transformation_query_is_rejected() {
    let wh = Arc::new(MemoryWarehouse::new().with_table("users", 0));
    let op = LoadOperator::dimension("redshift", "users", "   ");

    let err = op.execute(&context(registry(&wh), hour(5))).await.unwrap_err();
    assert!(matches!(err, ExecutorError::InvalidParams(_)));
    assert!(wh.executed().is_empty());
}

#[tokio::test]
async fn sql_scripts_run_against_the_connection() -> TestResult {
    let wh = Arc::new(MemoryWarehouse::new());
    let op = SqlOperator::new(
        "redshift",
        "CREATE TABLE IF NOT EXISTS songplays (playid VARCHAR);\n\
         CREATE TABLE IF NOT EXISTS users (userid INT);",
    );
    let ctx = context(registry(&wh), hour(5));

    op.execute(&ctx).await?;
    op.execute(&ctx).await?;
    assert_eq!(
        wh.tables().into_keys().collect::<Vec<_>>(),
        vec!["songplays", "users"]
    );
    Ok(())
}

#[tokio::test]
async fn quality_passes_when_every_table_has_rows() -> TestResult {
    let wh = Arc::new(
        MemoryWarehouse::new()
            .with_table("songplays", 3)
            .with_table("users", 1),
    );
    let op = QualityOperator::new("redshift", vec!["songplays".into(), "users".into()]);

    assert_eq!(op.kind(), OperatorKind::DataQuality);
    assert_eq!(op.execute(&context(registry(&wh), hour(5))).await?, 0);
    Ok(())
}

#[tokio::test]
async fn quality_fails_on_the_first_empty_table() {
    let wh = Arc::new(
        MemoryWarehouse::new()
            .with_table("songplays", 3)
            .with_table("users", 0)
            .with_table("songs", 0),
    );
    let op = QualityOperator::new(
        "redshift",
        vec!["songplays".into(), "users".into(), "songs".into()],
    );

    let err = op.execute(&context(registry(&wh), hour(5))).await.unwrap_err();
    match &err {
        ExecutorError::QualityCheck { table, reason } => {
            assert_eq!(table, "users");
            assert_eq!(reason, "0 rows, expected at least 1");
        }
        other => panic!("expected a quality failure, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "data quality check failed for table users: 0 rows, expected at least 1"
    );
}

#[tokio::test]
async fn quality_threshold_and_template_are_configurable() {
    let wh = Arc::new(MemoryWarehouse::new().with_table("songplays", 5));
    let ctx = context(registry(&wh), hour(5));

    let strict = QualityOperator::new("redshift", vec!["songplays".into()]).with_min_rows(10);
    let err = strict.execute(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("5 rows, expected at least 10"));

    let custom = QualityOperator::new("redshift", vec!["songplays".into()])
        .with_sql_template("select count(*) from {} ;");
    assert!(custom.execute(&ctx).await.is_ok());

    let unsupported = QualityOperator::new("redshift", vec!["songplays".into()])
        .with_sql_template("SELECT MAX(ts) FROM {}");
    let err = unsupported.execute(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("unsupported statement"));

    let missing = QualityOperator::new("redshift", vec!["time".into()]);
    let err = missing.execute(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("relation \"time\" does not exist"));
}

#[tokio::test]
async fn unresolvable_connections_fail_the_attempt() {
    let wh = Arc::new(MemoryWarehouse::new().with_table("songplays", 1));
    let ctx = context(registry(&wh), hour(5));

    let missing = QualityOperator::new("warehouse_b", vec!["songplays".into()]);
    match missing.execute(&ctx).await.unwrap_err() {
        ExecutorError::Resolution(ResolveError::NotFound(id)) => assert_eq!(id, "warehouse_b"),
        other => panic!("expected NotFound, got {other:?}"),
    }

    let wrong_kind = QualityOperator::new("aws", vec!["songplays".into()]);
    match wrong_kind.execute(&ctx).await.unwrap_err() {
        ExecutorError::Resolution(ResolveError::WrongKind { id, expected, found }) => {
            assert_eq!(id, "aws");
            assert_eq!(expected, "warehouse");
            assert_eq!(found, "credentials");
        }
        other => panic!("expected WrongKind, got {other:?}"),
    }
}

#[tokio::test]
async fn credentials_come_from_the_environment_at_run_time() {
    let cfg = ConfigFileBuilder::new()
        .with_seeded_warehouse("redshift", &[("staging_events", 0)], &[])
        .with_credentials(
            "aws_credentials",
            "ETLDAG_OPERATORS_TEST_UNSET_KEY",
            "ETLDAG_OPERATORS_TEST_UNSET_SECRET",
        )
        .with_task("only", TaskConfigBuilder::noop().build())
        .build();
    let registry = ResourceRegistry::from_config(&cfg.connection).unwrap();
    assert!(registry.contains("aws_credentials"));

    let op = StageOperator {
        credentials_id: "aws_credentials".to_string(),
        ..stage_events("log_data/")
    };
    let err = op.execute(&context(registry, hour(5))).await.unwrap_err();
    match err {
        ExecutorError::Resolution(ResolveError::MissingSecret { id, var }) => {
            assert_eq!(id, "aws_credentials");
            assert_eq!(var, "ETLDAG_OPERATORS_TEST_UNSET_KEY");
        }
        other => panic!("expected MissingSecret, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_attempts_stop_before_touching_the_warehouse() {
    let wh = Arc::new(MemoryWarehouse::new().with_table("staging_events", 3));
    let ctx = context(registry(&wh), hour(5));
    ctx.cancel.cancel();

    assert!(matches!(NoopOperator.execute(&ctx).await, Err(ExecutorError::Cancelled)));
    let err = stage_events("log_data/").execute(&ctx).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Cancelled));
    assert_eq!(wh.table_rows("staging_events"), Some(3));
    assert!(wh.executed().is_empty());
}

#[test]
fn pipeline_tasks_get_operators_and_params_from_config() {
    let cfg = pipeline_config(10, 4).build();
    let graph = DagGraph::from_config(&cfg).unwrap();

    for name in graph.tasks() {
        let spec = graph.task(name).unwrap();
        assert_eq!(spec.operator.kind(), spec.kind, "{name}");
    }

    let stage = graph.task("stage_events").unwrap();
    assert_eq!(stage.kind, OperatorKind::StageToWarehouse);
    assert_eq!(stage.params["table"], "staging_events");
    assert_eq!(stage.params["s3_key"], "log_data/");
    assert_eq!(stage.params["credentials_id"], "aws_credentials");
    assert!(stage.params["extra_params"].contains("log_json_path.json"));

    let fact = graph.task("load_fact").unwrap();
    assert_eq!(fact.params["mode"], "append");
    assert_eq!(graph.task("load_dim_user").unwrap().params["mode"], "truncate_insert");

    let quality = graph.task("quality").unwrap();
    assert_eq!(quality.params["tables"], "songplays,users,songs,artists,time");
    assert_eq!(quality.retry.delay, std::time::Duration::from_secs(1));
}

#[test]
fn tasks_fall_back_to_the_default_connection() {
    let mut load = TaskConfigBuilder::load_dimension("unused", "users", "SELECT 1").build();
    load.conn_id = None;
    let cfg = ConfigFileBuilder::new()
        .with_warehouse("redshift")
        .default_conn_id("redshift")
        .with_task("users", load)
        .with_task(
            "explicit",
            TaskConfigBuilder::sql("other", "SELECT 1").build(),
        )
        .with_warehouse("other")
        .build();
    let graph = DagGraph::from_config(&cfg).unwrap();

    assert_eq!(graph.task("users").unwrap().params["conn_id"], "redshift");
    assert_eq!(graph.task("explicit").unwrap().params["conn_id"], "other");
}
