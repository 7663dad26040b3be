use std::path::Path;

use tabula_connector::AdapterKind;
use tabula_core::config::SessionConfig;
use tabula_import::{
    ImportCheckpoint, ImportOptions, ImportOrchestrator, ImportSpecification, JsonlSink,
    MemorySink,
};
use tabula_mapping::{Component, ItemMapping, MappingSpec};

fn write_csv(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn options(logs: &Path, cancel_on_error: bool) -> ImportOptions {
    ImportOptions {
        cancel_on_error,
        logs_dir: logs.to_path_buf(),
        session: SessionConfig::default(),
    }
}

fn csv_spec() -> ImportSpecification {
    ImportSpecification::new(AdapterKind::DelimitedText).with_table("csv", MappingSpec::default_guess())
}

fn objects(sink: &MemorySink) -> Vec<(String, String)> {
    sink.batches()
        .iter()
        .flat_map(|b| b.objects.iter().cloned())
        .collect()
}

#[tokio::test]
async fn imports_every_source_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_csv(dir.path(), "units.csv", "class,entity\nunit,u1\nunit,u2\n");
    let second = write_csv(dir.path(), "nodes.csv", "class,entity\nnode,n1\n");

    let sink = MemorySink::new();
    let orchestrator = ImportOrchestrator::new(csv_spec(), options(&dir.path().join("logs"), false))
        .with_sink(sink.clone());
    let report = orchestrator.run(&[first.clone(), second.clone()]).await.unwrap();

    assert!(report.success);
    assert_eq!(report.tables_imported, 2);
    assert_eq!(report.entities_written, 5);
    assert_eq!(report.row_errors, 0);
    assert!(report.error_log.is_none());
    assert!(report.checkpoint.is_done(&first, "csv"));
    assert!(report.checkpoint.is_done(&second, "csv"));
    assert_eq!(sink.batches().len(), 2);
    assert_eq!(
        objects(&sink),
        vec![
            ("unit".to_string(), "u1".to_string()),
            ("unit".to_string(), "u2".to_string()),
            ("node".to_string(), "n1".to_string()),
        ]
    );
}

#[tokio::test]
async fn deselected_table_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "units.csv", "class,entity\nunit,u1\n");
    let mut spec = csv_spec();
    spec.selected_tables.clear();

    let sink = MemorySink::new();
    let report = ImportOrchestrator::new(spec, options(dir.path(), false))
        .with_sink(sink.clone())
        .run(&[source])
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.tables_imported, 0);
    assert!(sink.batches().is_empty());
}

#[tokio::test]
async fn row_errors_go_to_the_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "units.csv", "class,entity\nunit,u1\nunit,\nunit,u3\n");
    let logs = dir.path().join("logs");

    let sink = MemorySink::new();
    let report = ImportOrchestrator::new(csv_spec(), options(&logs, false))
        .with_sink(sink.clone())
        .run(&[source.clone()])
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.row_errors, 1);
    assert_eq!(objects(&sink).len(), 2);
    let log = report.error_log.expect("error log path");
    assert!(log.starts_with(std::path::absolute(&logs).unwrap()));
    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(text, format!("{}: csv: row 1: object name is missing\n", source));
}

#[tokio::test]
async fn cancel_on_error_stops_at_first_failing_table() {
    let dir = tempfile::tempdir().unwrap();
    let broken = write_csv(dir.path(), "broken.csv", "class,entity\nunit,u1\nunit,\n");
    let fine = write_csv(dir.path(), "fine.csv", "class,entity\nnode,n1\n");

    let sink = MemorySink::new();
    let report = ImportOrchestrator::new(csv_spec(), options(&dir.path().join("logs"), true))
        .with_sink(sink.clone())
        .run(&[broken.clone(), fine.clone()])
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report.aborted);
    // the table with row errors is not written, not even its valid rows
    assert!(sink.batches().is_empty());
    assert_eq!(report.entities_written, 0);
    assert_eq!(report.tables_imported, 0);
    assert!(!report.checkpoint.is_done(&broken, "csv"));
    assert!(!report.checkpoint.is_done(&fine, "csv"));
    assert_eq!(report.row_errors, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source, broken);
    assert_eq!(report.failures[0].table.as_deref(), Some("csv"));

    let log = report.error_log.expect("error log path");
    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(text, format!("{}: csv: row 1: object name is missing\n", broken));
}

#[tokio::test]
async fn failed_table_is_retried_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "units.csv", "class,entity\nunit,u1\nunit,\n");

    let first = ImportOrchestrator::new(csv_spec(), options(dir.path(), true))
        .run(&[source.clone()])
        .await
        .unwrap();
    assert!(first.aborted);

    std::fs::write(&source, "class,entity\nunit,u1\nunit,u2\n").unwrap();
    let sink = MemorySink::new();
    let second = ImportOrchestrator::new(csv_spec(), options(dir.path(), true))
        .with_sink(sink.clone())
        .resume(&[source.clone()], first.checkpoint)
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(objects(&sink).len(), 2);
    assert!(second.checkpoint.is_done(&source, "csv"));
}

#[tokio::test]
async fn sink_failure_goes_to_the_import_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "units.csv", "class,entity\nunit,u1\n");
    let logs = dir.path().join("logs");
    // a directory where the output file should be
    let blocked = dir.path().join("blocked");
    std::fs::create_dir(&blocked).unwrap();

    let report = ImportOrchestrator::new(csv_spec(), options(&logs, false))
        .with_sink(JsonlSink::new(&blocked))
        .run(&[source.clone()])
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, "write");
    assert!(!report.checkpoint.is_done(&source, "csv"));
    assert!(report.error_log.is_none());

    let log = report.import_error_log.expect("import error log path");
    let name = log.file_name().and_then(|n| n.to_str()).unwrap();
    assert!(name.ends_with("_import_error.log"));
    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.starts_with(&format!("{}: csv: ", source)));
    assert_eq!(text.lines().count(), 1);
}

#[tokio::test]
async fn mapping_failure_is_reported_per_table() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_csv(dir.path(), "a.csv", "class,entity\nunit,u1\n");
    let second = write_csv(dir.path(), "b.csv", "class,entity\nnode,n1\n");
    let spec = ImportSpecification::new(AdapterKind::DelimitedText).with_table(
        "csv",
        MappingSpec::new(vec![ItemMapping::object_class(
            Component::column(0),
            Component::column(5),
        )]),
    );

    let report = ImportOrchestrator::new(spec, options(dir.path(), false))
        .run(&[first.clone(), second.clone()])
        .await
        .unwrap();

    assert!(!report.success);
    assert!(!report.aborted);
    assert_eq!(report.failures.len(), 2);
    let failure = &report.failures[0];
    assert_eq!(failure.source, first);
    assert_eq!(failure.table.as_deref(), Some("csv"));
    assert_eq!(failure.kind, "mapping");
    assert_eq!(report.failures[1].source, second);
}

#[tokio::test]
async fn unreachable_source_is_named_and_others_continue() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.csv").to_str().unwrap().to_string();
    let fine = write_csv(dir.path(), "fine.csv", "class,entity\nnode,n1\n");

    let sink = MemorySink::new();
    let report = ImportOrchestrator::new(csv_spec(), options(dir.path(), false))
        .with_sink(sink.clone())
        .run(&[missing.clone(), fine])
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source, missing);
    assert_eq!(report.failures[0].table, None);
    assert_eq!(report.failures[0].kind, "connection");
    assert_eq!(objects(&sink), vec![("node".to_string(), "n1".to_string())]);
}

#[tokio::test]
async fn resume_skips_checkpointed_tables() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_csv(dir.path(), "a.csv", "class,entity\nunit,u1\n");
    let second = write_csv(dir.path(), "b.csv", "class,entity\nnode,n1\n");
    let mut checkpoint = ImportCheckpoint::default();
    checkpoint.mark(&first, "csv");

    let sink = MemorySink::new();
    let report = ImportOrchestrator::new(csv_spec(), options(dir.path(), false))
        .with_sink(sink.clone())
        .resume(&[first.clone(), second.clone()], checkpoint)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.tables_imported, 1);
    assert_eq!(objects(&sink), vec![("node".to_string(), "n1".to_string())]);
    assert!(report.checkpoint.is_done(&first, "csv"));
    assert!(report.checkpoint.is_done(&second, "csv"));
}

#[tokio::test]
async fn cancelled_run_imports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "a.csv", "class,entity\nunit,u1\n");

    let sink = MemorySink::new();
    let orchestrator =
        ImportOrchestrator::new(csv_spec(), options(dir.path(), false)).with_sink(sink.clone());
    let cancel = orchestrator.cancel_handle();
    cancel.cancel();
    let report = orchestrator.run(&[source]).await.unwrap();

    assert!(report.cancelled);
    assert!(!report.success);
    assert!(sink.batches().is_empty());
}

#[tokio::test]
async fn stored_options_reach_the_reader() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_csv(dir.path(), "units.csv", "class;entity\nunit;u1\n");
    let spec = ImportSpecification::from_json(
        r#"{
            "source_type": "csv",
            "table_mappings": {"csv": [{
                "map_type": "ObjectClass",
                "name": {"map_type": "column", "reference": 0},
                "objects": {"map_type": "column", "reference": 1}
            }]},
            "table_config": {"csv": {"options": {"delimiter": ";"}}},
            "selected_tables": ["csv"]
        }"#,
    )
    .unwrap();

    let out = dir.path().join("out/import.jsonl");
    let report = ImportOrchestrator::new(spec, options(dir.path(), false))
        .with_sink(JsonlSink::new(&out))
        .run(&[source])
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.entities_written, 2);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("u1"));
}
