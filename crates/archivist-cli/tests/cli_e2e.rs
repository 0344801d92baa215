use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use archivist_storage::{GitRepository, Recorder, SnapshotParams, StorageConfig};
use chrono::{TimeZone, Utc};

const SERVICE: &str = "Foo";
const TERMS: &str = "Terms of Service";

const PAGE: &str = r#"<html><body>
<nav>Menu</nav>
<main><h1>Terms of Service</h1><p>Be nice.</p><div class="ad">Buy now</div></main>
</body></html>"#;

fn archivist_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_archivist"))
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(archivist_bin())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn archivist")
}

fn recorder_at(root: &Path) -> Recorder {
    Recorder::new(
        Arc::new(GitRepository::new(StorageConfig::at(root.join("snapshots")))),
        Arc::new(GitRepository::new(StorageConfig::at(root.join("versions")))),
    )
}

/// Temp dir with a declaration for `Foo` and a config pointing at it
fn workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let declarations = dir.path().join("declarations");
    fs::create_dir_all(&declarations).expect("create declarations/");
    fs::write(
        declarations.join(format!("{SERVICE}.json")),
        r#"{
            "name": "Foo",
            "terms": {
                "Terms of Service": {
                    "fetch": "https://foo.example/tos",
                    "select": ["main"],
                    "remove": [".ad"]
                }
            }
        }"#,
    )
    .expect("write declaration");

    let config = serde_json::json!({
        "recorder": {
            "snapshots": { "path": dir.path().join("snapshots") },
            "versions": {
                "path": dir.path().join("versions"),
                "snapshot_identifier_template": "https://archive.example/snapshots/%SNAPSHOT_ID"
            }
        },
        "declarations_path": declarations,
        "log": { "level": "warn" }
    });
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, config.to_string()).expect("write config");
    (dir, config_path)
}

async fn seed_snapshot(root: &Path) -> String {
    let recorder = recorder_at(root);
    recorder.initialize().await.expect("initialize");
    let saved = recorder
        .record_snapshot(SnapshotParams {
            service_id: SERVICE.to_string(),
            terms_type: TERMS.to_string(),
            document_id: None,
            fetch_date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            mime_type: "text/html".to_string(),
            content: PAGE.as_bytes().to_vec(),
        })
        .await
        .expect("record snapshot")
        .expect("new snapshot");
    recorder.finalize().await.expect("finalize");
    saved.id
}

#[tokio::test]
async fn extract_only_run_records_a_version_from_seeded_snapshot() {
    let (dir, config) = workspace();
    let snapshot_id = seed_snapshot(dir.path()).await;

    let output = run(&config, &["track", "--extract-only"]);
    assert!(
        output.status.success(),
        "track failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("track prints a json report");
    assert_eq!(report["terms"], 1);
    assert_eq!(report["extract_only"], true);
    assert_eq!(report["summary"]["versions_recorded"], 1);

    let recorder = recorder_at(dir.path());
    recorder.initialize().await.expect("initialize");
    let version = recorder
        .get_latest_version(SERVICE, TERMS)
        .await
        .expect("read versions")
        .expect("a version was recorded");
    let text = version.content_text();
    assert!(text.contains("Be nice."));
    assert!(!text.contains("Buy now"));
    assert!(!text.contains("Menu"));
    assert!(version.is_first_record);
    assert_eq!(version.snapshot_ids, vec![snapshot_id]);
    assert_eq!(version.fetch_date, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

    // Same snapshot, same extraction: nothing new
    let output = run(&config, &["track", "--extract-only"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["summary"]["versions_recorded"], 0);
    assert_eq!(report["summary"]["unchanged"], 1);
}

#[tokio::test]
async fn latest_prints_snapshot_metadata() {
    let (dir, config) = workspace();
    let snapshot_id = seed_snapshot(dir.path()).await;

    let output = run(&config, &["latest", SERVICE, TERMS]);
    assert!(output.status.success());
    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(metadata["id"], snapshot_id.as_str());
    assert_eq!(metadata["mime_type"], "text/html");
    assert_eq!(metadata["is_first_record"], true);
    assert_eq!(metadata["bytes"], PAGE.len());
}

#[test]
fn malformed_config_exits_with_startup_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, "{ not json").unwrap();

    let output = run(&config, &["track"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_declarations_directory_exits_with_startup_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    let body = serde_json::json!({
        "recorder": {
            "snapshots": { "path": dir.path().join("snapshots") },
            "versions": { "path": dir.path().join("versions") }
        },
        "declarations_path": dir.path().join("absent"),
    });
    fs::write(&config, body.to_string()).unwrap();

    let output = run(&config, &["track", "--extract-only"]);
    assert_eq!(output.status.code(), Some(1));
}
