use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("hrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("insat.txt"),
        "INSAT-3D provides Sea Surface Temperature data over the Indian Ocean.\n\n\
         The imager on board scans the full disk every thirty minutes for weather monitoring.",
    )
    .unwrap();
    fs::write(
        files_dir.join("scatsat.md"),
        "SCATSAT-1 measures Ocean Surface Winds using a Ku-band scatterometer.\n\n\
         Wind vectors support cyclone tracking and marine forecasting across the region.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.csv"), "not,ingested").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/graph.sqlite"

[index]
dir = "{root}/data/index"

[embedding]
provider = "hash"
dims = 64

[generation]
provider = "disabled"

[ingest]
root = "{root}/files"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("hrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_json(config_path: &Path) -> serde_json::Value {
    let (stdout, stderr, success) = run_hrag(config_path, &["ingest", "--json"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/graph.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_hrag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_hrag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_builds_index_and_graph() {
    let (tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);

    let report = ingest_json(&config_path);
    assert_eq!(report["documents"], 2);
    assert_eq!(report["documents_failed"], 0);
    assert!(report["vector_count"].as_u64().unwrap() >= 2);
    assert!(report["graph"]["edges_created"].as_u64().unwrap() >= 1);
    assert!(report["graph_error"].is_null());

    for file in ["index.bin", "chunks.json", "descriptor.json"] {
        assert!(tmp.path().join("data/index").join(file).exists(), "{} missing", file);
    }
}

#[test]
fn test_reingest_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);

    let first = ingest_json(&config_path);
    let second = ingest_json(&config_path);

    assert_eq!(second["index"]["added"], 0);
    assert_eq!(second["vector_count"], first["vector_count"]);
    assert_eq!(second["graph"]["nodes_created"], 0);
    assert_eq!(second["graph"]["edges_created"], 0);
}

#[test]
fn test_search_returns_vector_and_graph_evidence() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, stderr, success) =
        run_hrag(&config_path, &["search", "INSAT-3D sea surface temperature", "--json"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);

    let ctx: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = ctx["vector_hits"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .any(|h| h["chunk"]["source_id"] == "insat.txt"));
    assert_eq!(ctx["vector_status"]["status"], "available");
    assert_eq!(ctx["graph_status"]["status"], "available");
}

#[test]
fn test_graph_lookup_finds_extracted_node() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, stderr, success) =
        run_hrag(&config_path, &["graph", "lookup", "INSAT-3D", "--json"]);
    assert!(success, "lookup failed: stdout={}, stderr={}", stdout, stderr);

    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let entities = hits["entities"].as_array().unwrap();
    assert!(entities.iter().any(|n| n["name"] == "INSAT-3D"));
    assert!(hits["relationships"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["relation"] == "PROVIDES" && e["target"] == "Sea Surface Temperature"));
}

#[test]
fn test_chat_falls_back_to_evidence() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, stderr, success) =
        run_hrag(&config_path, &["chat", "What does INSAT-3D provide?"]);
    assert!(success, "chat failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sea Surface Temperature"));
}

#[test]
fn test_chat_without_evidence_uses_canned_answer() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_hrag(&config_path, &["chat", "Where can I download satellite data?"]);
    assert!(success, "chat failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("MOSDAC"));
}

#[test]
fn test_chat_rejects_empty_query() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);

    let (_, stderr, success) = run_hrag(&config_path, &["chat", "   "]);
    assert!(!success);
    assert!(stderr.contains("invalid query"));
}

#[test]
fn test_info_reports_components() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, stderr, success) = run_hrag(&config_path, &["info"]);
    assert!(success, "info failed: stdout={}, stderr={}", stdout, stderr);

    let info: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(info["chunk_count"].as_u64().unwrap() >= 2);
    assert_eq!(info["vector_dimension"], 64);
    assert_eq!(info["embedding_model"], "hash");
    assert_eq!(info["graph_connected"], true);
    assert_eq!(info["generative_service_available"], false);
}

#[test]
fn test_graph_clear() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, _, success) = run_hrag(&config_path, &["graph", "clear"]);
    assert!(success);
    assert!(stdout.contains("Graph cleared"));

    let (stdout, _, success) = run_hrag(&config_path, &["graph", "lookup", "INSAT-3D"]);
    assert!(success);
    assert!(stdout.contains("No matches."));
}

#[test]
fn test_stats_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    run_hrag(&config_path, &["init"]);
    ingest_json(&config_path);

    let (stdout, stderr, success) = run_hrag(&config_path, &["stats", "--json"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);

    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["chunks"]["unique_sources"], 2);
    assert!(stats["by_source"]["insat.txt"].as_u64().unwrap() >= 1);
    assert!(stats["graph"]["edges"].as_u64().unwrap() >= 1);
}
