use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn atlas_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("atlas");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Create export files. Two conversations share a rust/sqlite topic so
    // the auto-linker has a pair above the threshold; the third is unrelated.
    let exports_dir = root.join("exports");
    fs::create_dir_all(&exports_dir).unwrap();

    fs::write(
        exports_dir.join("alpha.json"),
        r#"{
  "title": "Rust sqlite locking",
  "created_at": "2025-01-10T09:00:00Z",
  "messages": [
    {"role": "user", "content": "My rust app hits a sqlite database lock error under load. How do I debug this server?", "timestamp": "2025-01-10T09:00:00Z"},
    {"role": "assistant", "content": "Enable WAL mode on the sqlite database, add a busy timeout, then test again.", "timestamp": "2025-01-10T09:00:30Z"}
  ]
}"#,
    )
    .unwrap();

    fs::write(
        exports_dir.join("beta.json"),
        r#"{
  "title": "Sqlite WAL tuning in rust",
  "created_at": "2025-01-12T14:00:00Z",
  "messages": [
    {"role": "user", "content": "What sqlite settings matter for a rust backend database server?", "timestamp": "2025-01-12T14:00:00Z"},
    {"role": "assistant", "content": "WAL journal mode and a busy timeout. Test under load and debug the lock error early.", "timestamp": "2025-01-12T14:00:40Z"}
  ]
}"#,
    )
    .unwrap();

    fs::write(
        exports_dir.join("gamma.json"),
        r#"{
  "title": "Sourdough starter",
  "created_at": "2025-02-01T08:00:00Z",
  "messages": [
    {"role": "user", "content": "Why does my sourdough starter smell like acetone?", "timestamp": "2025-02-01T08:00:00Z"},
    {"role": "assistant", "content": "It is hungry. Feed it more often and keep it somewhere cooler.", "timestamp": "2025-02-01T08:00:20Z"}
  ]
}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/atlas.sqlite"

[embedding]
provider = "local"

[linking]
similarity_threshold = 0.7
continuation_window_hours = 6

[search]
final_limit = 12

[server]
bind = "127.0.0.1:7731"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("atlas.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_atlas(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = atlas_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run atlas binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn import_all(config_path: &Path) {
    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    let (stdout, stderr, success) =
        run_atlas(config_path, &["import", "dir", exports.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_atlas(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_atlas(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_atlas(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_directory() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    let (stdout, stderr, success) =
        run_atlas(&config_path, &["import", "dir", exports.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 3"));
    assert!(stdout.contains("imported: 3"));
    assert!(stdout.contains("failed: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_import_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    let (stdout, _, success) =
        run_atlas(&config_path, &["import", "dir", exports.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("imported: 0"));
    assert!(stdout.contains("already existing: 3"));
}

#[test]
fn test_import_single_file_reports_messages() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let alpha = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports/alpha.json");
    let (stdout, stderr, success) =
        run_atlas(&config_path, &["import", "file", alpha.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("messages: 2"));
}

#[test]
fn test_import_jsonl_session_log() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);

    let log = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports/session.jsonl");
    fs::write(
        &log,
        concat!(
            "{\"type\":\"summary\",\"summary\":\"Fixing the deploy script\"}\n",
            "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"deploy fails on docker build\"},\"timestamp\":\"2025-03-01T10:00:00Z\",\"cwd\":\"/home/me/app\"}\n",
            "{\"type\":\"assistant\",\"message\":{\"role\":\"assistant\",\"content\":[{\"type\":\"text\",\"text\":\"Check the docker cache settings.\"}]},\"timestamp\":\"2025-03-01T10:00:10Z\"}\n",
        ),
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_atlas(&config_path, &["import", "file", log.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("messages: 2"));

    // The summary record names the conversation, the cwd names the project.
    let (stdout, _, _) = run_atlas(&config_path, &["list"]);
    assert!(stdout.contains("Fixing the deploy script"));
}

#[test]
fn test_import_invalid_file_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let bad = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports/bad.json");
    fs::write(&bad, "{ not json").unwrap();

    let (_, stderr, success) =
        run_atlas(&config_path, &["import", "file", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Invalid JSON") || stderr.contains("Failed to parse"));
}

#[test]
fn test_import_directory_continues_past_bad_file() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    fs::write(exports.join("bad.json"), "{ not json").unwrap();

    let (stdout, _, success) =
        run_atlas(&config_path, &["import", "dir", exports.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("files found: 4"));
    assert!(stdout.contains("imported: 3"));
    assert!(stdout.contains("failed: 1"));
}

#[test]
fn test_list_shows_conversations() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, _, success) = run_atlas(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("Rust sqlite locking"));
    assert!(stdout.contains("Sourdough starter"));
    assert!(stdout.contains("3 total"));
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, stderr, success) = run_atlas(&config_path, &["search", "sourdough"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sourdough starter"));
    assert!(!stdout.contains("Rust sqlite locking"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, _, success) = run_atlas(&config_path, &["search", "zeppelin"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_hybrid_ranks_topic_matches() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);
    run_atlas(&config_path, &["embed", "pending"]);

    let (stdout, stderr, success) = run_atlas(
        &config_path,
        &["search", "sqlite database", "--mode", "hybrid"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    // Both sqlite conversations should surface; the first result is one of them.
    let first = stdout.lines().find(|l| l.starts_with("1.")).unwrap();
    assert!(
        first.contains("sqlite") || first.contains("Sqlite"),
        "unexpected top result: {}",
        first
    );
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let (stdout, _, success) = run_atlas(&config_path, &["search", ""]);
    assert!(success, "Empty query should not panic");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout1, _, _) = run_atlas(&config_path, &["search", "sqlite"]);
    let (stdout2, _, _) = run_atlas(&config_path, &["search", "sqlite"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_rejects_unknown_mode() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let (_, stderr, success) = run_atlas(&config_path, &["search", "x", "--mode", "psychic"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"));
}

#[test]
fn test_embed_pending_then_up_to_date() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    // Import already embeds inline; pending should find nothing left.
    let (stdout, _, success) = run_atlas(&config_path, &["embed", "pending"]);
    assert!(success);
    assert!(stdout.contains("all conversations up to date"));
}

#[test]
fn test_embed_rebuild() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, _, success) = run_atlas(&config_path, &["embed", "rebuild"]);
    assert!(success);
    assert!(stdout.contains("embedded: 3"));
}

#[test]
fn test_link_auto_creates_similar_links() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, stderr, success) = run_atlas(&config_path, &["link", "auto"]);
    assert!(success, "link auto failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("conversations: 3"));
    assert!(stdout.contains("pairs compared: 3"));
    // alpha and beta share a topic; gamma links to nothing.
    assert!(stdout.contains("similar links created: 1"));
}

#[test]
fn test_link_auto_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    run_atlas(&config_path, &["link", "auto"]);
    let (stdout, _, success) = run_atlas(&config_path, &["link", "auto"]);
    assert!(success);
    assert!(stdout.contains("similar links created: 0"));
    assert!(stdout.contains("already linked: 1"));
}

#[test]
fn test_link_auto_continuation_same_project() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);

    // Two unrelated conversations two hours apart in the same project:
    // no similar link, one continuation link.
    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    fs::write(
        exports.join("morning.json"),
        r#"{
  "title": "Morning",
  "created_at": "2025-04-01T09:00:00Z",
  "messages": [
    {"role": "user", "content": "Plan the deploy checklist for tomorrow.", "timestamp": "2025-04-01T09:00:00Z"},
    {"role": "assistant", "content": "Here is a deploy checklist draft.", "timestamp": "2025-04-01T09:00:10Z"}
  ]
}"#,
    )
    .unwrap();
    fs::write(
        exports.join("midday.json"),
        r#"{
  "title": "Midday",
  "created_at": "2025-04-01T11:00:00Z",
  "messages": [
    {"role": "user", "content": "Write css for the landing page hero.", "timestamp": "2025-04-01T11:00:00Z"},
    {"role": "assistant", "content": "Here is a css snippet you can adapt.", "timestamp": "2025-04-01T11:00:10Z"}
  ]
}"#,
    )
    .unwrap();

    for file in ["morning.json", "midday.json"] {
        let path = exports.join(file);
        let (_, _, success) = run_atlas(
            &config_path,
            &[
                "import",
                "file",
                path.to_str().unwrap(),
                "--project",
                "/home/me/standup",
            ],
        );
        assert!(success, "import of {} failed", file);
    }

    let (stdout, _, success) = run_atlas(&config_path, &["link", "auto"]);
    assert!(success);
    assert!(stdout.contains("continuation links created: 1"));
    assert!(stdout.contains("similar links created: 0"));
}

#[test]
fn test_manual_link_roundtrip() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let ids = conversation_ids(&config_path);
    assert!(ids.len() >= 2);

    let (stdout, _, success) = run_atlas(&config_path, &["link", "add", &ids[0], &ids[1]]);
    assert!(success);
    assert!(stdout.contains("linked"));

    // Both sides see the link.
    let (stdout, _, _) = run_atlas(&config_path, &["link", "list", &ids[0]]);
    assert!(stdout.contains(&ids[1]));
    let (stdout, _, _) = run_atlas(&config_path, &["link", "list", &ids[1]]);
    assert!(stdout.contains(&ids[0]));

    // Adding again is a no-op.
    let (stdout, _, _) = run_atlas(&config_path, &["link", "add", &ids[0], &ids[1]]);
    assert!(stdout.contains("already linked"));

    let (stdout, _, success) = run_atlas(&config_path, &["link", "rm", &ids[0], &ids[1]]);
    assert!(success);
    assert!(stdout.contains("removed 2 link row(s)"));

    let (stdout, _, _) = run_atlas(&config_path, &["link", "list", &ids[0]]);
    assert!(stdout.contains("No links."));
}

#[test]
fn test_show_prints_transcript() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let ids = conversation_ids(&config_path);
    let (stdout, _, success) = run_atlas(&config_path, &["show", &ids[0]]);
    assert!(success);
    assert!(stdout.contains("--- Conversation ---"));
    assert!(stdout.contains("[user —") || stdout.contains("[assistant —"));
}

#[test]
fn test_export_markdown() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let ids = conversation_ids(&config_path);
    let (stdout, _, success) = run_atlas(&config_path, &["export", &ids[0]]);
    assert!(success);
    assert!(stdout.starts_with("# "));
    assert!(stdout.contains("## User —"));
    assert!(stdout.contains("## Assistant —"));
}

#[test]
fn test_export_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    let (_, stderr, success) = run_atlas(&config_path, &["export", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_stats_counts() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);
    run_atlas(&config_path, &["link", "auto"]);

    let (stdout, _, success) = run_atlas(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Conversations: 3"));
    assert!(stdout.contains("Messages:      6"));
    assert!(stdout.contains("similar"));
}

#[test]
fn test_timeline_groups_by_day() {
    let (_tmp, config_path) = setup_test_env();

    run_atlas(&config_path, &["init"]);
    import_all(&config_path);

    let (stdout, _, success) = run_atlas(&config_path, &["timeline"]);
    assert!(success);
    assert!(stdout.contains("2025-01-10 (1)"));
    assert!(stdout.contains("2025-01-12 (1)"));
    assert!(stdout.contains("2025-02-01 (1)"));
}

/// Pull conversation ids out of `atlas list` output (the last
/// whitespace-separated token of each row).
fn conversation_ids(config_path: &Path) -> Vec<String> {
    let (stdout, _, success) = run_atlas(config_path, &["list"]);
    assert!(success);
    stdout
        .lines()
        .filter(|l| l.starts_with("  "))
        .filter_map(|l| l.split_whitespace().last().map(|s| s.to_string()))
        .filter(|s| s.len() == 36) // UUID
        .collect()
}
