//! HTTP API smoke test: drives the compiled binary end to end, then hits
//! the running server with a blocking client.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

const BIND: &str = "127.0.0.1:7739";

fn atlas_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("atlas");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("exports")).unwrap();

    fs::write(
        root.join("exports/one.json"),
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
        root.join("exports/two.json"),
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

    let config_content = format!(
        r#"[db]
path = "{root}/data/atlas.sqlite"

[embedding]
provider = "local"

[server]
bind = "{bind}"
"#,
        root = root.display(),
        bind = BIND
    );

    let config_path = root.join("config/atlas.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_atlas(config_path: &Path, args: &[&str]) -> bool {
    Command::new(atlas_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap()
        .status
        .success()
}

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn start_server(config_path: &Path) -> ServerGuard {
    let child = Command::new(atlas_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let guard = ServerGuard(child);
    let client = reqwest::blocking::Client::new();

    // Wait for the server to come up.
    for _ in 0..50 {
        if client
            .get(format!("http://{}/health", BIND))
            .send()
            .is_ok()
        {
            return guard;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("server did not start");
}

#[test]
fn test_api_end_to_end() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_atlas(&config_path, &["init"]));
    let exports = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("exports");
    assert!(run_atlas(
        &config_path,
        &["import", "dir", exports.to_str().unwrap()]
    ));

    let _server = start_server(&config_path);
    let client = reqwest::blocking::Client::new();
    let base = format!("http://{}", BIND);

    // Health
    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["database"], "healthy");

    // List
    let list: serde_json::Value = client
        .get(format!("{}/api/v1/conversations", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(list["total"], 2);
    let first_id = list["items"][0]["id"].as_str().unwrap().to_string();
    let second_id = list["items"][1]["id"].as_str().unwrap().to_string();

    // Detail includes messages
    let detail: serde_json::Value = client
        .get(format!("{}/api/v1/conversations/{}", base, first_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(detail["messages"].as_array().unwrap().len(), 2);

    // Unknown id is a 404 with the error contract
    let resp = client
        .get(format!("{}/api/v1/conversations/no-such-id", base))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let err: serde_json::Value = resp.json().unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    // Keyword search
    let search: serde_json::Value = client
        .get(format!("{}/api/v1/search?q=sqlite", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(search["mode"], "keyword");
    assert!(search["total"].as_u64().unwrap() >= 1);

    // Empty query rejected
    let resp = client
        .get(format!("{}/api/v1/search?q=", base))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Auto-link over the API
    let report: serde_json::Value = client
        .post(format!("{}/api/v1/links/auto", base))
        .json(&serde_json::json!({}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(report["conversations"], 2);
    assert_eq!(report["similar_created"], 1);

    // Links show up on both sides
    let links: serde_json::Value = client
        .get(format!("{}/api/v1/conversations/{}/links", base, first_id))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(!links.as_array().unwrap().is_empty());

    // Similar ranking
    let similar: serde_json::Value = client
        .get(format!(
            "{}/api/v1/conversations/{}/similar?threshold=0.5",
            base, first_id
        ))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(similar[0]["id"], second_id.as_str());

    // Graph has two nodes and one deduplicated edge
    let graph: serde_json::Value = client
        .get(format!("{}/api/v1/graph", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(graph["edges"].as_array().unwrap().len(), 1);

    // Timeline buckets by day
    let timeline: serde_json::Value = client
        .get(format!("{}/api/v1/timeline", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(timeline.as_array().unwrap().len(), 2);

    // Stats
    let stats: serde_json::Value = client
        .get(format!("{}/api/v1/stats", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(stats["conversations"], 2);
    assert_eq!(stats["messages"], 4);

    // Markdown export
    let markdown = client
        .get(format!("{}/api/v1/conversations/{}/export", base, first_id))
        .send()
        .unwrap()
        .text()
        .unwrap();
    assert!(markdown.starts_with("# "));
    assert!(markdown.contains("## User"));

    // Manual link create + delete
    let created: serde_json::Value = client
        .post(format!("{}/api/v1/links", base))
        .json(&serde_json::json!({
            "from_id": first_id,
            "to_id": second_id,
            "kind": "manual",
            "reason": "same bug"
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(created["success"], true);

    let removed: serde_json::Value = client
        .delete(format!("{}/api/v1/links", base))
        .json(&serde_json::json!({
            "from_id": first_id,
            "to_id": second_id,
            "kind": "manual"
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(removed["success"], true);

    // Delete a conversation; the list shrinks
    let resp = client
        .delete(format!("{}/api/v1/conversations/{}", base, second_id))
        .send()
        .unwrap();
    assert!(resp.status().is_success());

    let list: serde_json::Value = client
        .get(format!("{}/api/v1/conversations", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(list["total"], 1);
}
