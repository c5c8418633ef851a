use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn osync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_osync"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let creds_dir = root.join("creds");
    fs::create_dir_all(&creds_dir).unwrap();

    // Grubhub credentials stay absent; DoorDash has an export.
    fs::write(
        creds_dir.join("doordash.json"),
        r#"{ "cookies": { "dd_session_id": "s-1", "csrf_token": "c-1" } }"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/osync.sqlite"

[session]
poll_interval_ms = 10
max_poll_attempts = 1

[http]
timeout_secs = 2

[sites.grubhub]
credentials = "{root}/creds/grubhub.json"

[sites.doordash]
credentials = "{root}/creds/doordash.json"
base_url = "http://127.0.0.1:9"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("osync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_osync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = osync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run osync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_osync(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    let (_, stderr, ok) = run_osync(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_status_lists_configured_sites() {
    let (_tmp, config) = setup_test_env();
    run_osync(&config, &["init"]);

    let (stdout, stderr, ok) = run_osync(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert!(stdout.contains("grubhub"));
    assert!(stdout.contains("doordash"));
    assert!(stdout.contains("never"));
    assert!(stdout.contains("(not set)"));
}

#[test]
fn test_sync_without_credentials_reports_logged_out() {
    let (_tmp, config) = setup_test_env();
    run_osync(&config, &["init"]);

    let (stdout, stderr, ok) = run_osync(&config, &["sync", "grubhub"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("grubhub: not logged in"));

    let (stdout, _, _) = run_osync(&config, &["status"]);
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("grubhub"))
        .unwrap();
    assert!(line.contains("never"));
    assert!(line.contains("idle"));
}

#[test]
fn test_sync_against_unreachable_site_fails() {
    let (_tmp, config) = setup_test_env();
    run_osync(&config, &["init"]);

    let (_, stderr, ok) = run_osync(&config, &["sync", "doordash"]);
    assert!(!ok, "sync against a closed port should fail");
    assert!(stderr.contains("fetch failed"), "unexpected stderr: {}", stderr);

    // The session was recorded and the guard released.
    let (stdout, _, _) = run_osync(&config, &["status"]);
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("doordash"))
        .unwrap();
    assert!(line.contains("yes"));
    assert!(line.contains("idle"));
    assert!(line.contains("failed"));
}

#[test]
fn test_insights_on_empty_store() {
    let (_tmp, config) = setup_test_env();
    run_osync(&config, &["init"]);

    let (stdout, stderr, ok) = run_osync(&config, &["insights", "--site", "grubhub"]);
    assert!(ok, "insights failed: {}", stderr);
    assert!(stdout.trim().is_empty());

    let (_, stderr, ok) = run_osync(&config, &["insights"]);
    assert!(!ok);
    assert!(stderr.contains("No supported host set"));
}

#[test]
fn test_unknown_site_is_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_osync(&config, &["sync", "ubereats"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown site"));
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, ok) = run_osync(Path::new("/nonexistent/osync.toml"), &["status"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
