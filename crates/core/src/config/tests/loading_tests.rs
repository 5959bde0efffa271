use crate::config::models::AppConfig;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/harvester.toml"));
    assert!(result.is_err());
}

#[test]
fn test_load_file_with_environment_override() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[worker]
worker_id = "file-worker"

[progress]
base_dir = "/var/lib/harvester"
"#
    )
    .unwrap();

    env::set_var("HARVESTER__PROGRESS__BASE_DIR", "/srv/progress");

    let path = file.path().to_str().unwrap().to_string();
    let result = AppConfig::load(Some(&path));

    env::remove_var("HARVESTER__PROGRESS__BASE_DIR");

    let config = result.unwrap();
    assert_eq!(config.worker.worker_id, "file-worker");
    assert_eq!(config.progress.base_dir, "/srv/progress");
}
