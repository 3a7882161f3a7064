use chrono::Utc;
use std::fs;
use std::path::Path;

/// Creates the output directory if needed and returns a timestamped YAML
/// file path for a run log.
pub fn create_run_log_yaml(dir_path: &str, prefix: &str) -> String {
    if !Path::new(dir_path).exists() {
        fs::create_dir_all(dir_path).expect("Failed to create the output directory.");
    }
    let date = Utc::now().format("%Y-%m-%d-%H-%M-%S");
    format!("{dir_path}/{prefix}-{date}.yaml")
}
