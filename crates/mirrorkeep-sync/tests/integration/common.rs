//! Shared helpers for the integration tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mirrorkeep_core::config::Config;
use mirrorkeep_core::domain::rule::Configuration;
use mirrorkeep_core::ports::notifier::CollectingNotifier;
use walkdir::WalkDir;

/// Writes `contents` to `path`, creating parent directories
pub fn write(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// JSON for one include rule
pub fn rule(paths: &[&Path], target: &Path, excludes: &[&Path]) -> serde_json::Value {
    let strings = |list: &[&Path]| -> Vec<String> {
        list.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    };
    serde_json::json!({
        "paths": strings(paths),
        "targetPath": target.to_string_lossy(),
        "excludes": strings(excludes),
    })
}

/// Parses and validates a configuration holding `rules`
pub fn configuration(rules: &[serde_json::Value], notifier: &CollectingNotifier) -> Configuration {
    let json = serde_json::json!({ "includes": rules }).to_string();
    let raw = Config::from_json(&json).unwrap();
    let mut config = Configuration::parse(&raw, notifier).unwrap();
    config.validate(notifier);
    config
}

/// Relative path -> contents of every regular file under `root`
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Polls `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

pub fn collecting() -> Arc<CollectingNotifier> {
    Arc::new(CollectingNotifier::new())
}
