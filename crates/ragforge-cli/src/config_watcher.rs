//! Config hot-reload watcher.
//!
//! Watches `ragforge.toml` and swaps the `[rag]` section into the shared
//! settings after a debounce window. The next ingestion or retrieval call
//! picks the new values up.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use ragforge_core::{RagError, RagResult};
use ragforge_knowledge::{RagSettings, RecursiveSplitter, SharedSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

/// The part of the configuration that can change at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadableConfig {
    #[serde(default)]
    pub rag: Option<RagSettings>,
}

/// Watches a config file on disk and calls back on every (debounced) change.
///
/// Dropping it stops the background thread and releases the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Starts watching `config_path`.
    ///
    /// `on_reload` runs on a background thread for each modification that
    /// parses; parse errors are logged and skipped.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> RagResult<Self>
    where
        F: Fn(ReloadableConfig) + Send + Sync + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| RagError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(config_path.as_ref(), RecursiveMode::NonRecursive)
            .map_err(|e| RagError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let mut last_reload = Instant::now();
            let debounce = Duration::from_millis(debounce_ms);

            while rx.recv().is_ok() {
                // One reload per burst of writes.
                while rx.try_recv().is_ok() {}

                let since = last_reload.elapsed();
                if since < debounce {
                    std::thread::sleep(debounce - since);
                }
                last_reload = Instant::now();

                match parse_config(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => tracing::warn!(error = %e, "Failed to reload config"),
                }
            }

            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Config hot-reload watcher started");

        Ok(Self { _watcher: watcher })
    }
}

/// Reads and parses the reloadable sections of a TOML config file.
pub fn parse_config(path: &Path) -> RagResult<ReloadableConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!("Failed to read config '{}': {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        RagError::Config(format!("Failed to parse config '{}': {}", path.display(), e))
    })
}

/// Swaps a reloaded `[rag]` section into `settings`.
///
/// Returns whether anything changed. Splitter parameters that would not
/// build a splitter are rejected and the current settings stay.
pub fn apply_reload(settings: &SharedSettings, config: ReloadableConfig) -> RagResult<bool> {
    let Some(rag) = config.rag else {
        return Ok(false);
    };
    RecursiveSplitter::new(rag.chunk_size, rag.overlap_size)?;
    let mut current = settings.write();
    if *current == rag {
        return Ok(false);
    }
    tracing::info!(
        chunk_size = rag.chunk_size,
        overlap_size = rag.overlap_size,
        retrieve_per_kb_top_k = rag.retrieve_per_kb_top_k,
        history_window = rag.history_window,
        "RAG settings reloaded"
    );
    *current = rag;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "{body}").unwrap();
        tmp
    }

    #[test]
    fn test_parse_rag_section_ignoring_the_rest() {
        let tmp = write_config(
            r#"
[server]
port = 9000

[rag]
chunk_size = 400
"#,
        );
        let config = parse_config(tmp.path()).unwrap();
        let rag = config.rag.unwrap();
        assert_eq!(rag.chunk_size, 400);
        assert_eq!(rag.overlap_size, 200);
    }

    #[test]
    fn test_parse_without_rag_section() {
        let tmp = write_config("");
        assert!(parse_config(tmp.path()).unwrap().rag.is_none());
    }

    #[test]
    fn test_parse_invalid_toml_returns_error() {
        let tmp = write_config("{{{{invalid toml!!!!");
        let err = parse_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config"), "unexpected error: {err}");
    }

    #[test]
    fn test_parse_nonexistent_file_returns_error() {
        let err = parse_config(Path::new("/nonexistent/path/ragforge.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config"), "unexpected error: {err}");
    }

    #[test]
    fn test_apply_reload_swaps_settings() {
        let settings = RagSettings::default().shared();
        let reload = ReloadableConfig {
            rag: Some(RagSettings {
                chunk_size: 300,
                overlap_size: 30,
                ..RagSettings::default()
            }),
        };
        assert!(apply_reload(&settings, reload.clone()).unwrap());
        assert_eq!(settings.read().chunk_size, 300);
        assert!(!apply_reload(&settings, reload).unwrap());
    }

    #[test]
    fn test_apply_reload_rejects_overlap_not_below_chunk_size() {
        let settings = RagSettings::default().shared();
        let reload = ReloadableConfig {
            rag: Some(RagSettings {
                chunk_size: 100,
                overlap_size: 100,
                ..RagSettings::default()
            }),
        };
        assert!(apply_reload(&settings, reload).is_err());
        assert_eq!(settings.read().chunk_size, 1000);
    }

    #[test]
    fn test_watcher_applies_modified_file() {
        let tmp = write_config("[rag]\nchunk_size = 1000");
        let settings = RagSettings::default().shared();
        let target = settings.clone();
        let _watcher = ConfigWatcher::start(tmp.path().to_path_buf(), 10, move |config| {
            let _ = apply_reload(&target, config);
        })
        .unwrap();

        std::fs::write(tmp.path(), "[rag]\nchunk_size = 640\noverlap_size = 64\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while settings.read().chunk_size != 640 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(settings.read().chunk_size, 640);
        assert_eq!(settings.read().overlap_size, 64);
    }
}
