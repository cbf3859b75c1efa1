use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::{Orientation, PaperSize, PrintSettings};

/// 載入列印設定檔時可能發生的錯誤。 / Errors raised while loading a printing config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 列印管線的執行期設定。 / Runtime configuration of the printing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintingConfig {
    /// 設定後，每個頁面都會輸出到此資料夾。 / When set, every stored page is dumped here.
    pub debug_dump_dir: Option<PathBuf>,
    /// 結束程式時等待每個作業的上限。 / Upper bound of the per-job flush at shutdown.
    pub flush_timeout_ms: u64,
    pub worker_thread_name: String,
    pub default_paper: PaperSize,
    pub default_dpi: u32,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            debug_dump_dir: None,
            flush_timeout_ms: 120_000,
            worker_thread_name: "print-worker".to_string(),
            default_paper: PaperSize::LETTER,
            default_dpi: 72,
        }
    }
}

impl PrintingConfig {
    /// 從 JSON 檔案載入設定；缺少的欄位使用預設值。 / Loads a JSON file, defaulting missing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// 後端自行產生預設值時所用的設定。 / Settings used by backends that synthesize defaults.
    pub fn default_settings(&self, printer_name: &str) -> PrintSettings {
        PrintSettings::for_paper(
            printer_name,
            self.default_paper,
            Orientation::Portrait,
            self.default_dpi,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("printing.json");
        fs::write(&path, r#"{ "flush_timeout_ms": 500, "debug_dump_dir": "/tmp/dump" }"#).unwrap();

        let config = PrintingConfig::load(&path).unwrap();
        assert_eq!(config.flush_timeout(), Duration::from_millis(500));
        assert_eq!(config.debug_dump_dir, Some(PathBuf::from("/tmp/dump")));
        assert_eq!(config.worker_thread_name, "print-worker");
        assert_eq!(config.default_dpi, 72);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = PrintingConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = PrintingConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
