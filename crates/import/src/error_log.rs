//! Timestamped error log files.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::io::AsyncWriteExt;

/// File name stamp, second resolution.
pub fn log_timestamp() -> String {
    Local::now().format("%Y%m%dT%H%M%S").to_string()
}

/// Write one line per entry to `<dir>/<timestamp>_read_error.log` and
/// return the absolute path.
pub async fn write_read_error_log<I, S>(dir: &Path, entries: I) -> std::io::Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    write_log(dir, "read_error", entries).await
}

/// Same as [`write_read_error_log`] for sink failures, `<timestamp>_import_error.log`.
pub async fn write_import_error_log<I, S>(dir: &Path, entries: I) -> std::io::Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    write_log(dir, "import_error", entries).await
}

async fn write_log<I, S>(dir: &Path, suffix: &str, entries: I) -> std::io::Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}.log", log_timestamp(), suffix));
    let mut text = String::new();
    for entry in entries {
        text.push_str(entry.as_ref());
        text.push('\n');
    }
    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(std::path::absolute(&path).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let path = write_read_error_log(&logs, ["row 1: object name is missing", "row 4: bad"])
            .await
            .unwrap();
        assert!(path.is_absolute());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_read_error.log")));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "row 1: object name is missing\nrow 4: bad\n");
    }

    #[tokio::test]
    async fn import_errors_get_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_import_error_log(dir.path(), ["a.csv: csv: disk full"])
            .await
            .unwrap();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.ends_with("_import_error.log"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a.csv: csv: disk full\n");
    }

    #[test]
    fn timestamp_shape() {
        let stamp = log_timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "T");
    }
}
