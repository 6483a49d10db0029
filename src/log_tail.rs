//! Reading the training log as it is being appended to.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Result of a single read of the log file.
#[derive(Debug, Clone, PartialEq)]
pub enum TailRead {
    /// Full current contents. The last line may be cut mid-write.
    Content {
        text: String,
        modified: Option<SystemTime>,
        /// Size in bytes before any lossy decoding
        len: u64,
    },
    /// The job has not created the file yet.
    NotFound,
    /// The file exists but could not be read this time.
    Unreadable(String),
}

/// Reads the whole log on every call; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> TailRead {
        read(&self.path)
    }
}

/// Read `path` without failing the caller on a missing or half-written file.
pub fn read(path: &Path) -> TailRead {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return TailRead::NotFound,
        Err(e) => return TailRead::Unreadable(e.to_string()),
    };
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let len = bytes.len() as u64;

    // A flush can stop in the middle of a multi-byte character.
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    TailRead::Content {
        text,
        modified,
        len,
    }
}

/// The last `n` non-blank lines of `text`, oldest first.
pub fn recent_lines(text: &str, n: usize) -> Vec<String> {
    let mut lines: Vec<String> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(n)
        .map(str::to_string)
        .collect();
    lines.reverse();
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tail = LogTail::new(dir.path().join("metrics.jsonl"));
        assert_eq!(tail.read(), TailRead::NotFound);
    }

    #[test]
    fn reads_current_contents_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let tail = LogTail::new(&path);

        fs::write(&path, "{\"a\":1}\n").unwrap();
        match tail.read() {
            TailRead::Content {
                text,
                modified,
                len,
            } => {
                assert_eq!(text, "{\"a\":1}\n");
                assert!(modified.is_some());
                assert_eq!(len, 8);
            }
            other => panic!("unexpected read: {other:?}"),
        }

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"b\":2}\n").unwrap();
        match tail.read() {
            TailRead::Content { text, .. } => assert_eq!(text.lines().count(), 2),
            other => panic!("unexpected read: {other:?}"),
        }
    }

    #[test]
    fn truncated_utf8_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        // "é" is 0xC3 0xA9; the write stopped after the first byte.
        fs::write(&path, b"{\"a\":1}\n{\"name\":\"caf\xC3").unwrap();

        match read(&path) {
            TailRead::Content { text, len, .. } => {
                assert_eq!(len, 21);
                assert!(text.starts_with("{\"a\":1}\n"));
                assert!(text.ends_with('\u{FFFD}'));
            }
            other => panic!("unexpected read: {other:?}"),
        }
    }

    #[test]
    fn directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read(dir.path()), TailRead::Unreadable(_)));
    }

    #[test]
    fn recent_lines_keeps_the_newest() {
        let text = "one\n\ntwo\nthree\n  \nfour\n";
        assert_eq!(recent_lines(text, 2), vec!["three", "four"]);
        assert_eq!(recent_lines(text, 10), vec!["one", "two", "three", "four"]);
        assert!(recent_lines("", 5).is_empty());
    }
}
