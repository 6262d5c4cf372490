//! File-based history log: one JSON-lines file per (scope, character).
//!
//! Each line is a JSON-encoded `HistoryEntry`. Files live under the history
//! directory as `<kind>-<scope id>-<character>.jsonl`, for example
//! `group-123456-Nia.jsonl`.
//!
//! Appends write both records of a turn with one `write_all` on a blocking
//! task that owns the stream lock, so dropping the caller's future cannot
//! leave half a turn on disk or let another append interleave with it. If
//! the write itself fails the file is truncated back to its previous length.
//! Reads and clears run the same way, on a blocking task under the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustedtavern_core::error::HistoryError;
use rustedtavern_core::history::{HistoryEntry, HistoryKey, HistoryLog};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// What we know about a stream's file without re-reading it.
#[derive(Debug, Default)]
struct StreamState {
    scanned: bool,
    last_timestamp: Option<DateTime<Utc>>,
    /// The file ends in a torn line; the next append starts on a fresh one.
    needs_newline: bool,
}

impl StreamState {
    fn absorb(&mut self, scan: &Scan) {
        self.scanned = true;
        self.last_timestamp = scan.records.last().map(|r| r.timestamp);
        self.needs_newline = !scan.ends_cleanly;
    }

    fn reset(&mut self) {
        self.scanned = true;
        self.last_timestamp = None;
        self.needs_newline = false;
    }
}

struct Scan {
    records: Vec<HistoryEntry>,
    ends_cleanly: bool,
}

/// JSONL history log rooted at a directory.
pub struct FileHistoryLog {
    dir: PathBuf,
    streams: Mutex<HashMap<HistoryKey, Arc<Mutex<StreamState>>>>,
}

impl FileHistoryLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File history log ready");
        Self {
            dir,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file backing `key`.
    pub fn path_for(&self, key: &HistoryKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// File stems of every stream on disk, sorted.
    pub fn streams(&self) -> Result<Vec<String>, HistoryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::ReadFailure {
                    path: self.dir.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn stream(&self, key: &HistoryKey) -> Arc<Mutex<StreamState>> {
        self.streams
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

/// Read every well-formed record. Corrupt lines are skipped with a warning.
fn scan(path: &Path) -> Result<Scan, HistoryError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Scan {
                records: Vec::new(),
                ends_cleanly: true,
            });
        }
        Err(e) => {
            return Err(HistoryError::ReadFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let content = String::from_utf8_lossy(&bytes);
    let records = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                let err = HistoryError::RecordCorrupt {
                    line: index + 1,
                    reason: e.to_string(),
                };
                warn!(path = %path.display(), error = %err, "Skipping corrupted history record");
                None
            }
        })
        .collect();

    Ok(Scan {
        records,
        ends_cleanly: bytes.is_empty() || bytes.ends_with(b"\n"),
    })
}

fn ensure_parent(path: &Path) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HistoryError::WriteFailure {
            path: path.to_path_buf(),
            reason: format!("Failed to create history directory: {e}"),
        })?;
    }
    Ok(())
}

/// Runs on a blocking thread holding the stream lock.
fn append_pair(
    path: &Path,
    mut state: OwnedMutexGuard<StreamState>,
    user_turn: HistoryEntry,
    reply_turn: HistoryEntry,
) -> Result<(), HistoryError> {
    let write_err = |reason: String| HistoryError::WriteFailure {
        path: path.to_path_buf(),
        reason,
    };

    ensure_parent(path)?;
    if !state.scanned {
        let existing = scan(path)?;
        state.absorb(&existing);
    }

    let user_turn = user_turn.not_before(state.last_timestamp);
    let reply_turn = reply_turn.not_before(Some(user_turn.timestamp));

    let mut buf = String::new();
    if state.needs_newline {
        buf.push('\n');
    }
    for entry in [&user_turn, &reply_turn] {
        let line = serde_json::to_string(entry)
            .map_err(|e| write_err(format!("Failed to serialize history record: {e}")))?;
        buf.push_str(&line);
        buf.push('\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| write_err(format!("Failed to open history file: {e}")))?;
    let start_len = file
        .metadata()
        .map_err(|e| write_err(format!("Failed to stat history file: {e}")))?
        .len();

    if let Err(e) = file.write_all(buf.as_bytes()).and_then(|_| file.sync_data()) {
        if let Err(rollback) = file.set_len(start_len) {
            warn!(path = %path.display(), error = %rollback, "Failed to roll back partial history write");
        }
        return Err(write_err(format!("Failed to write history file: {e}")));
    }

    state.last_timestamp = Some(reply_turn.timestamp);
    state.needs_newline = false;
    Ok(())
}

enum Tail {
    Created,
    Records(Vec<HistoryEntry>),
}

/// Runs on a blocking thread holding the stream lock. A missing file is
/// created empty.
fn read_tail(
    path: &Path,
    mut state: OwnedMutexGuard<StreamState>,
    depth: usize,
) -> Result<Tail, HistoryError> {
    if !path.exists() {
        ensure_parent(path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| HistoryError::WriteFailure {
                path: path.to_path_buf(),
                reason: format!("Failed to create history file: {e}"),
            })?;
        state.reset();
        return Ok(Tail::Created);
    }

    let scanned = scan(path)?;
    state.absorb(&scanned);
    let mut records = scanned.records;
    let start = records.len().saturating_sub(depth);
    Ok(Tail::Records(records.split_off(start)))
}

/// Runs on a blocking thread holding the stream lock.
fn truncate(path: &Path, mut state: OwnedMutexGuard<StreamState>) -> Result<(), HistoryError> {
    ensure_parent(path)?;
    std::fs::File::create(path).map_err(|e| HistoryError::WriteFailure {
        path: path.to_path_buf(),
        reason: format!("Failed to truncate history file: {e}"),
    })?;
    state.reset();
    Ok(())
}

#[async_trait]
impl HistoryLog for FileHistoryLog {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(
        &self,
        key: &HistoryKey,
        user_turn: HistoryEntry,
        reply_turn: HistoryEntry,
    ) -> Result<(), HistoryError> {
        let path = self.path_for(key);
        let state = self.stream(key).await.lock_owned().await;

        let task_path = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            append_pair(&task_path, state, user_turn, reply_turn)
        })
        .await;

        match result {
            Ok(outcome) => {
                if outcome.is_ok() {
                    debug!(stream = %key, "Turn appended");
                }
                outcome
            }
            Err(e) => Err(HistoryError::WriteFailure {
                path,
                reason: format!("Append task failed: {e}"),
            }),
        }
    }

    async fn read_window(
        &self,
        key: &HistoryKey,
        depth: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let path = self.path_for(key);
        let state = self.stream(key).await.lock_owned().await;

        let task_path = path.clone();
        let result = tokio::task::spawn_blocking(move || read_tail(&task_path, state, depth)).await;

        match result {
            Ok(Ok(Tail::Created)) => {
                debug!(stream = %key, "Created empty history stream");
                Ok(Vec::new())
            }
            Ok(Ok(Tail::Records(records))) => Ok(records),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(HistoryError::ReadFailure {
                path,
                reason: format!("Read task failed: {e}"),
            }),
        }
    }

    async fn clear(&self, key: &HistoryKey) -> Result<(), HistoryError> {
        let path = self.path_for(key);
        let state = self.stream(key).await.lock_owned().await;

        let task_path = path.clone();
        let result = tokio::task::spawn_blocking(move || truncate(&task_path, state)).await;

        match result {
            Ok(outcome) => {
                if outcome.is_ok() {
                    debug!(stream = %key, "History cleared");
                }
                outcome
            }
            Err(e) => Err(HistoryError::WriteFailure {
                path,
                reason: format!("Clear task failed: {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rustedtavern_core::scope::ScopeId;

    fn key(character: &str) -> HistoryKey {
        HistoryKey::new(ScopeId::group("42"), character)
    }

    fn turn(n: usize, at: DateTime<Utc>) -> (HistoryEntry, HistoryEntry) {
        (
            HistoryEntry::user("Sam", format!("question {n}"), at),
            HistoryEntry::reply("Nia", format!("answer {n}"), at),
        )
    }

    #[tokio::test]
    async fn missing_stream_reads_empty_and_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path().join("history"));

        let window = log.read_window(&key("Nia"), 8).await.unwrap();
        assert!(window.is_empty());
        assert!(log.path_for(&key("Nia")).exists());
        assert_eq!(log.streams().unwrap(), vec!["group-42-Nia"]);
    }

    #[tokio::test]
    async fn append_then_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let now = Utc::now();

        for n in 0..2 {
            let (u, r) = turn(n, now);
            log.append(&key("Nia"), u, r).await.unwrap();
        }

        let window = log.read_window(&key("Nia"), 8).await.unwrap();
        let texts: Vec<&str> = window.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["question 0", "answer 0", "question 1", "answer 1"]);
        assert!(window[0].is_user);
        assert!(!window[1].is_user);
    }

    #[tokio::test]
    async fn window_keeps_most_recent_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let now = Utc::now();

        for n in 0..5 {
            let (u, r) = turn(n, now);
            log.append(&key("Nia"), u, r).await.unwrap();
        }

        let window = log.read_window(&key("Nia"), 3).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text, "answer 3");
        assert_eq!(window[2].text, "answer 4");
        assert!(log.read_window(&key("Nia"), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_then_read_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let (u, r) = turn(0, Utc::now());
        log.append(&key("Nia"), u, r).await.unwrap();

        log.clear(&key("Nia")).await.unwrap();
        assert!(log.read_window(&key("Nia"), 8).await.unwrap().is_empty());

        let (u, r) = turn(1, Utc::now());
        log.append(&key("Nia"), u, r).await.unwrap();
        assert_eq!(log.read_window(&key("Nia"), 8).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn characters_have_separate_streams() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let (u, r) = turn(0, Utc::now());
        log.append(&key("Nia"), u, r).await.unwrap();

        assert!(log.read_window(&key("Yulia"), 8).await.unwrap().is_empty());
        assert_eq!(log.read_window(&key("Nia"), 8).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_without_eating_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let path = log.path_for(&key("Nia"));

        let good = |text: &str, is_user: bool| {
            serde_json::to_string(&HistoryEntry {
                speaker_name: "x".into(),
                is_user,
                text: text.into(),
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            })
            .unwrap()
        };
        let content = format!(
            "{}\n{{broken\n{}\n\n{}\n",
            good("one", true),
            good("two", false),
            r#"{"speaker_name": 5}"#
        );
        std::fs::write(&path, content).unwrap();

        let window = log.read_window(&key("Nia"), 2).await.unwrap();
        let texts: Vec<&str> = window.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn legacy_records_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        std::fs::write(
            log.path_for(&key("Nia")),
            concat!(
                r#"{"name": "Sam", "is_user": true, "user_id": "1", "is_system": false, "msg": "hi", "create_date": "2025-03-01@18:22:05"}"#,
                "\n",
                r#"{"name": "Nia", "is_user": false, "user_id": "", "is_system": false, "msg": "hello", "create_date": "2025-03-01@18:22:09"}"#,
                "\n"
            ),
        )
        .unwrap();

        let window = log.read_window(&key("Nia"), 8).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].speaker_name, "Nia");
        assert_eq!(window[1].text, "hello");
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        let now = Utc::now();

        let (u, r) = turn(0, now);
        log.append(&key("Nia"), u, r).await.unwrap();
        // Clock stepped back an hour.
        let (u, r) = turn(1, now - Duration::hours(1));
        log.append(&key("Nia"), u, r).await.unwrap();

        // A fresh handle has to rediscover the last timestamp from disk.
        let reopened = FileHistoryLog::new(dir.path());
        let (u, r) = turn(2, now - Duration::hours(2));
        reopened.append(&key("Nia"), u, r).await.unwrap();

        let window = reopened.read_window(&key("Nia"), 16).await.unwrap();
        assert_eq!(window.len(), 6);
        assert!(window.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn torn_tail_does_not_swallow_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileHistoryLog::new(dir.path());
        std::fs::write(log.path_for(&key("Nia")), r#"{"speaker_name": "Sam", "is_us"#).unwrap();

        let (u, r) = turn(0, Utc::now());
        log.append(&key("Nia"), u, r).await.unwrap();

        let window = log.read_window(&key("Nia"), 8).await.unwrap();
        let texts: Vec<&str> = window.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["question 0", "answer 0"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FileHistoryLog::new(dir.path()));
        let now = Utc::now();

        let mut handles = Vec::new();
        for n in 0..16 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let (u, r) = turn(n, now);
                log.append(&key("Nia"), u, r).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let window = log.read_window(&key("Nia"), 100).await.unwrap();
        assert_eq!(window.len(), 32);
        for pair in window.chunks(2) {
            assert!(pair[0].is_user && !pair[1].is_user);
            let n = pair[0].text.trim_start_matches("question ");
            assert_eq!(pair[1].text, format!("answer {n}"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_and_clears_see_whole_turns_under_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FileHistoryLog::new(dir.path()));
        let now = Utc::now();

        let mut handles = Vec::new();
        for n in 0..24 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                match n % 3 {
                    0 => {
                        let (u, r) = turn(n, now);
                        log.append(&key("Nia"), u, r).await.unwrap();
                    }
                    1 => {
                        let window = log.read_window(&key("Nia"), 100).await.unwrap();
                        assert_eq!(window.len() % 2, 0);
                        assert!(window.chunks(2).all(|p| p[0].is_user && !p[1].is_user));
                    }
                    _ => log.clear(&key("Nia")).await.unwrap(),
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (u, r) = turn(99, now);
        log.append(&key("Nia"), u, r).await.unwrap();
        let window = log.read_window(&key("Nia"), 100).await.unwrap();
        assert_eq!(window.last().unwrap().text, "answer 99");
        assert_eq!(window.len() % 2, 0);
    }

    #[tokio::test]
    async fn clear_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();

        let log = FileHistoryLog::new(&blocker);
        let err = log.clear(&key("Nia")).await.unwrap_err();
        assert!(matches!(err, HistoryError::WriteFailure { .. }));
        assert!(log.read_window(&key("Nia"), 8).await.is_err());
    }

    #[tokio::test]
    async fn write_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();

        let log = FileHistoryLog::new(&blocker);
        let (u, r) = turn(0, Utc::now());
        let err = log.append(&key("Nia"), u, r).await.unwrap_err();
        assert!(matches!(err, HistoryError::WriteFailure { .. }));
    }
}
