//! Shared coordination channel.
//!
//! The harness only guarantees that the shared directory exists. This
//! module is the contract agents use on top of it: an append-only JSON
//! Lines log plus per-reader cursors.
//!
//! ```text
//! <shared>/
//!   messages.jsonl        {"seq":0,"sender_id":"1","timestamp":"...","message":"..."}
//!   .cursors/
//!     1                   lines of messages.jsonl agent 1 has consumed
//!     2
//! ```
//!
//! Writers hold an exclusive `flock` on the log while appending, readers a
//! shared one. Cursor updates happen under the exclusive lock too.

pub mod follow;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use follow::follow;

use crate::plan::is_valid_id;

/// Name of the message log inside the shared directory.
pub const LOG_FILE: &str = "messages.jsonl";

/// Directory holding per-reader cursors.
pub const CURSOR_DIR: &str = ".cursors";

/// Errors raised by the shared channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("shared directory {} does not exist", .0.display())]
    MissingDir(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("invalid agent id '{0}': use letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error("channel task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One record of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Zero-based line index in the log.
    pub seq: u64,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Handle to the message log in a shared directory.
#[derive(Debug, Clone)]
pub struct SharedChannel {
    root: PathBuf,
}

impl SharedChannel {
    /// Open the channel rooted at `root`. The directory must already exist;
    /// creating it is the provisioner's job.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ChannelError::MissingDir(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Run `op` on the blocking thread pool. Every channel operation may wait
    /// on a `flock`, so async callers go through here.
    pub async fn with_blocking<T, F>(&self, op: F) -> Result<T, ChannelError>
    where
        F: FnOnce(&SharedChannel) -> Result<T, ChannelError> + Send + 'static,
        T: Send + 'static,
    {
        let channel = self.clone();
        tokio::task::spawn_blocking(move || op(&channel)).await?
    }

    fn cursor_path(&self, reader: &str) -> PathBuf {
        self.root.join(CURSOR_DIR).join(reader)
    }

    /// Append a message from `sender` and return the stored record.
    pub fn send(&self, sender: &str, message: &str) -> Result<Envelope, ChannelError> {
        check_id(sender)?;
        if message.trim().is_empty() {
            return Err(ChannelError::EmptyMessage);
        }

        let path = self.log_path();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| io_err(&path, source))?;
        let _lock = FileLock::acquire(&file, LockMode::Exclusive).map_err(|e| io_err(&path, e))?;

        let existing = read_bytes(&file).map_err(|e| io_err(&path, e))?;
        let envelope = Envelope {
            seq: log_lines(&existing).count() as u64,
            sender_id: sender.to_string(),
            timestamp: Utc::now(),
            message: message.to_string(),
        };

        // A writer that died mid-append leaves an unterminated line; close it
        // so this record starts on its own line at index `seq`.
        let mut line = String::new();
        if existing.last().is_some_and(|&b| b != b'\n') {
            warn!(seq = envelope.seq, "terminating partial last line of message log");
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&envelope)?);
        line.push('\n');
        let mut writer = &file;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| io_err(&path, e))?;

        debug!(sender_id = %sender, seq = envelope.seq, "message appended");
        Ok(envelope)
    }

    /// Every record in log order.
    pub fn read_all(&self) -> Result<Vec<Envelope>, ChannelError> {
        Ok(self.read_since(0)?.0)
    }

    /// Records starting at line `offset`, plus the total number of lines in
    /// the log. Pass the returned count as the next offset to resume.
    pub fn read_since(&self, offset: usize) -> Result<(Vec<Envelope>, usize), ChannelError> {
        let path = self.log_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(io_err(&path, e)),
        };
        let _lock = FileLock::acquire(&file, LockMode::Shared).map_err(|e| io_err(&path, e))?;
        let content = read_bytes(&file).map_err(|e| io_err(&path, e))?;
        Ok(parse_lines(&content, offset))
    }

    /// Messages from other agents that `reader` has not consumed yet.
    ///
    /// Advances the reader's cursor to the end of the log, so each message
    /// is returned at most once per reader. The reader's own messages are
    /// skipped but still consumed.
    pub fn unread(&self, reader: &str) -> Result<Vec<Envelope>, ChannelError> {
        check_id(reader)?;

        let path = self.log_path();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| io_err(&path, source))?;
        let _lock = FileLock::acquire(&file, LockMode::Exclusive).map_err(|e| io_err(&path, e))?;

        let cursor = self.read_cursor(reader)?;
        let content = read_bytes(&file).map_err(|e| io_err(&path, e))?;
        let (records, total) = parse_lines(&content, cursor);
        self.write_cursor(reader, total)?;

        Ok(records
            .into_iter()
            .filter(|env| env.sender_id != reader)
            .collect())
    }

    fn read_cursor(&self, reader: &str) -> Result<usize, ChannelError> {
        let path = self.cursor_path(reader);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match raw.trim().parse() {
                Ok(n) => Ok(n),
                Err(_) => {
                    warn!(reader, path = %path.display(), "malformed cursor, rereading from start");
                    Ok(0)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn write_cursor(&self, reader: &str, position: usize) -> Result<(), ChannelError> {
        let dir = self.root.join(CURSOR_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = self.cursor_path(reader);
        std::fs::write(&path, position.to_string()).map_err(|e| io_err(&path, e))
    }
}

fn check_id(id: &str) -> Result<(), ChannelError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ChannelError::InvalidId(id.to_string()))
    }
}

fn io_err(path: &Path, source: io::Error) -> ChannelError {
    ChannelError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The whole log as raw bytes. Agents write to it directly, so nothing
/// guarantees it is valid UTF-8.
fn read_bytes(mut file: &File) -> io::Result<Vec<u8>> {
    use std::io::Seek;
    file.seek(io::SeekFrom::Start(0))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(content)
}

/// Lines of the log, without their `\n`. An unterminated last line counts.
fn log_lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split_inclusive(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\n").unwrap_or(line))
}

/// Parse log lines from `offset` on. Malformed lines (bad JSON or bad
/// UTF-8) are skipped but still counted, so line indexes stay aligned with
/// `seq`.
fn parse_lines(content: &[u8], offset: usize) -> (Vec<Envelope>, usize) {
    let mut total = 0;
    let mut records = Vec::new();
    for (index, line) in log_lines(content).enumerate() {
        total = index + 1;
        if index < offset {
            continue;
        }
        match serde_json::from_slice::<Envelope>(line) {
            Ok(envelope) => records.push(envelope),
            Err(e) => warn!(line = index, error = %e, "skipping malformed message line"),
        }
    }
    (records, total)
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock held for the lifetime of the guard.
struct FileLock<'a> {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: &'a File,
}

impl<'a> FileLock<'a> {
    #[cfg(unix)]
    fn acquire(file: &'a File, mode: LockMode) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;
        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        // SAFETY: the fd is valid for the lifetime of `file`.
        let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }

    #[cfg(not(unix))]
    fn acquire(file: &'a File, _mode: LockMode) -> io::Result<Self> {
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: as in `acquire`.
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (tempfile::TempDir, SharedChannel) {
        let tmp = tempfile::tempdir().unwrap();
        let channel = SharedChannel::open(tmp.path()).unwrap();
        (tmp, channel)
    }

    #[test]
    fn open_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SharedChannel::open(tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, ChannelError::MissingDir(_)));
    }

    #[test]
    fn send_assigns_sequential_seq() {
        let (_tmp, channel) = channel();
        assert_eq!(channel.send("1", "hello").unwrap().seq, 0);
        assert_eq!(channel.send("2", "hi").unwrap().seq, 1);

        let all = channel.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sender_id, "1");
        assert_eq!(all[1].message, "hi");
    }

    #[test]
    fn send_rejects_empty_message_and_bad_sender() {
        let (_tmp, channel) = channel();
        assert!(matches!(
            channel.send("1", "   ").unwrap_err(),
            ChannelError::EmptyMessage
        ));
        assert!(matches!(
            channel.send("../x", "hello").unwrap_err(),
            ChannelError::InvalidId(_)
        ));
        assert!(!channel.log_path().exists());
    }

    #[test]
    fn read_all_on_empty_channel() {
        let (_tmp, channel) = channel();
        assert!(channel.read_all().unwrap().is_empty());
    }

    #[test]
    fn unread_skips_own_messages_and_advances_cursor() {
        let (_tmp, channel) = channel();
        channel.send("1", "from one").unwrap();
        channel.send("2", "from two").unwrap();

        let for_one = channel.unread("1").unwrap();
        assert_eq!(for_one.len(), 1);
        assert_eq!(for_one[0].message, "from two");
        assert!(channel.unread("1").unwrap().is_empty());

        let for_two = channel.unread("2").unwrap();
        assert_eq!(for_two.len(), 1);
        assert_eq!(for_two[0].sender_id, "1");

        channel.send("2", "again").unwrap();
        let next = channel.unread("1").unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].seq, 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (_tmp, channel) = channel();
        channel.send("1", "first").unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(channel.log_path())
            .unwrap();
        writeln!(file, "not json").unwrap();
        drop(file);
        let second = channel.send("2", "second").unwrap();
        assert_eq!(second.seq, 2);

        let all = channel.read_all().unwrap();
        assert_eq!(all.len(), 2);
        let (since, total) = channel.read_since(1).unwrap();
        assert_eq!(total, 3);
        assert_eq!(since, vec![second]);
    }

    #[test]
    fn invalid_utf8_line_does_not_block_the_log() {
        let (_tmp, channel) = channel();
        channel.send("1", "first").unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(channel.log_path())
            .unwrap();
        file.write_all(b"\xff\xfe garbage\n").unwrap();
        drop(file);

        let second = channel.send("2", "second").unwrap();
        assert_eq!(second.seq, 2);
        let messages: Vec<_> = channel
            .read_all()
            .unwrap()
            .into_iter()
            .map(|env| env.message)
            .collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(channel.unread("3").unwrap().len(), 2);
    }

    #[test]
    fn send_after_partial_line_starts_a_new_line() {
        let (_tmp, channel) = channel();
        channel.send("1", "first").unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(channel.log_path())
            .unwrap();
        file.write_all(br#"{"seq":1,"sender_id":"1","mess"#).unwrap();
        drop(file);

        let second = channel.send("2", "second").unwrap();
        assert_eq!(second.seq, 2);
        let (records, total) = channel.read_since(0).unwrap();
        assert_eq!(total, 3);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], second);
    }

    #[test]
    fn log_lines_counts_unterminated_tail() {
        assert_eq!(log_lines(b"").count(), 0);
        assert_eq!(log_lines(b"a\n").count(), 1);
        assert_eq!(log_lines(b"a\nb").count(), 2);
        assert_eq!(log_lines(b"a\n\nb\n").count(), 3);
    }

    #[test]
    fn malformed_cursor_rereads_from_start() {
        let (tmp, channel) = channel();
        channel.send("2", "hello").unwrap();
        std::fs::create_dir_all(tmp.path().join(CURSOR_DIR)).unwrap();
        std::fs::write(tmp.path().join(CURSOR_DIR).join("1"), "garbage").unwrap();
        assert_eq!(channel.unread("1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn with_blocking_runs_channel_operations() {
        let (_tmp, channel) = channel();
        let sent = channel
            .with_blocking(|c| c.send("1", "from a task"))
            .await
            .unwrap();
        assert_eq!(sent.seq, 0);
        let unread = channel.with_blocking(|c| c.unread("2")).await.unwrap();
        assert_eq!(unread, vec![sent]);
    }

    #[test]
    fn concurrent_senders_do_not_interleave() {
        let (_tmp, channel) = channel();
        let threads: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        channel.send(id, &format!("msg {i}")).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let all = channel.read_all().unwrap();
        assert_eq!(all.len(), 100);
        for (index, env) in all.iter().enumerate() {
            assert_eq!(env.seq, index as u64);
        }
    }
}
