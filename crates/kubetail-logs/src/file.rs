use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{FollowEnd, LineSource};
use kubetail_types::{Result, SourceIdentity, TailError};

/// How often a followed file is checked for changes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Modification time and size, as last observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(metadata: &Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        }
    }
}

/// Tails a local file: reverse-seek for history, change polling for follow
pub struct FileTailer {
    identity: SourceIdentity,
    file: File,
    poll_interval: Duration,

    /// End of the bytes already handed out
    offset: u64,

    observed: Option<FileStamp>,

    /// Bytes of a line whose newline has not been written yet
    pending: Vec<u8>,
}

impl FileTailer {
    /// Open `path` for tailing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TailError::NotFound(format!("{} not found", path.display())),
            _ => TailError::Io(e),
        })?;

        Ok(Self {
            identity: SourceIdentity::File(path.to_path_buf()),
            file,
            poll_interval: DEFAULT_POLL_INTERVAL,
            offset: 0,
            observed: None,
            pending: Vec::new(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The last `n` lines of the file, oldest first.
    ///
    /// Only the bytes from the computed start offset to the current end are
    /// read; following resumes from that end.
    pub fn read_last_lines(&mut self, n: usize) -> Result<Vec<String>> {
        let metadata = self.file.metadata()?;
        let len = metadata.len();
        self.observed = Some(FileStamp::of(&metadata));
        self.offset = len;
        self.pending.clear();

        if len == 0 || n == 0 {
            return Ok(Vec::new());
        }

        let start = tail_offset(&mut self.file, len, n)?;
        self.file.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::with_capacity((len - start) as usize);
        (&self.file).take(len - start).read_to_end(&mut buf)?;

        let text = String::from_utf8_lossy(&buf);
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(n);

        Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
    }

    /// Check the file once and return the complete lines appended since the
    /// last read
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let stamp = match self.file.metadata() {
            Ok(metadata) => FileStamp::of(&metadata),
            Err(e) => {
                debug!(source = %self.identity, error = %e, "cannot stat followed file");
                return Ok(Vec::new());
            }
        };

        if self.observed == Some(stamp) {
            return Ok(Vec::new());
        }

        if stamp.len < self.offset {
            debug!(source = %self.identity, "file truncated, reading from the start");
            self.offset = 0;
            self.pending.clear();
        }

        self.file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        let read = (&self.file).take(stamp.len - self.offset).read_to_end(&mut buf)?;
        self.offset += read as u64;
        self.observed = Some(stamp);

        Ok(self.complete_lines(&buf))
    }

    /// Poll until `cancel` fires, handing each new line to `on_line` as soon
    /// as it is read
    pub async fn follow_lines<F>(
        &mut self,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> Result<FollowEnd>
    where
        F: FnMut(String) + Send,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(FollowEnd::Cancelled),
                _ = ticker.tick() => {}
            }

            for line in self.poll()? {
                on_line(line);
            }
        }
    }

    fn complete_lines(&mut self, appended: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(appended);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl LineSource for FileTailer {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    async fn last_lines(&mut self, n: usize) -> Result<Vec<String>> {
        self.read_last_lines(n)
    }

    async fn follow<F>(&mut self, cancel: &CancellationToken, on_line: F) -> Result<FollowEnd>
    where
        F: FnMut(String) + Send,
    {
        self.follow_lines(cancel, on_line).await
    }
}

/// Offset where the last `n` lines of a `len`-byte reader begin.
///
/// Walks backward from the end one byte at a time, counting newlines, and
/// stops once more than `n` have been seen or the start is reached. Nothing
/// before the returned offset, other than the newline right before it, is read.
fn tail_offset<R: Read + Seek>(reader: &mut R, len: u64, n: usize) -> io::Result<u64> {
    let mut newlines = 0;
    let mut pos = len;
    let mut byte = [0u8; 1];

    while pos > 0 {
        pos -= 1;
        reader.seek(SeekFrom::Start(pos))?;
        reader.read_exact(&mut byte)?;

        if byte[0] == b'\n' {
            newlines += 1;
            if newlines > n {
                return Ok(pos + 1);
            }
        }
    }

    Ok(0)
}
