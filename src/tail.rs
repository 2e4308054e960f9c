//! Follows a growing log file from its current end.

use std::fs::{File, Metadata};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Longest line kept. Anything longer is skipped up to its newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Non-blocking source of complete log lines.
pub trait LineSource: Send {
    /// Returns the next complete line without its terminator, or `None` when
    /// nothing new is available yet.
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Tails a file, reopening it from the start after truncation or rotation.
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    identity: Option<FileIdentity>,
    partial: Vec<u8>,
    discarding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl LogTailer {
    /// Opens `path` positioned at its end; existing lines are not replayed.
    pub fn open_at_end(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let identity = file_identity(&file.metadata()?);
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset,
            identity,
            partial: Vec::new(),
            discarding: false,
        })
    }

    /// File being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed from the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reopens from the start if the file at `path` is no longer the one
    /// being read or has been truncated.
    fn check_rotation(&mut self) -> io::Result<()> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "log path missing, waiting for it to reappear");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let replaced = file_identity(&meta) != self.identity;
        let truncated = meta.len() < self.offset;
        if !replaced && !truncated {
            return Ok(());
        }

        let file = File::open(&self.path)?;
        self.identity = file_identity(&file.metadata()?);
        self.reader = BufReader::new(file);
        self.offset = 0;
        self.partial.clear();
        self.discarding = false;
        info!(path = %self.path.display(), replaced, truncated, "log rotated, following new file");
        Ok(())
    }
}

impl LineSource for LogTailer {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let room = (MAX_LINE_BYTES + 1).saturating_sub(self.partial.len()) as u64;
            let read = (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.partial)?;
            self.offset += read as u64;

            if self.partial.last() == Some(&b'\n') {
                let mut bytes = std::mem::take(&mut self.partial);
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                bytes.pop();
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
            }

            if self.partial.len() > MAX_LINE_BYTES {
                if !self.discarding {
                    warn!(
                        path = %self.path.display(),
                        max_bytes = MAX_LINE_BYTES,
                        "oversized log line skipped"
                    );
                }
                self.discarding = true;
                self.partial.clear();
                continue;
            }

            if read == 0 {
                self.check_rotation()?;
            }
            return Ok(None);
        }
    }
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> Option<FileIdentity> {
    None
}
