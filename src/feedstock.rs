//! Feedstock files: newline-delimited JSON, header on line 1, one record per
//! following line. Writers hold an exclusive lock file for their source name.

use crate::error::{MdfError, Result};
use crate::paths::{feedstock_path, lock_path};
use crate::util::{create_new_with_backoff, create_with_backoff, open_with_backoff, remove_with_backoff};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Exclusive claim on a feedstock. The lock file is created with `create_new`,
/// so a second claim fails in this process and in any other. Dropping releases it.
#[derive(Debug)]
pub struct FeedstockLock {
    path: PathBuf,
}

impl FeedstockLock {
    pub fn acquire(feedstock: &Path, source_name: &str) -> Result<Self> {
        let path = lock_path(feedstock);
        match create_new_with_backoff(&path, 8, 25) {
            Ok(mut f) => {
                // Owner pid helps when a crashed run leaves a stale lock behind.
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(MdfError::AlreadyOpen {
                source_name: source_name.to_string(),
                lock: path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FeedstockLock {
    fn drop(&mut self) {
        if let Err(e) = remove_with_backoff(&self.path, 8, 25) {
            tracing::warn!("could not release feedstock lock: {e:#}");
        }
    }
}

/// Buffered, locked NDJSON writer for one source.
pub struct FeedstockWriter {
    path: PathBuf,
    w: Option<BufWriter<File>>,
    lines: u64,
    _lock: FeedstockLock,
}

impl FeedstockWriter {
    /// Lock `<dir>/<source_name>_all.json` and create (truncate) it.
    pub fn create(dir: &Path, source_name: &str, buf_bytes: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = feedstock_path(dir, source_name);
        let lock = FeedstockLock::acquire(&path, source_name)?;
        let f = create_with_backoff(&path, 16, 50)?;
        Ok(Self {
            path,
            w: Some(BufWriter::with_capacity(buf_bytes.max(8 * 1024), f)),
            lines: 0,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Serialize fully before touching the file, so a value that fails to
    /// serialize leaves no partial line behind.
    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        let mut line = serde_json::to_string(v)?;
        line.push('\n');
        self.write_raw(line.as_bytes())?;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let w = self
            .w
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "feedstock writer already finished"))?;
        w.write_all(bytes)?;
        self.lines += 1;
        Ok(())
    }

    /// Flush, keep the file, release the lock.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        if let Some(mut w) = self.w.take() {
            w.flush()?;
        }
        Ok(self.path.clone())
    }

    /// Drop buffered output, delete the file, release the lock.
    pub fn discard(mut self) -> Result<()> {
        drop(self.w.take());
        remove_with_backoff(&self.path, 16, 50)?;
        Ok(())
    }
}

impl Drop for FeedstockWriter {
    fn drop(&mut self) {
        if let Some(mut w) = self.w.take() {
            if let Err(e) = w.flush() {
                tracing::warn!("flush {} on drop: {e}", self.path.display());
            }
        }
    }
}

/// Minimal NDJSON reader with buffering and empty-line skipping.
pub struct FeedstockReader {
    path: PathBuf,
    rdr: BufReader<File>,
    line_no: u64,
    bytes: u64,
}

impl FeedstockReader {
    pub fn open(path: &Path, buf_bytes: usize) -> Result<Self> {
        let f = open_with_backoff(path, 16, 50)
            .map_err(|e| io::Error::new(e.kind(), format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            rdr: BufReader::with_capacity(buf_bytes.max(8 * 1024), f),
            line_no: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-based number of the line most recently returned.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Bytes consumed so far (for progress reporting).
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Read the next line into `buf`. Returns the number of bytes read (0 on EOF).
    /// Strips trailing `\r?\n`.
    pub fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        buf.clear();
        let n = self.rdr.read_line(buf)?;
        if n == 0 {
            return Ok(0);
        }
        self.line_no += 1;
        self.bytes += n as u64;
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        Ok(n)
    }

    /// Next non-blank line decoded as JSON, or `None` at EOF.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        let mut buf = String::new();
        loop {
            if self.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            if buf.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&buf).map(Some).map_err(|e| {
                MdfError::Other(anyhow::anyhow!("{} line {}: {e}", self.path.display(), self.line_no))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_writer_for_same_source_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let w = FeedstockWriter::create(dir.path(), "dup", 8192).unwrap();
        match FeedstockWriter::create(dir.path(), "dup", 8192) {
            Err(MdfError::AlreadyOpen { source_name, .. }) => assert_eq!(source_name, "dup"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("second writer must fail"),
        }
        w.finish().unwrap();
        // Lock released: a new writer may start over.
        FeedstockWriter::create(dir.path(), "dup", 8192).unwrap().finish().unwrap();
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FeedstockWriter::create(dir.path(), "s", 8192).unwrap();
        w.write_value(&json!({"a": 1})).unwrap();
        w.write_value(&json!({"text": "two\nlines"})).unwrap();
        assert_eq!(w.lines(), 2);
        let path = w.finish().unwrap();
        assert!(!lock_path(&path).exists());

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));

        let mut r = FeedstockReader::open(&path, 8192).unwrap();
        assert_eq!(r.next_value().unwrap(), Some(json!({"a": 1})));
        assert_eq!(r.next_value().unwrap(), Some(json!({"text": "two\nlines"})));
        assert_eq!(r.line_no(), 2);
        assert_eq!(r.next_value().unwrap(), None);
        assert_eq!(r.bytes_read(), raw.len() as u64);
    }

    #[test]
    fn discard_removes_file_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FeedstockWriter::create(dir.path(), "gone", 8192).unwrap();
        w.write_value(&json!({})).unwrap();
        let path = w.path().to_path_buf();
        w.discard().unwrap();
        assert!(!path.exists());
        assert!(!lock_path(&path).exists());
    }

    #[test]
    fn malformed_lines_name_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad_all.json");
        fs::write(&p, "{}\n\n{oops\n").unwrap();
        let mut r = FeedstockReader::open(&p, 8192).unwrap();
        r.next_value().unwrap();
        let err = r.next_value().unwrap_err().to_string();
        assert!(err.contains("line 3"), "{err}");
    }
}
