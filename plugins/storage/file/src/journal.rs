use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use catalog_api::{EngineError, ResourceRecord};
use storage_memory::CommitJournal;

// ════════════════════════════════════════════════════════════════
//  On-disk line format
// ════════════════════════════════════════════════════════════════

/// One journal line: every record of one commit that touched this collection.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct JournalLine {
    pub seq: u64,
    pub records: Vec<ResourceRecord>,
}

/// Result of replaying one collection file.
pub(crate) struct Replay {
    pub lines: Vec<JournalLine>,
    /// A torn tail was found and cut off.
    pub truncated: bool,
}

// ════════════════════════════════════════════════════════════════
//  JsonlJournal
// ════════════════════════════════════════════════════════════════

/// Append-only `{collection}.jsonl` files under one directory.
pub(crate) struct JsonlJournal {
    data_dir: PathBuf,
    files: Mutex<HashMap<String, Segment>>,
}

impl JsonlJournal {
    pub(crate) fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), files: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.jsonl"))
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, Segment>> {
        match self.files.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Read every line of a collection's journal. A torn final line is
    /// dropped and truncated away so later appends start on a clean line.
    pub(crate) fn replay(&self, collection: &str) -> Result<Replay, EngineError> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(Replay { lines: Vec::new(), truncated: false });
        }

        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::unavailable(format!("open {}: {e}", path.display())))?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)
            .map_err(|e| EngineError::unavailable(format!("read {}: {e}", path.display())))?;

        let mut lines = Vec::new();
        let mut good_end = 0usize;
        let mut offset = 0usize;
        let mut torn = false;

        while offset < buf.len() {
            let end = buf[offset..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|p| offset + p)
                .unwrap_or(buf.len());
            let raw = &buf[offset..end];
            let next = (end + 1).min(buf.len());

            if raw.iter().all(u8::is_ascii_whitespace) {
                offset = next;
                good_end = next;
                continue;
            }

            match serde_json::from_slice::<JournalLine>(raw) {
                Ok(line) if end < buf.len() => {
                    lines.push(line);
                    good_end = next;
                }
                // Valid but unterminated: keep it, the next append adds the newline.
                Ok(line) => {
                    lines.push(line);
                    good_end = buf.len();
                    torn = true;
                }
                Err(e) if next >= buf.len() => {
                    tracing::warn!(
                        collection,
                        path = %path.display(),
                        error = %e,
                        "ignoring torn journal tail"
                    );
                    torn = true;
                }
                Err(e) => {
                    return Err(EngineError::format_err(format!(
                        "{}: corrupt journal line at byte {offset}: {e}",
                        path.display()
                    )));
                }
            }
            offset = next;
        }

        if torn {
            f.set_len(good_end as u64)
                .map_err(|e| EngineError::unavailable(format!("truncate {}: {e}", path.display())))?;
            if good_end > 0 && buf.get(good_end - 1) != Some(&b'\n') {
                f.seek(SeekFrom::End(0))
                    .map_err(|e| EngineError::unavailable(format!("seek: {e}")))?;
                f.write_all(b"\n")
                    .map_err(|e| EngineError::unavailable(format!("write: {e}")))?;
            }
        }

        Ok(Replay { lines, truncated: torn })
    }

    /// Replace a collection's journal with a single line holding `records`.
    pub(crate) fn compact(&self, collection: &str, seq: u64, records: &[ResourceRecord]) -> Result<(), EngineError> {
        let path = self.path(collection);
        let tmp = self.data_dir.join(format!("{collection}.jsonl.tmp"));

        let mut line = serde_json::to_string(&JournalLineRef { seq, records })?;
        line.push('\n');

        let mut files = self.files();
        files.remove(collection);

        let mut f = File::create(&tmp)
            .map_err(|e| EngineError::unavailable(format!("create {}: {e}", tmp.display())))?;
        f.write_all(line.as_bytes())
            .map_err(|e| EngineError::unavailable(format!("write {}: {e}", tmp.display())))?;
        f.sync_all()
            .map_err(|e| EngineError::unavailable(format!("sync {}: {e}", tmp.display())))?;
        drop(f);

        std::fs::rename(&tmp, &path)
            .map_err(|e| EngineError::unavailable(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    fn open_segment(&self, files: &mut HashMap<String, Segment>, collection: &str) -> Result<(), EngineError> {
        if files.contains_key(collection) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| EngineError::unavailable(format!("mkdir {}: {e}", self.data_dir.display())))?;
        let path = self.path(collection);
        let segment = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(Segment::open)
            .map_err(|e| EngineError::unavailable(format!("open {}: {e}", path.display())))?;
        files.insert(collection.to_string(), segment);
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  Segment
// ════════════════════════════════════════════════════════════════

/// File operations a [`Segment`] needs.
pub(crate) trait SegmentFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl SegmentFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// An append failure. `clean` is false when bytes of the failed line may
/// still be in the file.
#[derive(Debug)]
pub(crate) struct AppendFailure {
    pub error: io::Error,
    pub clean: bool,
}

/// One journal file opened for appending, with the end of its last
/// complete line. Bytes past that end belong to a failed append and are
/// cut off before anything else is written.
pub(crate) struct Segment<F = File> {
    file: F,
    len: u64,
}

impl<F: SegmentFile> Segment<F> {
    pub(crate) fn open(file: F) -> io::Result<Self> {
        let len = file.size()?;
        Ok(Self { file, len })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    fn repair(&mut self) -> io::Result<()> {
        let size = self.file.size()?;
        if size < self.len {
            return Err(io::Error::other(format!("journal shrank to {size} bytes, expected {}", self.len)));
        }
        if size > self.len {
            self.file.truncate(self.len)?;
        }
        Ok(())
    }

    /// Append `line` (newline included) and sync it. On failure the file is
    /// cut back to its previous end.
    pub(crate) fn append(&mut self, line: &[u8]) -> Result<(), AppendFailure> {
        let written = self.repair().and_then(|()| {
            self.file.write_all(line)?;
            self.file.sync()
        });
        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(error) => {
                let clean = self.rewind(self.len);
                Err(AppendFailure { error, clean })
            }
        }
    }

    /// Forget everything after `len`. True when the file now ends there.
    pub(crate) fn rewind(&mut self, len: u64) -> bool {
        self.len = len;
        self.repair().is_ok()
    }
}

#[derive(serde::Serialize)]
struct JournalLineRef<'a> {
    seq: u64,
    records: &'a [ResourceRecord],
}

impl CommitJournal for JsonlJournal {
    fn record(&self, seq: u64, writes: &[(String, ResourceRecord)]) -> Result<(), EngineError> {
        let mut by_collection: Vec<(&str, Vec<ResourceRecord>)> = Vec::new();
        for (collection, record) in writes {
            match by_collection.iter_mut().find(|(c, _)| c == collection) {
                Some((_, records)) => records.push(record.clone()),
                None => by_collection.push((collection.as_str(), vec![record.clone()])),
            }
        }
        let mut lines = Vec::with_capacity(by_collection.len());
        for (collection, records) in &by_collection {
            let mut line = serde_json::to_string(&JournalLineRef { seq, records })?;
            line.push('\n');
            lines.push((*collection, line));
        }

        let mut files = self.files();
        for (collection, _) in &lines {
            self.open_segment(&mut files, collection)?;
        }

        // (collection, end before this commit) of every line already down.
        let mut appended: Vec<(&str, u64)> = Vec::with_capacity(lines.len());
        for (collection, line) in &lines {
            let Some(segment) = files.get_mut(*collection) else {
                return Err(EngineError::new(format!("journal for {collection} not open")));
            };
            let before = segment.len();
            let Err(failure) = segment.append(line.as_bytes()) else {
                appended.push((*collection, before));
                continue;
            };

            let mut clean = failure.clean;
            for (done, len) in appended.drain(..) {
                if let Some(segment) = files.get_mut(done) {
                    clean &= segment.rewind(len);
                }
            }
            let message = format!("append {collection}: {}", failure.error);
            if clean {
                return Err(EngineError::unavailable(message));
            }
            tracing::warn!(collection, error = %failure.error, "journal rollback failed, commit outcome unknown");
            return Err(EngineError::unknown_commit_result(message));
        }
        Ok(())
    }
}
