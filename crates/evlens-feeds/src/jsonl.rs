//! JSON-lines record source.
//!
//! Each line of the file is one serialized [`RawRecord`]. The checkpoint of
//! a record is the byte offset its line starts at, so `seek` is a plain file
//! seek on a fresh handle. A trailing line without a newline is treated as
//! still being written and is left for the live tail.
//!
//! The log name is the file path, for both [`LogKind::File`] and
//! [`LogKind::Live`] logs. Live subscriptions watch the file with `notify`
//! and fall back to polling at [`POLL_INTERVAL`].
//!
//! [`LogKind::File`]: evlens_core::LogKind::File
//! [`LogKind::Live`]: evlens_core::LogKind::Live

use crate::tail::{Rewind, TailControl, Wake};
use evlens_core::error::SourceError;
use evlens_core::source::{LiveSubscriber, LiveSubscription, RecordCallback, RecordIter, RecordSource};
use evlens_core::{Checkpoint, LogSpecifier, RawRecord};
use notify::{RecursiveMode, Watcher};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Reads `.jsonl` event logs from disk.
#[derive(Debug, Clone, Default)]
pub struct JsonlSource {
    root: Option<PathBuf>,
}

impl JsonlSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative log names against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_of(&self, spec: &LogSpecifier) -> PathBuf {
        let path = Path::new(&spec.name);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn open(&self, spec: &LogSpecifier) -> Result<File, SourceError> {
        let path = self.path_of(spec);
        File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(spec.name.clone()),
            std::io::ErrorKind::PermissionDenied => SourceError::Unauthorized(spec.name.clone()),
            _ => SourceError::Io(e),
        })
    }
}

impl RecordSource for JsonlSource {
    fn scan(&self, spec: &LogSpecifier) -> Result<RecordIter, SourceError> {
        self.seek(spec, Checkpoint::from_raw(0))
    }

    fn seek(&self, spec: &LogSpecifier, checkpoint: Checkpoint) -> Result<RecordIter, SourceError> {
        let mut file = self.open(spec)?;
        file.seek(SeekFrom::Start(checkpoint.into_raw()))?;
        Ok(Box::new(LineRecords::new(
            BufReader::new(file),
            checkpoint.into_raw(),
            spec.name.clone(),
        )))
    }
}

/// Iterator over the complete lines of a reader, starting at `offset`.
struct LineRecords<R> {
    reader: R,
    offset: u64,
    log: String,
    line: String,
    done: bool,
}

impl<R: BufRead> LineRecords<R> {
    fn new(reader: R, offset: u64, log: String) -> Self {
        Self {
            reader,
            offset,
            log,
            line: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineRecords<R> {
    type Item = Result<RawRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line) {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(SourceError::Io(e)));
                }
            };
            if read == 0 || !self.line.ends_with('\n') {
                self.done = true;
                return None;
            }

            let at = self.offset;
            self.offset += read as u64;
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            return Some(parse_line(text, at, &self.log));
        }
        None
    }
}

fn parse_line(text: &str, offset: u64, log: &str) -> Result<RawRecord, SourceError> {
    let mut record: RawRecord = serde_json::from_str(text)
        .map_err(|e| SourceError::InvalidData(format!("{log} @ {offset}: {e}")))?;
    if record.log_name.is_empty() {
        record.log_name = log.to_string();
    }
    record.checkpoint = Some(Checkpoint::from_raw(offset));
    Ok(record)
}

// ---------------------------------------------------------------------------
// Live tail
// ---------------------------------------------------------------------------

struct JsonlSubscription {
    control: Arc<TailControl>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl LiveSubscription for JsonlSubscription {
    fn set_enabled(&self, enabled: bool) {
        self.control.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    fn rewind(&self, after: Option<Checkpoint>) {
        self.control.rewind(after);
    }

    fn dispose(&self) {
        // Dropping the watcher stops filesystem notifications.
        self.watcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        self.control.dispose();
    }
}

/// Where the delivery thread reads next.
#[derive(Debug, Clone, Copy)]
enum Resume {
    /// Byte offset of the next line.
    At(u64),
    /// Skip the line starting at this offset, then continue.
    After(u64),
}

impl LiveSubscriber for JsonlSource {
    fn subscribe(
        &self,
        spec: &LogSpecifier,
        from: Option<Checkpoint>,
        on_record: RecordCallback,
    ) -> Result<Box<dyn LiveSubscription>, SourceError> {
        let path = self.path_of(spec);
        let start = match from {
            Some(cp) => Resume::After(cp.into_raw()),
            None => Resume::At(self.open(spec)?.metadata()?.len()),
        };

        let control = Arc::new(TailControl::new());
        let watcher = {
            let control = Arc::clone(&control);
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if res.is_ok() {
                    control.poke();
                }
            })
            .map_err(|e| SourceError::Other(format!("cannot watch {}: {e}", path.display())))?;
            if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                tracing::warn!(path = %path.display(), error = %e, "file watch failed; polling only");
            }
            watcher
        };

        let thread = {
            let control = Arc::clone(&control);
            let log = spec.name.clone();
            std::thread::Builder::new()
                .name(format!("evlens-tail-{}", spec.name))
                .spawn(move || tail_loop(&path, &log, start, &control, &on_record))?
        };
        control.attach_thread(thread);

        tracing::debug!(log = %spec.name, ?from, "jsonl tail started");
        Ok(Box::new(JsonlSubscription {
            control,
            watcher: Mutex::new(Some(watcher)),
        }))
    }
}

fn tail_loop(path: &Path, log: &str, start: Resume, control: &TailControl, on_record: &RecordCallback) {
    let mut resume = start;
    loop {
        match control.wait(POLL_INTERVAL) {
            Wake::Disposed => break,
            Wake::Paused => continue,
            Wake::Ready => {}
        }
        match control.take_rewind() {
            Some(Rewind::Start) => resume = start,
            Some(Rewind::After(cp)) => resume = Resume::After(cp.into_raw()),
            None => {}
        }
        match drain(path, log, resume, control, on_record) {
            Ok(next) => resume = next,
            Err(e) => tracing::debug!(log, error = %e, "tail read failed; retrying"),
        }
    }
    tracing::debug!(log, "jsonl tail stopped");
}

/// Deliver every complete line from `resume`. Returns where to continue.
fn drain(
    path: &Path,
    log: &str,
    resume: Resume,
    control: &TailControl,
    on_record: &RecordCallback,
) -> std::io::Result<Resume> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let (mut offset, skip_first) = match resume {
        Resume::At(offset) => (offset, false),
        Resume::After(offset) => (offset, true),
    };
    if offset > len {
        tracing::warn!(log, offset, len, "file shrank; restarting from the beginning");
        return Ok(Resume::At(0));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();

    if skip_first {
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            return Ok(resume);
        }
        offset += read as u64;
    }

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            return Ok(Resume::At(offset));
        }
        let text = line.trim();
        if !text.is_empty() {
            match parse_line(text, offset, log) {
                Ok(record) => {
                    if !control.deliver(|| on_record(record)) {
                        return Ok(Resume::At(offset));
                    }
                }
                Err(e) => tracing::warn!(log, error = %e, "skipping malformed line"),
            }
        }
        offset += read as u64;
    }
}
