//! Incremental restore: a resumable cursor that parses a bounded batch of
//! `<track>` records per tick so a large backup never stalls the caller's
//! task loop.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};

use super::{candidate_urls, io_error, BackupError, Result, TrackRatingRecord, ROOT_ELEMENT};
use crate::config::AppConfig;
use crate::ops::{OperationGuard, OperationKind};
use crate::schedule::TaskQueue;
use crate::store::RatingStore;

/// Numeric character references, decimal or hex.
static CHAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").unwrap());

const TRACK_END: &str = "</track>";

/// Shared flag a host can set to stop a restore at the next tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Called once a restore has read the whole document, so caches built
/// from ratings can refresh.
#[derive(Clone)]
pub struct CompletionHook(Arc<dyn Fn(RestoreStats) + Send + Sync>);

impl CompletionHook {
    pub fn new(hook: impl Fn(RestoreStats) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    fn notify(&self, stats: RestoreStats) {
        (self.0)(stats)
    }
}

impl std::fmt::Debug for CompletionHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompletionHook")
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Clear every rating before the first record is applied.
    pub clear_first: bool,
    /// Complete `<track>` elements parsed per tick.
    pub batch_size: usize,
    /// Library roots tried for records whose url no longer resolves.
    pub media_dirs: Vec<PathBuf>,
    pub cancel: CancelToken,
    pub on_complete: Option<CompletionHook>,
}

impl RestoreOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            clear_first: config.backup.clear_before_restore,
            batch_size: config.backup.restore_batch_size,
            media_dirs: config.media_dirs.clone(),
            cancel: CancelToken::new(),
            on_complete: None,
        }
    }
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    /// File open, nothing parsed yet.
    Open,
    Streaming,
    Closing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RestoreStats {
    pub restored: usize,
    pub ignored: usize,
}

/// Push-down parse state carried across ticks.
#[derive(Debug, Default)]
struct Accumulator {
    in_track: bool,
    in_value: bool,
    current_key: String,
    record: HashMap<String, String>,
}

impl Accumulator {
    fn reset(&mut self) {
        self.in_track = false;
        self.in_value = false;
        self.current_key.clear();
        self.record.clear();
    }
}

pub struct RestoreCursor {
    path: PathBuf,
    phase: RestorePhase,
    input: Option<BufReader<File>>,
    /// Text read past the last complete `</track>`, parsed next tick.
    pending: String,
    acc: Accumulator,
    stats: RestoreStats,
    guard: Option<OperationGuard>,
    options: RestoreOptions,
    failure: Option<BackupError>,
}

impl RestoreCursor {
    /// Start a restore from `path`.
    ///
    /// Returns `Ok(None)` if a restore is already running or the library
    /// is being scanned. If the file cannot be opened the running flag is
    /// released and the error is returned; no rating has been touched at
    /// that point.
    pub fn open(path: &Path, store: &RatingStore, options: RestoreOptions) -> Result<Option<Self>> {
        let Some(guard) = store.coordinator().try_begin(OperationKind::Restore) else {
            return Ok(None);
        };
        if store.is_scanning() {
            log::warn!("Library scan in progress, not restoring {}", path.display());
            return Ok(None);
        }
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("Cannot open backup {}: {e}", path.display());
                return Err(io_error(path)(e));
            }
        };
        if options.clear_first && !store.clear_all_unguarded() {
            log::warn!("Could not clear ratings before restore, restoring over them");
        }
        log::info!("Restoring ratings from {}", path.display());

        Ok(Some(Self {
            path: path.to_path_buf(),
            phase: RestorePhase::Open,
            input: Some(BufReader::new(file)),
            pending: String::new(),
            acc: Accumulator::default(),
            stats: RestoreStats::default(),
            guard: Some(guard),
            options,
            failure: None,
        }))
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    pub fn stats(&self) -> RestoreStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.phase == RestorePhase::Idle
    }

    /// Parse one batch. Returns `true` while more work is pending.
    pub fn tick(&mut self, store: &RatingStore) -> bool {
        if matches!(self.phase, RestorePhase::Idle | RestorePhase::Closing) {
            return false;
        }
        if self.options.cancel.is_cancelled() {
            log::warn!("Restore of {} cancelled", self.path.display());
            self.close();
            return false;
        }
        self.phase = RestorePhase::Streaming;

        let (chunk, eof) = match self.next_chunk() {
            Ok(read) => read,
            Err(e) => {
                log::error!("Failed reading {}: {e}", self.path.display());
                self.fail(e);
                return false;
            }
        };

        let escaped = percent_escape_char_refs(&chunk);
        match self.feed(&escaped, store) {
            Ok(true) => {
                self.close();
                if let Some(hook) = &self.options.on_complete {
                    hook.notify(self.stats);
                }
                false
            }
            Ok(false) if eof => {
                log::error!("Backup {} ends before </{ROOT_ELEMENT}>", self.path.display());
                self.fail(BackupError::Truncated(self.path.clone()));
                false
            }
            Ok(false) => true,
            Err(e) => {
                log::error!("Malformed backup {}: {e}", self.path.display());
                self.fail(e);
                false
            }
        }
    }

    /// End the restore with an error. A record left half read counts as
    /// ignored.
    fn fail(&mut self, error: BackupError) {
        if self.acc.in_track {
            self.stats.ignored += 1;
        }
        self.failure = Some(error);
        self.close();
    }

    /// Final outcome: the stats, or the error that ended the restore early.
    pub fn finish(mut self) -> Result<RestoreStats> {
        self.close();
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }

    /// Read until `batch_size` complete records are buffered or input
    /// ends. Returns the text up to the last complete record (everything
    /// at EOF) and whether input is exhausted.
    fn next_chunk(&mut self) -> Result<(String, bool)> {
        let Some(input) = self.input.as_mut() else {
            return Ok((std::mem::take(&mut self.pending), true));
        };
        let batch = self.options.batch_size.max(1);
        let mut complete = 0;
        let mut eof = false;
        let mut line = String::new();
        while complete < batch {
            line.clear();
            let n = input.read_line(&mut line).map_err(io_error(&self.path))?;
            if n == 0 {
                eof = true;
                break;
            }
            complete += line.matches(TRACK_END).count();
            self.pending.push_str(&line);
        }

        if eof {
            return Ok((std::mem::take(&mut self.pending), true));
        }
        let cut = self
            .pending
            .rfind(TRACK_END)
            .map(|i| i + TRACK_END.len())
            .unwrap_or(0);
        let rest = self.pending.split_off(cut);
        Ok((std::mem::replace(&mut self.pending, rest), false))
    }

    /// Run the element handlers over one chunk. Returns `true` once the
    /// root element has closed.
    fn feed(&mut self, chunk: &str, store: &RatingStore) -> Result<bool> {
        let mut reader = Reader::from_str(chunk);
        reader.trim_text(true);
        reader.check_end_names(false);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "track" {
                        self.acc.reset();
                        self.acc.in_track = true;
                    } else if self.acc.in_track {
                        self.acc.current_key = name;
                        self.acc.in_value = true;
                    }
                }
                Event::Text(t) => {
                    if self.acc.in_track && self.acc.in_value {
                        let text = t.unescape()?;
                        self.acc
                            .record
                            .entry(self.acc.current_key.clone())
                            .or_default()
                            .push_str(&text);
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"track" => {
                        self.apply_record(store);
                        self.acc.reset();
                    }
                    name if name == ROOT_ELEMENT.as_bytes() => return Ok(true),
                    name => {
                        // Reader end-name checks are off: a chunk may close
                        // the root opened in an earlier chunk
                        if self.acc.in_value && name != self.acc.current_key.as_bytes() {
                            return Err(BackupError::Malformed(format!(
                                "</{}> closes <{}>",
                                String::from_utf8_lossy(name),
                                self.acc.current_key
                            )));
                        }
                        self.acc.in_value = false;
                    }
                },
                Event::Eof => return Ok(false),
                _ => {}
            }
            buf.clear();
        }
    }

    fn apply_record(&mut self, store: &RatingStore) {
        let record = match TrackRatingRecord::from_fields(&self.acc.record) {
            Ok(r) => r,
            Err(reason) => {
                log::warn!("Skipping backup record: {reason}");
                self.stats.ignored += 1;
                return;
            }
        };
        match self.resolve(store, &record) {
            Some(url) if store.write(&url, record.rating) => {
                log::trace!("Restored {url}: {}", record.rating);
                self.stats.restored += 1;
            }
            Some(url) => {
                log::warn!("Could not restore rating of {url}");
                self.stats.ignored += 1;
            }
            None => {
                log::debug!("No library track for {}", record.url);
                self.stats.ignored += 1;
            }
        }
    }

    /// Catalog url for a record: its own url, else its relative path
    /// under each library root.
    fn resolve(&self, store: &RatingStore, record: &TrackRatingRecord) -> Option<String> {
        let lookup = |url: &str| match store.db().catalog_by_url(url) {
            Ok(found) => found.map(|t| t.url),
            Err(e) => {
                log::error!("Catalog lookup failed for {url}: {e}");
                None
            }
        };
        if let Some(url) = lookup(record.url.as_str()) {
            return Some(url);
        }
        let rel = record.relurl.as_deref()?;
        candidate_urls(rel, &self.options.media_dirs)
            .iter()
            .find_map(|candidate| lookup(candidate.as_str()))
    }

    /// Every terminal path ends here: input dropped, parse state reset,
    /// running flag released.
    fn close(&mut self) {
        if self.phase == RestorePhase::Idle {
            return;
        }
        self.phase = RestorePhase::Closing;
        self.input = None;
        self.pending.clear();
        self.acc.reset();
        if self.guard.take().is_some() {
            log::info!(
                "Restore of {} done: {} restored, {} ignored",
                self.path.display(),
                self.stats.restored,
                self.stats.ignored
            );
        }
        self.phase = RestorePhase::Idle;
    }
}

impl Drop for RestoreCursor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Replace `&#NNN;` references with the percent-encoded UTF-8 of the
/// character, matching how url fields are written.
fn percent_escape_char_refs(text: &str) -> Cow<'_, str> {
    CHAR_REF.replace_all(text, |caps: &Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) => {
                let mut utf8 = [0u8; 4];
                urlencoding::encode(c.encode_utf8(&mut utf8)).into_owned()
            }
            None => caps[0].to_string(),
        }
    })
}

/// Run a whole restore through a task queue. `Ok(None)` if a restore is
/// already running.
pub fn restore_file(path: &Path, store: &RatingStore, options: RestoreOptions) -> Result<Option<RestoreStats>> {
    let Some(mut cursor) = RestoreCursor::open(path, store, options)? else {
        return Ok(None);
    };
    {
        let mut queue = TaskQueue::new();
        queue.push("restore", || cursor.tick(store));
        let ticks = queue.run_until_idle();
        log::debug!("Restore took {ticks} ticks");
    }
    cursor.finish().map(Some)
}
