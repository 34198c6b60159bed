//! In-memory session state: per-category selections, batch history, and the
//! background worker that runs one batch at a time.

use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::batch::{BatchConverter, BatchEvent, BatchSummary};
use crate::config::AppConfig;
use crate::error::{ConvertError, Result};
use crate::{Category, ConversionOptions, ConversionRequest};

/// Ordered list of files picked for one category. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    paths: Vec<PathBuf>,
}

impl Selection {
    pub fn add<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// "3 files selected", "1 file selected", "No files selected"
    pub fn describe(&self) -> String {
        match self.paths.len() {
            0 => "No files selected".to_string(),
            1 => "1 file selected".to_string(),
            n => format!("{} files selected", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub at: DateTime<Local>,
    pub summary: String,
}

impl HistoryEntry {
    pub fn for_batch(summary: &BatchSummary) -> Self {
        Self {
            at: Local::now(),
            summary: format!(
                "{} -> {}: {}/{} successful",
                summary.category,
                summary.target_format,
                summary.succeeded,
                summary.total
            ),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.summary)
    }
}

/// Most recent batches, newest first, capped at `limit`.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(10)
    }
}

/// A batch running on its worker thread.
pub struct BatchHandle {
    events: Receiver<BatchEvent>,
    worker: JoinHandle<Result<BatchSummary>>,
}

impl BatchHandle {
    /// Every event of the batch, in order; the iterator ends when the worker does.
    pub fn events(&self) -> mpsc::Iter<'_, BatchEvent> {
        self.events.iter()
    }

    /// Non-blocking poll, for callers that own an event loop.
    pub fn try_event(&self) -> Option<BatchEvent> {
        self.events.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// Clears the in-flight flag however the worker exits.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// UI-side state. Only the owning thread mutates it; the worker talks back through a channel.
pub struct Session {
    config: AppConfig,
    selections: HashMap<Category, Selection>,
    history: History,
    output_dir: PathBuf,
    options: ConversionOptions,
    in_flight: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: AppConfig) -> Self {
        Self {
            selections: HashMap::new(),
            history: History::new(config.history_limit),
            output_dir: config.output_dir.clone(),
            options: ConversionOptions::from_config(&config),
            in_flight: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn add_files<I, P>(&mut self, category: Category, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.selections.entry(category).or_default().add(paths);
    }

    pub fn clear_files(&mut self, category: Category) {
        if let Some(selection) = self.selections.get_mut(&category) {
            selection.clear();
        }
    }

    pub fn selection(&self, category: Category) -> Option<&Selection> {
        self.selections.get(&category)
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.output_dir = dir.into();
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn set_options(&mut self, options: ConversionOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot the current selection and settings into a request.
    pub fn request(&self, category: Category, target_format: &str) -> ConversionRequest {
        let inputs = self
            .selections
            .get(&category)
            .map(|s| s.paths().to_vec())
            .unwrap_or_default();
        ConversionRequest::new(category, target_format, self.output_dir.clone())
            .with_inputs(inputs)
            .with_options(self.options.clone())
    }

    /// Start converting the current selection of `category` on a worker thread.
    pub fn start(&self, category: Category, target_format: &str) -> Result<BatchHandle> {
        self.start_request(self.request(category, target_format))
    }

    pub fn start_request(&self, request: ConversionRequest) -> Result<BatchHandle> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(ConvertError::BatchInFlight);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let converter = BatchConverter::with_config(self.config.clone());
        let (tx, rx) = mpsc::channel();

        debug!(category = %request.category, files = request.inputs.len(), "spawning batch worker");
        let worker = thread::spawn(move || {
            let _guard = guard;
            // A dropped receiver only means nobody is watching; keep converting.
            converter.run(&request, |event| {
                let _ = tx.send(event);
            })
        });

        Ok(BatchHandle {
            events: rx,
            worker,
        })
    }

    /// Wait for the worker and record the batch in the history.
    pub fn finish(&mut self, handle: BatchHandle) -> Result<BatchSummary> {
        let BatchHandle { events, worker } = handle;
        drop(events);
        let summary = worker.join().map_err(|_| {
            error!("batch worker panicked");
            ConvertError::WorkerPanicked
        })??;
        self.history.push(HistoryEntry::for_batch(&summary));
        Ok(summary)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn selection_keeps_order_and_duplicates() {
        let mut sel = Selection::default();
        assert_eq!(sel.describe(), "No files selected");
        sel.add(["b.png", "a.png", "b.png"]);
        assert_eq!(
            sel.paths(),
            &[PathBuf::from("b.png"), PathBuf::from("a.png"), PathBuf::from("b.png")]
        );
        assert_eq!(sel.describe(), "3 files selected");
        sel.clear();
        assert!(sel.is_empty());
    }

    #[test]
    fn history_is_capped_newest_first() {
        let mut history = History::new(10);
        for i in 0..15 {
            history.push(HistoryEntry {
                at: Local::now(),
                summary: format!("batch {}", i),
            });
        }
        assert_eq!(history.len(), 10);
        let first: Vec<&str> = history.entries().map(|e| e.summary.as_str()).take(2).collect();
        assert_eq!(first, vec!["batch 14", "batch 13"]);
        assert_eq!(history.entries().last().unwrap().summary, "batch 5");
    }

    #[test]
    fn selections_are_per_category() {
        let mut session = Session::default();
        session.add_files(Category::Images, ["a.png"]);
        session.add_files(Category::Audio, ["a.wav", "b.wav"]);
        session.clear_files(Category::Images);
        assert!(session.selection(Category::Images).unwrap().is_empty());
        assert_eq!(session.selection(Category::Audio).unwrap().len(), 2);
        assert!(session.selection(Category::Video).is_none());
    }

    #[test]
    fn background_batch_reports_and_records_history() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("people.csv");
        fs::write(&input, "name,age\nann,31\n").unwrap();

        let mut session = Session::default();
        session.set_output_dir(dir.path().join("out"));
        session.add_files(Category::Documents, [&input]);

        let handle = session.start(Category::Documents, "json").unwrap();
        let events: Vec<BatchEvent> = handle.events().collect();
        assert!(matches!(events.last(), Some(BatchEvent::Finished(_))));

        let summary = session.finish(handle).unwrap();
        assert_eq!((summary.succeeded, summary.total), (1, 1));
        assert!(dir.path().join("out/people.json").exists());
        assert_eq!(session.history().len(), 1);
        assert!(!session.is_busy());
    }

    #[test]
    fn polled_batch_delivers_every_event() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("notes.csv");
        fs::write(&input, "k,v\nx,1\n").unwrap();

        let mut session = Session::default();
        session.set_output_dir(dir.path().join("out"));
        session.add_files(Category::Documents, [&input]);

        let handle = session.start(Category::Documents, "txt").unwrap();
        while !handle.is_finished() {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        let mut events = Vec::new();
        while let Some(event) = handle.try_event() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(BatchEvent::Progress(_))));
        assert!(matches!(events.last(), Some(BatchEvent::Finished(_))));
        assert!(handle.try_event().is_none());
        assert_eq!(session.finish(handle).unwrap().succeeded, 1);
    }

    #[test]
    fn settings_start_from_config() {
        let config = AppConfig {
            quality: 60,
            include_headers: false,
            history_limit: 3,
            ..AppConfig::default()
        };
        let mut session = Session::new(config.clone());
        assert_eq!(session.config(), &config);
        assert_eq!(session.options().quality, 60);
        assert!(!session.options().include_headers);

        session.set_options(ConversionOptions::default().with_quality(10));
        assert_eq!(session.options().quality, 10);
        assert_eq!(session.config().quality, 60);
        let request = session.request(Category::Images, "PNG");
        assert_eq!(request.options.quality, 10);
        assert_eq!(request.target_format, "png");
    }

    #[test]
    fn second_batch_is_refused_while_busy() {
        let session = Session::default();
        session.in_flight.store(true, Ordering::SeqCst);
        assert!(matches!(session.start(Category::Images, "png"), Err(ConvertError::BatchInFlight)));
    }

    #[test]
    fn setup_failure_surfaces_from_finish() {
        let mut session = Session::default();
        let handle = session.start(Category::Images, "png").unwrap();
        assert!(matches!(session.finish(handle), Err(ConvertError::NoFiles)));
        assert!(session.history().is_empty());
    }
}
