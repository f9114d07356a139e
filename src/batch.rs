//! Batch orchestration.
//!
//! A [`BatchJob`] owns the ordered file selection for one schema and drives
//! every file through the parse pipeline. Records accumulate in memory and
//! are released to a [`SubmissionSink`] exactly once, only after every file
//! parsed cleanly. Any failure discards the accumulator, so a batch is
//! either submitted whole or not at all.
//!
//! File bytes are read ahead on scoped threads (up to `prefetch` at a time);
//! parsing stays serial and in selection order so the first error reported
//! is always the one from the earliest failing file.

use std::{
    collections::VecDeque,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{IngestError, IngestResult},
    io_utils,
    pipeline::{self, FileReport},
    record::CanonicalRecord,
    schema::SchemaDescriptor,
    sink::{SubmissionReceipt, SubmissionSink},
};

pub const DEFAULT_PREFETCH: usize = 4;

/// Anything that can supply the raw bytes of one selected file.
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;
    fn read(&self) -> std::io::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
    name: String,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = io_utils::display_name(&path);
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for PathSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// Shared flag checked before each file is processed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Stop at the first failing file.
    #[default]
    FailFast,
    /// Parse every file and report all failures together.
    CollectAll,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub error_mode: ErrorMode,
    pub strict_columns: bool,
    pub prefetch: usize,
    pub encoding: &'static Encoding,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::FailFast,
            strict_columns: false,
            prefetch: DEFAULT_PREFETCH,
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Zero-based index of the file being parsed.
    Processing(usize),
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing(idx) => write!(f, "processing file {}", idx + 1),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub job_id: Uuid,
    pub schema: String,
    pub files: Vec<FileReport>,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<SubmissionReceipt>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record(s) from {} file(s) for schema '{}'",
            self.records,
            self.files.len(),
            self.schema
        )
    }
}

/// Records of a fully parsed batch, not yet submitted.
#[derive(Debug)]
pub struct BatchOutput {
    summary: BatchSummary,
    records: Vec<CanonicalRecord>,
}

impl BatchOutput {
    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    /// Hands every record to `sink` in one call.
    pub fn submit(self, sink: &mut dyn SubmissionSink) -> IngestResult<BatchSummary> {
        let BatchOutput {
            mut summary,
            records,
        } = self;
        let count = records.len();
        let receipt = sink
            .submit(&summary.schema, records)
            .map_err(|err| IngestError::Submission {
                schema: summary.schema.clone(),
                records: count,
                message: format!("{err:#}"),
            })?;
        info!("Job {} submitted {receipt}", summary.job_id);
        summary.receipt = Some(receipt);
        Ok(summary)
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }
}

pub struct BatchJob<'a> {
    id: Uuid,
    schema: &'a SchemaDescriptor,
    files: Vec<Box<dyn FileSource>>,
    options: BatchOptions,
    state: JobState,
    progress: Vec<String>,
}

impl<'a> BatchJob<'a> {
    pub fn new(
        schema: &'a SchemaDescriptor,
        files: Vec<Box<dyn FileSource>>,
        options: BatchOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema,
            files,
            options,
            state: JobState::Pending,
            progress: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Human-readable progress lines, one per completed file.
    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name()).collect()
    }

    /// Parses every file, then submits the accumulated records to `sink`.
    pub fn run(
        &mut self,
        sink: &mut dyn SubmissionSink,
        cancel: &CancellationToken,
    ) -> IngestResult<BatchSummary> {
        let output = self.execute(cancel)?;
        let result = output.submit(sink);
        if result.is_err() {
            self.state = JobState::Failed;
        }
        result
    }

    /// Parses every file without submitting.
    pub fn execute(&mut self, cancel: &CancellationToken) -> IngestResult<BatchOutput> {
        if self.state != JobState::Pending {
            warn!("Job {} re-run from state {}", self.id, self.state);
            self.progress.clear();
        }
        info!(
            "Job {} started: schema '{}', {} file(s)",
            self.id,
            self.schema.id(),
            self.files.len()
        );
        match self.parse_all(cancel) {
            Ok(output) => {
                self.state = JobState::Succeeded;
                info!("Job {} parsed {}", self.id, output.summary);
                Ok(output)
            }
            Err(err) => {
                self.state = JobState::Failed;
                warn!("Job {} failed: {err}", self.id);
                Err(err)
            }
        }
    }

    fn preflight(&self) -> IngestResult<()> {
        let schema = self.schema;
        if self.files.is_empty() {
            return Err(IngestError::EmptyBatch {
                schema: schema.id().to_string(),
            });
        }
        if self.files.len() > 1 && !schema.allows_multiple_files() {
            return Err(IngestError::MultipleFilesNotAllowed {
                schema: schema.id().to_string(),
                count: self.files.len(),
            });
        }
        let mut errors = self
            .files
            .iter()
            .filter(|f| !io_utils::has_extension(f.name(), schema.extension()))
            .map(|f| IngestError::UnsupportedFileType {
                file: f.name().to_string(),
                schema: schema.id().to_string(),
                expected: schema.extension().to_string(),
            })
            .collect::<Vec<_>>();
        match (self.options.error_mode, errors.len()) {
            (_, 0) => Ok(()),
            (ErrorMode::FailFast, _) | (_, 1) => Err(errors.remove(0)),
            (ErrorMode::CollectAll, _) => Err(IngestError::Multiple(errors)),
        }
    }

    fn parse_all(&mut self, cancel: &CancellationToken) -> IngestResult<BatchOutput> {
        self.preflight()?;

        let total = self.files.len();
        let window = self.options.prefetch.max(1);
        let mut pending: VecDeque<IngestResult<Vec<u8>>> = VecDeque::with_capacity(window);
        let mut accumulator: Vec<CanonicalRecord> = Vec::new();
        let mut reports: Vec<FileReport> = Vec::with_capacity(total);
        let mut errors: Vec<IngestError> = Vec::new();

        for idx in 0..total {
            let name = self.files[idx].name().to_string();
            if cancel.is_cancelled() {
                warn!("Job {} cancelled before {name}", self.id);
                return Err(IngestError::Cancelled {
                    file: name,
                    processed: idx,
                    total,
                });
            }
            if pending.is_empty() {
                let end = (idx + window).min(total);
                pending.extend(read_window(&self.files[idx..end]));
            }
            self.state = JobState::Processing(idx);

            let bytes = pending.pop_front().unwrap_or_else(|| Err(read_error(&name, "not read")));
            match bytes.and_then(|bytes| self.parse_one(&name, &bytes)) {
                Ok(parsed) => {
                    let line = format!(
                        "file {} of {total}: {name}: {} record(s)",
                        idx + 1,
                        parsed.report.records
                    );
                    info!("{line}");
                    self.progress.push(line);
                    accumulator.extend(parsed.records);
                    reports.push(parsed.report);
                }
                Err(err) => match self.options.error_mode {
                    ErrorMode::FailFast => return Err(err),
                    ErrorMode::CollectAll => {
                        warn!("{err}");
                        errors.push(err);
                    }
                },
            }
        }

        if !errors.is_empty() {
            return Err(if errors.len() == 1 {
                errors.remove(0)
            } else {
                IngestError::Multiple(errors)
            });
        }

        let summary = BatchSummary {
            job_id: self.id,
            schema: self.schema.id().to_string(),
            records: accumulator.len(),
            files: reports,
            receipt: None,
        };
        Ok(BatchOutput {
            summary,
            records: accumulator,
        })
    }

    fn parse_one(&self, name: &str, bytes: &[u8]) -> IngestResult<pipeline::ParsedFile> {
        let text = io_utils::decode_bytes(bytes, self.options.encoding)
            .map_err(|err| read_error(name, &format!("{err:#}")))?;
        debug!("{name}: decoded {} byte(s)", bytes.len());
        pipeline::parse_file(self.schema, name, &text, self.options.strict_columns)
    }
}

/// Reads a run of sources concurrently, preserving their order.
fn read_window(sources: &[Box<dyn FileSource>]) -> Vec<IngestResult<Vec<u8>>> {
    if sources.len() == 1 {
        return vec![read_source(sources[0].as_ref())];
    }
    thread::scope(|scope| {
        let handles = sources
            .iter()
            .map(|source| (source.name(), scope.spawn(move || read_source(source.as_ref()))))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|(name, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(read_error(name, "reader thread panicked")))
            })
            .collect()
    })
}

fn read_source(source: &dyn FileSource) -> IngestResult<Vec<u8>> {
    source
        .read()
        .map_err(|err| read_error(source.name(), &err.to_string()))
}

fn read_error(name: &str, message: &str) -> IngestError {
    IngestError::FileRead {
        file: name.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::{registry::SchemaRegistry, sink::MemorySink};

    const SKU_HEADER: &str = "MSKU,Start Date,Units Sold,Net Sales\n";

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    fn source(name: &str, body: &str) -> Box<dyn FileSource> {
        Box::new(MemorySource::new(name, body.as_bytes().to_vec()))
    }

    fn good(name: &str, sku: &str) -> Box<dyn FileSource> {
        source(name, &format!("{SKU_HEADER}{sku},2024-03-01,4,$10.00\n"))
    }

    struct FailingSink;

    impl SubmissionSink for FailingSink {
        fn submit(&mut self, _: &str, _: Vec<CanonicalRecord>) -> anyhow::Result<SubmissionReceipt> {
            Err(anyhow!("downstream rejected the batch"))
        }
    }

    #[test]
    fn successful_batch_submits_once_in_file_order() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let files = vec![good("a.csv", "A"), good("b.csv", "B"), good("c.csv", "C")];
        let mut job = BatchJob::new(schema, files, BatchOptions::default());
        let mut sink = MemorySink::new();
        let summary = job.run(&mut sink, &CancellationToken::new()).unwrap();

        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(summary.records, 3);
        assert_eq!(sink.submissions().len(), 1);
        let skus = sink.submissions()[0]
            .1
            .iter()
            .map(|r| r.get("msku").unwrap().as_display())
            .collect::<Vec<_>>();
        assert_eq!(skus, vec!["A", "B", "C"]);
        assert_eq!(job.progress()[1], "file 2 of 3: b.csv: 1 record(s)");
    }

    #[test]
    fn failure_in_second_file_submits_nothing() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let files = vec![
            good("a.csv", "A"),
            source("b.csv", "nothing useful here\n"),
            good("c.csv", "C"),
        ];
        let mut job = BatchJob::new(schema, files, BatchOptions::default());
        let mut sink = MemorySink::new();
        let err = job.run(&mut sink, &CancellationToken::new()).unwrap_err();

        assert_eq!(err.file(), Some("b.csv"));
        assert_eq!(job.state(), JobState::Failed);
        assert!(sink.submissions().is_empty());
    }

    #[test]
    fn collect_all_reports_every_failing_file() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let files = vec![
            source("a.csv", "junk\n"),
            good("b.csv", "B"),
            source("c.csv", &format!("{SKU_HEADER},2024-03-01,1,1\n")),
        ];
        let options = BatchOptions {
            error_mode: ErrorMode::CollectAll,
            ..BatchOptions::default()
        };
        let mut job = BatchJob::new(schema, files, options);
        let err = job.execute(&CancellationToken::new()).unwrap_err();
        let IngestError::Multiple(errors) = err else {
            panic!("expected multiple errors");
        };
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], IngestError::HeaderNotFound { .. }));
        assert!(matches!(
            errors[1],
            IngestError::RequiredFieldMissing { row: 1, .. }
        ));
    }

    #[test]
    fn cancelled_job_never_submits() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut job = BatchJob::new(schema, vec![good("a.csv", "A")], BatchOptions::default());
        let mut sink = MemorySink::new();
        let err = job.run(&mut sink, &cancel).unwrap_err();
        assert!(matches!(err, IngestError::Cancelled { processed: 0, .. }));
        assert!(sink.submissions().is_empty());
    }

    /// Raises the token while its own bytes are being read.
    struct CancelOnRead {
        inner: MemorySource,
        token: CancellationToken,
    }

    impl FileSource for CancelOnRead {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn read(&self) -> std::io::Result<Vec<u8>> {
            self.token.cancel();
            self.inner.read()
        }
    }

    #[test]
    fn cancel_between_files_discards_parsed_records() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let cancel = CancellationToken::new();
        let first = CancelOnRead {
            inner: MemorySource::new("a.csv", format!("{SKU_HEADER}A,2024-03-01,4,$10.00\n")),
            token: cancel.clone(),
        };
        let files = vec![Box::new(first) as Box<dyn FileSource>, good("b.csv", "B")];
        let options = BatchOptions {
            prefetch: 1,
            ..BatchOptions::default()
        };
        let mut job = BatchJob::new(schema, files, options);
        let mut sink = MemorySink::new();
        let err = job.run(&mut sink, &cancel).unwrap_err();

        assert!(matches!(
            err,
            IngestError::Cancelled { processed: 1, total: 2, ref file } if file == "b.csv"
        ));
        assert_eq!(job.progress().len(), 1);
        assert_eq!(job.state(), JobState::Failed);
        assert!(sink.submissions().is_empty());
    }

    #[test]
    fn wrong_extension_fails_before_reading() {
        let registry = registry();
        let schema = registry.get("sales").unwrap();
        let mut job = BatchJob::new(schema, vec![good("orders.csv", "A")], BatchOptions::default());
        let err = job.execute(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType { ref expected, .. } if expected == "txt"));
    }

    #[test]
    fn single_file_schema_rejects_multiple_files() {
        let registry = registry();
        let schema = registry.get("account_mapping").unwrap();
        let files = vec![source("a.csv", ""), source("b.csv", "")];
        let mut job = BatchJob::new(schema, files, BatchOptions::default());
        assert!(matches!(
            job.execute(&CancellationToken::new()),
            Err(IngestError::MultipleFilesNotAllowed { count: 2, .. })
        ));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let registry = registry();
        let schema = registry.get("sales").unwrap();
        let mut job = BatchJob::new(schema, Vec::new(), BatchOptions::default());
        assert!(matches!(
            job.execute(&CancellationToken::new()),
            Err(IngestError::EmptyBatch { .. })
        ));
    }

    #[test]
    fn sink_failure_is_a_submission_error() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        let mut job = BatchJob::new(schema, vec![good("a.csv", "A")], BatchOptions::default());
        let err = job
            .run(&mut FailingSink, &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_submission_failure());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn prefetch_window_does_not_change_results() {
        let registry = registry();
        let schema = registry.get("sku_economics").unwrap();
        for prefetch in [0, 1, 2, 8] {
            let files = (0..5)
                .map(|i| good(&format!("f{i}.csv"), &format!("S{i}")))
                .collect::<Vec<_>>();
            let options = BatchOptions {
                prefetch,
                ..BatchOptions::default()
            };
            let mut job = BatchJob::new(schema, files, options);
            let output = job.execute(&CancellationToken::new()).unwrap();
            let skus = output
                .records()
                .iter()
                .map(|r| r.get("msku").unwrap().as_display())
                .collect::<Vec<_>>();
            assert_eq!(skus, vec!["S0", "S1", "S2", "S3", "S4"]);
        }
    }
}
