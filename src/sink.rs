//! Downstream submission targets.
//!
//! A [`SubmissionSink`] receives the full record set of a successful batch in
//! a single call. Sinks report failures with `anyhow`; the batch layer turns
//! them into [`IngestError::Submission`](crate::error::IngestError).

use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use serde::Serialize;

use crate::{io_utils, record::CanonicalRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub accepted: usize,
    pub destination: String,
}

impl fmt::Display for SubmissionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} record(s) to {}", self.accepted, self.destination)
    }
}

pub trait SubmissionSink {
    fn submit(
        &mut self,
        schema_id: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<SubmissionReceipt>;
}

/// Keeps every submission in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    submissions: Vec<(String, Vec<CanonicalRecord>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> &[(String, Vec<CanonicalRecord>)] {
        &self.submissions
    }

    pub fn into_submissions(self) -> Vec<(String, Vec<CanonicalRecord>)> {
        self.submissions
    }
}

impl SubmissionSink for MemorySink {
    fn submit(
        &mut self,
        schema_id: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<SubmissionReceipt> {
        let accepted = records.len();
        self.submissions.push((schema_id.to_string(), records));
        Ok(SubmissionReceipt {
            accepted,
            destination: "memory".to_string(),
        })
    }
}

#[derive(Serialize)]
struct JsonSubmission<'a> {
    schema: &'a str,
    count: usize,
    records: &'a [CanonicalRecord],
}

/// Writes `{"schema", "count", "records"}` as pretty JSON to a file or stdout.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: Option<PathBuf>,
}

impl JsonFileSink {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
        }
    }
}

impl SubmissionSink for JsonFileSink {
    fn submit(
        &mut self,
        schema_id: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<SubmissionReceipt> {
        let mut writer = io_utils::open_output(self.path.as_deref())?;
        let payload = JsonSubmission {
            schema: schema_id,
            count: records.len(),
            records: &records,
        };
        serde_json::to_writer_pretty(&mut writer, &payload).context("Serialising records")?;
        writeln!(writer)?;
        writer.flush().context("Flushing JSON output")?;
        let receipt = SubmissionReceipt {
            accepted: records.len(),
            destination: destination_label(self.path.as_deref()),
        };
        info!("Wrote {receipt}");
        Ok(receipt)
    }
}

/// Writes records as delimited text. Columns are the union of record keys in
/// first-seen order.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: Option<PathBuf>,
    delimiter: u8,
}

impl CsvFileSink {
    pub fn new(path: Option<&Path>, delimiter: u8) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            delimiter,
        }
    }
}

impl SubmissionSink for CsvFileSink {
    fn submit(&mut self, _schema_id: &str, records: Vec<CanonicalRecord>) -> Result<SubmissionReceipt> {
        let columns = records
            .iter()
            .flat_map(|record| record.keys())
            .unique()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut writer = io_utils::open_csv_writer(self.path.as_deref(), self.delimiter)?;
        writer.write_record(&columns).context("Writing header row")?;
        for record in &records {
            let row = columns
                .iter()
                .map(|column| record.get(column).map(|v| v.as_display()).unwrap_or_default());
            writer.write_record(row).context("Writing record")?;
        }
        writer.flush().context("Flushing output")?;

        let receipt = SubmissionReceipt {
            accepted: records.len(),
            destination: destination_label(self.path.as_deref()),
        };
        info!("Wrote {receipt}");
        Ok(receipt)
    }
}

fn destination_label(path: Option<&Path>) -> String {
    match path {
        Some(p) if !io_utils::is_dash(p) => p.display().to_string(),
        _ => "stdout".to_string(),
    }
}
