#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use report_ingest::{SchemaRegistry, batch::FileSource, batch::MemorySource};
use tempfile::{TempDir, tempdir};

pub const SALES_HEADER: &str = "amazon-order-id\tpurchase-date\tsales-channel\tsku\tquantity\titem-price";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin().expect("built-in registry")
}

/// Tab-delimited sales report with one row per `(order id, channel)`.
pub fn sales_report(rows: &[(&str, &str)]) -> String {
    let mut text = format!("{SALES_HEADER}\n");
    for (order_id, channel) in rows {
        text.push_str(&format!(
            "{order_id}\t2024-05-01T10:15:00-07:00\t{channel}\tSKU-{order_id}\t1\t19.99\n"
        ));
    }
    text
}

pub fn memory_file(name: &str, body: &str) -> Box<dyn FileSource> {
    Box::new(MemorySource::new(name, body.as_bytes().to_vec()))
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read temp file")
    }
}
