pub mod batch;
pub mod cli;
pub mod coerce;
pub mod decoder;
pub mod error;
pub mod expr;
pub mod header;
pub mod ingest;
pub mod io_utils;
pub mod mapper;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod schema;
pub mod schemas_cmd;
pub mod sink;
pub mod table;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

pub use crate::{
    batch::{BatchJob, BatchOptions, BatchSummary, CancellationToken, ErrorMode, JobState},
    error::{IngestError, IngestResult, RegistryError},
    record::{CanonicalRecord, CanonicalValue},
    registry::SchemaRegistry,
    schema::{SchemaDefinition, SchemaDescriptor},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("report_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest::execute(&args),
        Commands::Schemas(args) => schemas_cmd::execute(&args),
    }
}
