use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::{
    batch::{BatchJob, BatchOptions, CancellationToken, ErrorMode, FileSource, PathSource},
    cli::IngestArgs,
    io_utils,
    registry::SchemaRegistry,
    sink::{CsvFileSink, JsonFileSink, SubmissionSink},
    table,
};

pub fn execute(args: &IngestArgs) -> Result<()> {
    let registry = load_registry(args.registry.as_deref())?;
    let schema = registry.require(&args.schema)?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;

    let options = BatchOptions {
        error_mode: if args.collect_errors {
            ErrorMode::CollectAll
        } else {
            ErrorMode::FailFast
        },
        strict_columns: args.strict_columns,
        prefetch: args.prefetch,
        encoding,
    };
    let files = args
        .inputs
        .iter()
        .map(|path| Box::new(PathSource::new(path)) as Box<dyn FileSource>)
        .collect::<Vec<_>>();

    info!(
        "Ingesting {} file(s) as '{}' ({})",
        files.len(),
        schema.id(),
        schema.label()
    );
    let mut job = BatchJob::new(schema, files, options);
    let output = job.execute(&CancellationToken::new())?;

    if let Some(limit) = args.preview {
        table::print_records(output.records(), limit);
    }
    if args.dry_run || (args.preview.is_some() && args.output.is_none()) {
        info!("Dry run: {} not submitted", output.summary());
        return Ok(());
    }

    let mut sink = build_sink(args);
    let summary = output.submit(sink.as_mut())?;
    info!("Job {} completed: {summary}", summary.job_id);
    if args.summary_json {
        let json = serde_json::to_string_pretty(&summary).context("Serialising batch summary")?;
        eprintln!("{json}");
    }
    Ok(())
}

pub fn load_registry(overlay: Option<&Path>) -> Result<SchemaRegistry> {
    let registry = SchemaRegistry::builtin().context("Loading built-in schemas")?;
    match overlay {
        Some(path) => registry.load_overlay(path),
        None => Ok(registry),
    }
}

fn build_sink(args: &IngestArgs) -> Box<dyn SubmissionSink> {
    let path = args.output.as_deref();
    let delimited = path.is_some_and(|p| {
        let name = p.to_string_lossy();
        ["csv", "tsv", "txt"]
            .iter()
            .any(|ext| io_utils::has_extension(&name, ext))
    });
    if delimited || args.output_delimiter.is_some() {
        let delimiter = io_utils::resolve_output_delimiter(path, args.output_delimiter);
        Box::new(CsvFileSink::new(path, delimiter))
    } else {
        Box::new(JsonFileSink::new(path))
    }
}
