use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest marketplace and accounting reports into canonical records",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse one or more report files against a schema and submit the records
    Ingest(IngestArgs),
    /// List registered schemas or show one schema definition
    Schemas(SchemasArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Schema id to ingest against (see `schemas`)
    #[arg(short, long)]
    pub schema: String,
    /// Report files, processed in the order given
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Output file for submitted records (.json, .csv or .tsv; stdout JSON if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter for CSV output (defaults from the output extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// YAML file with additional or replacement schema definitions
    #[arg(long = "registry")]
    pub registry: Option<PathBuf>,
    /// Parse and validate without submitting anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Render the first N canonical records as a table
    #[arg(long, value_parser = parse_positive)]
    pub preview: Option<usize>,
    /// Keep parsing after a failing file and report every error
    #[arg(long = "collect-errors")]
    pub collect_errors: bool,
    /// Fail on tab-delimited rows whose column count does not match the header
    #[arg(long = "strict-columns")]
    pub strict_columns: bool,
    /// Number of files read ahead concurrently
    #[arg(long, default_value_t = crate::batch::DEFAULT_PREFETCH)]
    pub prefetch: usize,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Print the batch summary as JSON to stderr after a successful run
    #[arg(long = "summary-json")]
    pub summary_json: bool,
}

#[derive(Debug, Args)]
pub struct SchemasArgs {
    /// Print the full definition of one schema as YAML
    #[arg(long)]
    pub show: Option<String>,
    /// YAML file with additional or replacement schema definitions
    #[arg(long = "registry")]
    pub registry: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("Value must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(format!("Invalid number '{value}': {err}")),
    }
}
