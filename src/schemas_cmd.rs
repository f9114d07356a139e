use anyhow::{Context, Result};
use log::info;

use crate::{cli::SchemasArgs, ingest::load_registry, registry::SchemaRegistry, table};

pub fn execute(args: &SchemasArgs) -> Result<()> {
    let registry = load_registry(args.registry.as_deref())?;
    match &args.show {
        Some(id) => {
            let schema = registry.require(id)?;
            let yaml = serde_yaml::to_string(schema.definition())
                .with_context(|| format!("Serialising schema '{id}'"))?;
            print!("{yaml}");
        }
        None => {
            print!("{}", render_listing(&registry));
            info!("{} schema(s) registered", registry.len());
        }
    }
    Ok(())
}

pub fn render_listing(registry: &SchemaRegistry) -> String {
    let headers = ["id", "label", "delimiter", "extension", "files", "fields", "filter"];
    let rows = registry
        .iter()
        .map(|schema| {
            vec![
                schema.id().to_string(),
                schema.label().to_string(),
                schema.delimiter().to_string(),
                schema.extension().to_string(),
                if schema.allows_multiple_files() {
                    "many".to_string()
                } else {
                    "one".to_string()
                },
                schema.field_keys().count().to_string(),
                schema
                    .row_filter()
                    .map(|filter| filter.describe())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect::<Vec<_>>();
    table::render_table(&headers, &rows)
}
