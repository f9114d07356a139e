//! Schema catalogue.
//!
//! The built-in schemas are compiled into the binary as YAML and validated
//! when the registry is constructed. Operators can layer additional or
//! replacement schemas on top with an overlay file in the same format.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{IngestError, IngestResult, RegistryError},
    schema::{SchemaDefinition, SchemaDescriptor},
};

const BUILTIN_SCHEMAS: &str = include_str!("builtin_schemas.yml");

/// On-disk shape of a registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub schemas: Vec<SchemaDefinition>,
}

impl RegistryDocument {
    pub fn from_yaml_str(origin: &str, yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml).map_err(|err| RegistryError::Definition {
            origin: origin.to_string(),
            message: err.to_string(),
        })
    }
}

/// Ordered, validated set of schema descriptors keyed by id.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<SchemaDescriptor>,
}

impl SchemaRegistry {
    pub fn builtin() -> Result<Self, RegistryError> {
        let document = RegistryDocument::from_yaml_str("built-in schemas", BUILTIN_SCHEMAS)?;
        Self::from_definitions(document.schemas)
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = SchemaDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut schemas: Vec<SchemaDescriptor> = Vec::new();
        for definition in definitions {
            if schemas.iter().any(|s| s.id() == definition.id) {
                return Err(RegistryError::DuplicateSchema(definition.id));
            }
            let descriptor = definition.build()?;
            debug!(
                "Registered schema '{}' with {} alias(es)",
                descriptor.id(),
                descriptor.alias_count()
            );
            schemas.push(descriptor);
        }
        Ok(Self { schemas })
    }

    /// Adds overlay schemas; an overlay with an existing id replaces it in place.
    pub fn with_overlay(
        mut self,
        definitions: impl IntoIterator<Item = SchemaDefinition>,
    ) -> Result<Self, RegistryError> {
        let overlay = Self::from_definitions(definitions)?;
        for descriptor in overlay.schemas {
            match self.schemas.iter_mut().find(|s| s.id() == descriptor.id()) {
                Some(existing) => {
                    info!("Overlay replaces built-in schema '{}'", descriptor.id());
                    *existing = descriptor;
                }
                None => self.schemas.push(descriptor),
            }
        }
        Ok(self)
    }

    pub fn load_overlay(self, path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Reading schema registry overlay {path:?}"))?;
        let document = RegistryDocument::from_yaml_str(&path.display().to_string(), &yaml)?;
        let count = document.schemas.len();
        let registry = self.with_overlay(document.schemas)?;
        info!("Loaded {count} schema(s) from {path:?}");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&SchemaDescriptor> {
        self.schemas.iter().find(|s| s.id() == id)
    }

    pub fn require(&self, id: &str) -> IngestResult<&SchemaDescriptor> {
        self.get(id)
            .ok_or_else(|| IngestError::UnknownSchema(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(SchemaDescriptor::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.schemas.iter()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
