//! Operations exposed to command-line and administrative front ends.
//!
//! Each command returns a serializable report so callers can print it as
//! text or JSON.

use crate::archive::{ArchivalService, ArchiveError, ArchiveScheduler, ArchiveStats, SweepReport};
use crate::config::EngineConfig;
use crate::core::BehaviorRegistry;
use crate::definition::{DefinitionError, MachineDefinition};
use crate::diagram::to_plantuml;
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid root event id '{input}': {source}")]
    InvalidRootId {
        input: String,
        #[source]
        source: uuid::Error,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Outcome of validating a machine configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DefinitionReport {
    pub machine_id: Option<String>,
    pub valid: bool,
    pub states: usize,
    pub events: Vec<String>,
    pub errors: Vec<String>,
}

/// Validate a configuration against the registered behaviors.
///
/// Never fails: problems are listed in the report.
pub fn validate_definition(config: &Value, behaviors: &BehaviorRegistry) -> DefinitionReport {
    let machine_id = config.get("id").and_then(Value::as_str).map(str::to_string);
    match MachineDefinition::from_config(config.clone(), behaviors.clone()) {
        Ok(definition) => DefinitionReport {
            machine_id,
            valid: true,
            states: definition.nodes().len(),
            events: definition.events().map(str::to_string).collect(),
            errors: Vec::new(),
        },
        Err(err) => DefinitionReport {
            machine_id,
            valid: false,
            states: 0,
            events: Vec::new(),
            errors: err.errors().iter().map(ToString::to_string).collect(),
        },
    }
}

/// PlantUML text for a configuration.
pub fn state_diagram(config: &Value, behaviors: &BehaviorRegistry) -> Result<String, CommandError> {
    let definition = MachineDefinition::from_config(config.clone(), behaviors.clone())?;
    Ok(to_plantuml(&definition))
}

/// Result of restoring one archive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RestoreReport {
    pub root: Uuid,
    /// Events moved back to live storage; 0 when the chain was already live.
    pub restored_events: usize,
}

/// Archival commands bound to one store.
#[derive(Clone, Debug)]
pub struct ArchiveCommands {
    scheduler: ArchiveScheduler,
}

impl ArchiveCommands {
    pub fn new(service: Arc<ArchivalService>) -> Self {
        Self {
            scheduler: ArchiveScheduler::new(service),
        }
    }

    pub fn from_store(store: EventStore, config: &EngineConfig) -> Self {
        Self::new(Arc::new(ArchivalService::new(store, config.archival.clone())))
    }

    pub fn service(&self) -> &Arc<ArchivalService> {
        self.scheduler.service()
    }

    /// Run one sweep now. A dry run only lists the roots it would archive.
    pub async fn sweep(&self, dry_run: bool) -> Result<SweepReport, CommandError> {
        self.sweep_at(Utc::now(), dry_run).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>, dry_run: bool) -> Result<SweepReport, CommandError> {
        Ok(self.scheduler.run_sweep(now, dry_run).await?)
    }

    pub fn stats(&self) -> Result<ArchiveStats, CommandError> {
        Ok(self.service().stats()?)
    }

    /// Restore the archive of the root named by `root_id`.
    pub fn restore(&self, root_id: &str) -> Result<RestoreReport, CommandError> {
        self.restore_at(root_id, Utc::now())
    }

    pub fn restore_at(&self, root_id: &str, now: DateTime<Utc>) -> Result<RestoreReport, CommandError> {
        let root = Uuid::parse_str(root_id.trim()).map_err(|source| CommandError::InvalidRootId {
            input: root_id.to_string(),
            source,
        })?;
        let restored_events = self.service().restore_root(root, now)?;
        Ok(RestoreReport {
            root,
            restored_events,
        })
    }
}
