//! Archival sweeps as independent per-root effects.
//!
//! A sweep first plans which roots are due, then turns each into its own
//! [`ArchiveJob`]. Jobs share nothing but the environment and are polled
//! together, so one failing root never stops the others.

use super::error::ArchiveError;
use super::service::{ArchivalService, ArchiveOutcome};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use stillwater::effect::BoxedEffect;
use stillwater::prelude::*;
use uuid::Uuid;

/// Environment a job runs against.
#[derive(Clone, Debug)]
pub struct ArchivalEnv {
    pub service: Arc<ArchivalService>,
    pub now: DateTime<Utc>,
}

/// Deferred archival of one root.
pub type ArchiveJob = BoxedEffect<ArchiveOutcome, ArchiveError, ArchivalEnv>;

/// Build the job that archives `root` if it is still eligible when run.
pub fn archive_job(root: Uuid) -> ArchiveJob {
    from_fn(move |env: &ArchivalEnv| env.service.archive_if_eligible(root, env.now)).boxed()
}

/// What a sweep planned and what came of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub planned: Vec<Uuid>,
    pub outcomes: Vec<ArchiveOutcome>,
    pub failures: Vec<SweepFailure>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepFailure {
    pub root: Uuid,
    pub error: String,
}

impl SweepReport {
    /// Number of roots that ended up archived.
    pub fn archived(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_archived()).count()
    }
}

/// Plans and runs archival sweeps.
#[derive(Clone, Debug)]
pub struct ArchiveScheduler {
    service: Arc<ArchivalService>,
}

impl ArchiveScheduler {
    pub fn new(service: Arc<ArchivalService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ArchivalService> {
        &self.service
    }

    /// Roots a sweep at `now` would archive.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ArchiveError> {
        self.service.eligible_roots(now)
    }

    pub fn jobs(&self, roots: &[Uuid]) -> Vec<(Uuid, ArchiveJob)> {
        roots.iter().map(|root| (*root, archive_job(*root))).collect()
    }

    /// Run one sweep. A dry run only plans.
    pub async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<SweepReport, ArchiveError> {
        let planned = self.plan(now)?;
        let mut report = SweepReport {
            dry_run,
            planned: planned.clone(),
            ..SweepReport::default()
        };
        if dry_run {
            tracing::info!(planned = planned.len(), "archival dry run");
            return Ok(report);
        }

        let env = ArchivalEnv {
            service: Arc::clone(&self.service),
            now,
        };
        let env = &env;
        let results = join_all(
            self.jobs(&planned)
                .into_iter()
                .map(|(root, job)| async move { (root, job.run(env).await) }),
        )
        .await;

        for (root, result) in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(root = %root, error = %e, "archival job failed");
                    report.failures.push(SweepFailure {
                        root,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            planned = planned.len(),
            archived = report.archived(),
            failed = report.failures.len(),
            "archival sweep finished"
        );
        Ok(report)
    }
}
