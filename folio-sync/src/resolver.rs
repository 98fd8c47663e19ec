//! Conflict resolution.
//!
//! Applies one strategy per batch across conflicting paths. Each path is
//! an independent unit of work: a failed write (or a missing manual
//! value) fails that path only, and the report carries per-path outcomes
//! plus the aggregate summary.

use crate::gateway::RemoteGateway;
use crate::remote::WriteRequest;
use folio_common::{
    AppliedResolution, Conflict, RepoSlug, ResolutionOutcome, ResolutionReport, ResolutionStrategy,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies resolution strategies and commits the outcome.
pub struct ConflictResolver {
    gateway: Arc<RemoteGateway>,
    repo: RepoSlug,
    branch: String,
}

impl ConflictResolver {
    pub fn new(gateway: Arc<RemoteGateway>, repo: RepoSlug, branch: impl Into<String>) -> Self {
        Self {
            gateway,
            repo,
            branch: branch.into(),
        }
    }

    /// Resolve a batch of conflicts with one strategy.
    ///
    /// `manual_values` maps path → replacement content and is consulted
    /// only for [`ResolutionStrategy::Manual`]; a conflicting path with
    /// no entry fails individually without aborting the batch.
    pub async fn resolve(
        &self,
        conflicts: &[Conflict],
        strategy: ResolutionStrategy,
        manual_values: &HashMap<String, String>,
    ) -> ResolutionReport {
        let mut outcomes = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let outcome = match strategy {
                ResolutionStrategy::KeepLocal => {
                    self.write_resolution(
                        conflict,
                        conflict.local.content.clone(),
                        AppliedResolution::KeptLocal,
                    )
                    .await
                }
                ResolutionStrategy::KeepRemote => {
                    // Nothing to write; the local edit is discarded by
                    // the caller adopting the remote snapshot.
                    debug!(path = %conflict.path, "keeping remote version");
                    ResolutionOutcome {
                        path: conflict.path.clone(),
                        applied: Some(AppliedResolution::KeptRemote),
                        success: true,
                        resulting_commit: None,
                        error: None,
                    }
                }
                ResolutionStrategy::Manual => match manual_values.get(&conflict.path) {
                    Some(value) => {
                        self.write_resolution(conflict, value.clone(), AppliedResolution::Manual)
                            .await
                    }
                    None => {
                        warn!(path = %conflict.path, "no manual value supplied");
                        ResolutionOutcome {
                            path: conflict.path.clone(),
                            applied: None,
                            success: false,
                            resulting_commit: None,
                            error: Some(format!(
                                "no manual value supplied for {}",
                                conflict.path
                            )),
                        }
                    }
                },
            };
            outcomes.push(outcome);
        }

        let report = ResolutionReport::from_outcomes(outcomes);
        info!(
            resolved = report.resolved,
            failed = report.failed,
            total = report.total,
            strategy = ?strategy,
            "conflict resolution finished"
        );
        report
    }

    /// Write `content` for a conflicting path, conditioned on the hash
    /// of the remote snapshot the conflict was detected against. A
    /// second concurrent change therefore fails the precondition instead
    /// of being overwritten blindly.
    async fn write_resolution(
        &self,
        conflict: &Conflict,
        content: String,
        applied: AppliedResolution,
    ) -> ResolutionOutcome {
        let expected_hash = conflict.remote.as_ref().map(|r| r.hash.clone());
        let request = WriteRequest {
            path: conflict.path.clone(),
            content,
            message: format!("Resolve conflict in {} ({applied})", conflict.path),
            branch: self.branch.clone(),
            expected_hash,
        };
        match self.gateway.write_file(&self.repo, request).await {
            Ok(commit) => ResolutionOutcome {
                path: conflict.path.clone(),
                applied: Some(applied),
                success: true,
                resulting_commit: Some(commit),
                error: None,
            },
            Err(err) => {
                warn!(path = %conflict.path, error = %err, "resolving write failed");
                ResolutionOutcome {
                    path: conflict.path.clone(),
                    applied: Some(applied),
                    success: false,
                    resulting_commit: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
