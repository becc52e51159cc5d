use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::merge::{PullSummary, decode_collection, reconcile};
use crate::remote::RemoteClient;
use crate::repository::TaskRepository;
use crate::task::{Task, wire_id};

/// Keeps a local task repository in step with the remote collection.
///
/// The engine holds no mutable state of its own, so calls may overlap
/// freely. Overlapping calls are not ordered against each other: the last
/// commit (locally) or the last request (remotely) wins.
pub struct SyncEngine<R: ?Sized, C: ?Sized> {
    repo: Arc<R>,
    remote: Arc<C>,
    config: SyncConfig,
}

impl<R: ?Sized, C: ?Sized> Clone for SyncEngine<R, C> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            remote: Arc::clone(&self.remote),
            config: self.config.clone(),
        }
    }
}

impl<R, C> SyncEngine<R, C>
where
    R: TaskRepository + ?Sized + 'static,
    C: RemoteClient + ?Sized,
{
    pub fn new(repo: Arc<R>, remote: Arc<C>, config: SyncConfig) -> Self {
        Self {
            repo,
            remote,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn remote(&self) -> &Arc<C> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Refresh the local repository from the remote collection.
    ///
    /// A non-2xx answer is a decode failure even when its body is valid JSON.
    /// Reconciliation and the commit run on the blocking pool. If the commit
    /// fails the error is returned as-is; whatever the repository applied
    /// before failing is not undone here.
    pub async fn pull(&self) -> SyncResult<PullSummary> {
        let path = self.config.collection_path();
        let response = self.remote.get(&path).await.inspect_err(|e| {
            warn!(%path, error = %e, "fetching remote collection failed");
        })?;
        let collection = decode_collection(&response.body).inspect_err(|e| {
            warn!(%path, status = response.status, error = %e, "remote collection rejected");
        })?;
        if !response.is_success() {
            warn!(%path, status = response.status, "remote collection read returned an error status");
            return Err(SyncError::Decode(format!(
                "collection read answered with status {}",
                response.status
            )));
        }

        let repo = Arc::clone(&self.repo);
        let summary = tokio::task::spawn_blocking(move || reconcile(&*repo, collection))
            .await
            .map_err(|e| {
                error!(error = %e, "reconciliation task did not complete");
                SyncError::Commit(StoreError::Unavailable("reconciliation task aborted"))
            })??;

        info!(
            updated = summary.updated,
            created = summary.created,
            skipped = summary.skipped,
            "pull complete"
        );
        Ok(summary)
    }

    /// Replace the remote record for `task` with its current fields.
    pub async fn push(&self, task: &Task) -> SyncResult<()> {
        let id = task.identifier.ok_or(SyncError::MissingIdentifier)?;
        let representation = task.representation()?;
        let body = serde_json::to_vec(&representation).map_err(SyncError::Encode)?;

        let path = self.config.record_path(&wire_id(&id));
        let response = self.remote.put(&path, body).await.inspect_err(|e| {
            warn!(%path, error = %e, "pushing task failed");
        })?;
        if !response.is_success() {
            warn!(%path, status = response.status, "remote answered push with an error status");
        }
        debug!(%id, "task pushed");
        Ok(())
    }

    /// Remove the remote record for `task`.
    ///
    /// Any response counts as success, including 404 for a record that is
    /// already gone. The local repository is not touched.
    pub async fn delete(&self, task: &Task) -> SyncResult<()> {
        let id = task.identifier.ok_or(SyncError::MissingIdentifier)?;
        self.delete_record(id).await
    }

    /// Remove the remote record keyed by `id`, for tasks already gone locally.
    pub async fn delete_record(&self, id: Uuid) -> SyncResult<()> {
        let path = self.config.record_path(&wire_id(&id));
        let response = self.remote.delete(&path).await.inspect_err(|e| {
            warn!(%path, error = %e, "deleting remote task failed");
        })?;
        debug!(
            %id,
            status = response.status,
            has_body = !response.body.is_empty(),
            "remote delete answered"
        );
        Ok(())
    }
}
