//! Job controller
//!
//! Runs on a coordinator node, not a task node. Creates the store layout a
//! job runs against, keeps the failure detector going, and tears the job's
//! namespace down at the end. It never coordinates task execution; progress
//! is driven by the tasks themselves through meta-notifications.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::common::{Error, JobConfig, Result};
use crate::controller::failure::FailureDetector;
use crate::store::{CoordStore, StoreLayout, EMPTY_OWNER, LAYOUT_VERSION};

pub struct Controller {
    job: JobConfig,
    layout: StoreLayout,
    store: Arc<dyn CoordStore>,
    detector: Option<Detector>,
}

struct Detector {
    cancel: tokio_util::sync::CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl Controller {
    pub fn new(job: JobConfig, store: Arc<dyn CoordStore>) -> Self {
        let layout = StoreLayout::new(&job.name);
        Self {
            job,
            layout,
            store,
            detector: None,
        }
    }

    /// Create the job's store layout and start failure detection.
    pub async fn start(&mut self) -> Result<()> {
        self.job.validate()?;
        self.init_layout().await?;

        let detector = FailureDetector::new(
            self.store.clone(),
            self.layout.clone(),
            self.job.num_tasks,
        );
        let cancel = detector.cancel_token();
        let watchers = detector.spawn();
        self.detector = Some(Detector { cancel, watchers });

        tracing::info!(job = %self.job.name, tasks = self.job.num_tasks, "job started");
        Ok(())
    }

    /// Stop failure detection, then remove the job's namespace. Teardown
    /// never reaches outside `<job>/`.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(detector) = self.detector.take() {
            detector.cancel.cancel();
            for watcher in detector.watchers {
                let _ = watcher.await;
            }
        }
        self.destroy_layout().await?;
        tracing::info!(job = %self.job.name, "job stopped");
        Ok(())
    }

    /// Write the initial layout: version marker, epoch `0`, and one
    /// unassigned owner record per slot.
    pub async fn init_layout(&self) -> Result<()> {
        match self
            .store
            .create(&self.layout.version_key(), LAYOUT_VERSION, None)
            .await
        {
            Ok(()) => {}
            Err(Error::KeyExists(_)) => {
                return Err(Error::InvalidConfig(format!(
                    "job {} already exists in the store",
                    self.job.name
                )));
            }
            Err(e) => return Err(e),
        }

        self.store
            .create(&self.layout.epoch_key(), "0", None)
            .await?;
        for slot in 0..self.job.num_tasks {
            self.store
                .create(&self.layout.owner_key(slot), EMPTY_OWNER, None)
                .await?;
        }
        tracing::info!(job = %self.job.name, "store layout created");
        Ok(())
    }

    pub async fn destroy_layout(&self) -> Result<()> {
        let removed = self.store.delete_prefix(self.layout.root()).await?;
        tracing::info!(job = %self.job.name, removed, "store layout destroyed");
        Ok(())
    }

    /// Move the job to the next epoch. The advance is CAS-guarded so a
    /// concurrent advance never skips or repeats an epoch.
    pub async fn advance_epoch(&self) -> Result<u64> {
        let key = self.layout.epoch_key();
        loop {
            let current = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::Internal("job epoch key missing".into()))?;
            let epoch: u64 = current
                .trim()
                .parse()
                .map_err(|_| Error::Internal(format!("unparseable epoch value: {}", current)))?;
            let next = epoch + 1;
            if self
                .store
                .compare_and_swap(&key, &current, &next.to_string(), None)
                .await?
            {
                tracing::info!(job = %self.job.name, epoch = next, "epoch advanced");
                return Ok(next);
            }
            // lost a race with another advance; re-read
        }
    }
}
