//! Run scheduler - admission of runs, one active run per environment

use crate::core::error::PipelineError;
use crate::core::{Environment, PipelineRun};
use crate::persistence::{Claim, RunStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// What currently holds an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Run(Uuid),
    /// Manual rollback, which has no run of its own
    Rollback(Uuid),
}

impl Slot {
    pub fn id(&self) -> Uuid {
        match self {
            Slot::Run(id) | Slot::Rollback(id) => *id,
        }
    }
}

/// Admission control for environments
///
/// The slot table covers this process, including manual rollbacks that have
/// no run. Runs are admitted by claiming the environment in the store, which
/// is atomic across processes sharing it.
pub struct RunScheduler {
    slots: Mutex<HashMap<Environment, Slot>>,
    store: Arc<dyn RunStore>,
}

impl RunScheduler {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            store,
        }
    }

    fn busy(environment: Environment, slot: Slot) -> PipelineError {
        warn!("{} is busy ({:?})", environment, slot);
        PipelineError::RunInProgress {
            environment,
            run_id: slot.id(),
        }
    }

    /// Admit a new run: the environment must be free. The run is persisted
    /// as part of admission.
    pub async fn admit(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.get(&run.environment) {
            return Err(Self::busy(run.environment, *slot));
        }
        if let Claim::Held(holder) = self.store.claim_environment(run).await? {
            return Err(Self::busy(run.environment, Slot::Run(holder)));
        }

        slots.insert(run.environment, Slot::Run(run.id));
        debug!("Admitted run {} for {}", run.id, run.environment);
        Ok(())
    }

    /// Claim the slot for a run that is already persisted, e.g. one approved
    /// or resumed by a later process
    pub async fn adopt(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        let mut slots = self.slots.lock().await;

        match slots.get(&run.environment) {
            Some(Slot::Run(id)) if *id == run.id => Ok(()),
            Some(slot) => Err(Self::busy(run.environment, *slot)),
            None => {
                slots.insert(run.environment, Slot::Run(run.id));
                Ok(())
            }
        }
    }

    /// Hold an environment for a manual rollback
    pub async fn reserve_rollback(&self, environment: Environment) -> Result<Uuid, PipelineError> {
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.get(&environment) {
            return Err(Self::busy(environment, *slot));
        }
        if let Some(active) = self.store.active_run(environment).await? {
            return Err(Self::busy(environment, Slot::Run(active.id)));
        }

        let id = Uuid::new_v4();
        slots.insert(environment, Slot::Rollback(id));
        Ok(id)
    }

    /// Free an environment. A stale id is ignored.
    pub async fn release(&self, environment: Environment, id: Uuid) {
        let mut slots = self.slots.lock().await;
        if slots.get(&environment).map(Slot::id) == Some(id) {
            slots.remove(&environment);
            debug!("Released {} ({})", environment, id);
        }
    }

    pub async fn holder(&self, environment: Environment) -> Option<Slot> {
        self.slots.lock().await.get(&environment).copied()
    }
}
