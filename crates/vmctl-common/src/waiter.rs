//! Waits for a set of remote tasks to finish using a change-notification
//! subscription instead of polling each task.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::types::{MethodFault, TaskHandle, TaskInfo, TaskState};
use crate::update::{FilterId, FilterSpec, UpdateSet, Version};

/// Subscription side of a management endpoint
#[allow(async_fn_in_trait)]
pub trait PropertyCollector {
    /// Register a filter; updates for its objects become visible to `wait_for_updates`
    async fn create_filter(&self, spec: &FilterSpec) -> Result<FilterId>;

    /// Block until the filter has changes newer than `version`.
    ///
    /// `None` returns the current state of every object immediately.
    async fn wait_for_updates(&self, filter: &FilterId, version: Option<&Version>)
        -> Result<UpdateSet>;

    /// Release a filter. Releasing an unknown filter is not an error.
    async fn destroy_filter(&self, filter: &FilterId) -> Result<()>;

    /// Fetch the full record of a task
    async fn task_info(&self, task: &TaskHandle) -> Result<TaskInfo>;
}

/// Tasks of one wait call that have not succeeded yet
#[derive(Debug, Default)]
pub struct ActiveTaskSet {
    tasks: HashMap<TaskHandle, TaskState>,
}

impl ActiveTaskSet {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: &TaskHandle) -> bool {
        self.tasks.contains_key(task)
    }

    pub fn state(&self, task: &TaskHandle) -> Option<TaskState> {
        self.tasks.get(task).copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.keys()
    }

    /// Record a non-terminal state; ignored for untracked handles
    fn advance(&mut self, task: &TaskHandle, state: TaskState) {
        if let Some(current) = self.tasks.get_mut(task) {
            *current = state;
        }
    }

    /// Drop a succeeded task. Returns false if it was not tracked.
    fn complete(&mut self, task: &TaskHandle) -> bool {
        self.tasks.remove(task).is_some()
    }
}

impl FromIterator<TaskHandle> for ActiveTaskSet {
    fn from_iter<I: IntoIterator<Item = TaskHandle>>(iter: I) -> Self {
        Self {
            tasks: iter
                .into_iter()
                .map(|task| (task, TaskState::Pending))
                .collect(),
        }
    }
}

/// Waits for remote tasks through a [`PropertyCollector`]
#[derive(Debug)]
pub struct TaskWaiter<'a, C> {
    collector: &'a C,
    timeout: Option<Duration>,
}

impl<'a, C: PropertyCollector> TaskWaiter<'a, C> {
    pub fn new(collector: &'a C) -> Self {
        Self {
            collector,
            timeout: None,
        }
    }

    /// Bound each wait; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Return once every task has succeeded, or with the first failure.
    ///
    /// The filter created for the wait is destroyed before this returns,
    /// whatever the outcome. Dropping the future before it completes
    /// leaves the filter registered until the session logs out.
    pub async fn wait_for_all<I>(&self, tasks: I) -> Result<(), TaskError>
    where
        I: IntoIterator<Item = TaskHandle>,
    {
        let mut active: ActiveTaskSet = tasks.into_iter().collect();
        if active.is_empty() {
            return Ok(());
        }

        let spec = FilterSpec::for_tasks(active.handles());
        let filter = self
            .collector
            .create_filter(&spec)
            .await
            .map_err(TaskError::connection)?;
        debug!("Waiting on {} task(s) through filter {}", active.len(), filter);

        let outcome = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drain(&filter, &mut active)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TaskError::Timeout(limit)),
                }
            }
            None => self.drain(&filter, &mut active).await,
        };

        if let Err(e) = self.collector.destroy_filter(&filter).await {
            warn!("Failed to destroy filter {}: {:#}", filter, e);
        }

        outcome
    }

    /// Consume update batches until `active` is empty or a task fails
    async fn drain(&self, filter: &FilterId, active: &mut ActiveTaskSet) -> Result<(), TaskError> {
        let mut version: Option<Version> = None;

        while !active.is_empty() {
            let update = self
                .collector
                .wait_for_updates(filter, version.as_ref())
                .await
                .map_err(TaskError::connection)?;

            for object in update.object_updates() {
                if !active.contains(&object.obj) {
                    trace!("Ignoring changes for untracked task {}", object.obj);
                    continue;
                }
                for change in &object.change_set {
                    let observed = change.observed_state().map_err(|e| {
                        TaskError::ConnectionFailure(format!(
                            "Malformed {} for {}: {}",
                            change.name, object.obj, e
                        ))
                    })?;
                    let Some(observed) = observed else {
                        trace!("Ignoring {} change for {}", change.name, object.obj);
                        continue;
                    };

                    match observed.state {
                        TaskState::Success => {
                            active.complete(&object.obj);
                            debug!("Task {} succeeded, {} remaining", object.obj, active.len());
                        }
                        TaskState::Error => {
                            let fault = match observed.fault {
                                Some(fault) => fault,
                                None => self.fetch_fault(&object.obj).await?,
                            };
                            debug!("Task {} failed: {}", object.obj, fault);
                            return Err(TaskError::RemoteTaskFailed {
                                task: object.obj.clone(),
                                fault,
                            });
                        }
                        state => active.advance(&object.obj, state),
                    }
                }
            }

            version = Some(update.version);
        }

        Ok(())
    }

    /// A bare `info.state` change has no payload; read it from the task
    async fn fetch_fault(&self, task: &TaskHandle) -> Result<MethodFault, TaskError> {
        let info = self
            .collector
            .task_info(task)
            .await
            .map_err(TaskError::connection)?;
        Ok(info.error.unwrap_or_else(|| {
            MethodFault::new("UnknownFault", format!("Task {} reported an error without details", task))
        }))
    }
}
