// vmctl-sim/src/tasks.rs
// Runs submitted operations through their task lifecycle
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vmctl_common::{TaskHandle, TaskInfo, TaskState};

use crate::collector::PropertyCollectorService;
use crate::inventory::{Inventory, TaskAction};

/// Creates tasks and drives them Pending -> Running -> Success/Error
#[derive(Clone)]
pub struct TaskRunner {
    collector: Arc<PropertyCollectorService>,
    inventory: Arc<Inventory>,
    step: Duration,
    next_id: Arc<AtomicU64>,
}

impl TaskRunner {
    pub fn new(
        collector: Arc<PropertyCollectorService>,
        inventory: Arc<Inventory>,
        step: Duration,
    ) -> Self {
        Self {
            collector,
            inventory,
            step,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue `action` and return its handle; the task runs in the background
    pub async fn submit(&self, action: TaskAction, entity_name: String) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let key = TaskHandle::new(format!("task-{}", id));

        let mut task = TaskInfo::queued(key.clone(), action.description());
        task.entity = Some(action.entity().clone());
        task.entity_name = Some(entity_name);
        self.collector.publish(task.clone()).await;
        info!("Submitted {} ({} on {})", key, action.description(), action.entity());

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(task, action).await;
        });

        key
    }

    async fn run(&self, mut task: TaskInfo, action: TaskAction) {
        tokio::time::sleep(self.step).await;
        task.state = TaskState::Running;
        task.start_time = Some(Utc::now());
        task.progress = Some(50);
        self.collector.publish(task.clone()).await;

        tokio::time::sleep(self.step).await;
        match self.inventory.apply(&action).await {
            Ok(()) => {
                task.state = TaskState::Success;
                task.progress = Some(100);
            }
            Err(fault) => {
                debug!("Task {} failed: {}", task.key, fault);
                task.state = TaskState::Error;
                task.error = Some(fault);
            }
        }
        task.complete_time = Some(Utc::now());
        info!("Task {} finished: {:?}", task.key, task.state);
        self.collector.publish(task).await;
    }
}
