// vmctl-sim/src/collector.rs
// Task store and change-notification filters
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use vmctl_common::update::{FilterUpdate, ObjectUpdateKind, INFO, INFO_PROGRESS, INFO_STATE};
use vmctl_common::{
    ChangeGranularity, EndpointError, FilterId, FilterSpec, ObjectUpdate, PropertyChange,
    TaskHandle, TaskInfo, UpdateSet, Version,
};

struct Filter {
    /// Session that created the filter
    owner: String,
    spec: FilterSpec,
    /// Changes not yet acknowledged by the owner, tagged with their sequence number
    log: Vec<(u64, ObjectUpdate)>,
}

#[derive(Default)]
struct CollectorState {
    /// Sequence number of the last published change
    seq: u64,
    next_filter: u64,
    tasks: HashMap<TaskHandle, TaskInfo>,
    filters: HashMap<FilterId, Filter>,
}

/// Holds every task record and fans changes out to the filters watching them
pub struct PropertyCollectorService {
    state: RwLock<CollectorState>,
    changed: watch::Sender<u64>,
    granularity: ChangeGranularity,
}

impl PropertyCollectorService {
    pub fn new(granularity: ChangeGranularity) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: RwLock::new(CollectorState::default()),
            changed,
            granularity,
        }
    }

    /// Store the new task record and queue a change for every filter watching it
    pub async fn publish(&self, task: TaskInfo) {
        let seq = {
            let mut state = self.state.write().await;
            state.seq += 1;
            let seq = state.seq;
            let update = self.change_for(&task);
            for filter in state.filters.values_mut() {
                if filter.spec.watches(&task.key) {
                    filter.log.push((seq, update.clone()));
                }
            }
            debug!("Task {} is now {:?} (seq {})", task.key, task.state, seq);
            state.tasks.insert(task.key.clone(), task);
            seq
        };
        self.changed.send_replace(seq);
    }

    fn change_for(&self, task: &TaskInfo) -> ObjectUpdate {
        let mut change_set = Vec::with_capacity(2);
        match self.granularity {
            ChangeGranularity::Info => {
                change_set.push(PropertyChange::assign(INFO, to_value(task)));
            }
            ChangeGranularity::InfoState => {
                change_set.push(PropertyChange::assign(INFO_STATE, to_value(&task.state)));
            }
        }
        if let Some(progress) = task.progress {
            change_set.push(PropertyChange::assign(INFO_PROGRESS, serde_json::json!(progress)));
        }
        ObjectUpdate {
            obj: task.key.clone(),
            kind: ObjectUpdateKind::Modify,
            change_set,
        }
    }

    pub async fn task_info(&self, task: &TaskHandle) -> Result<TaskInfo, EndpointError> {
        self.state
            .read()
            .await
            .tasks
            .get(task)
            .cloned()
            .ok_or_else(|| EndpointError::not_found(format!("Task not found: {}", task)))
    }

    pub async fn create_filter(
        &self,
        session: &str,
        spec: FilterSpec,
    ) -> Result<FilterId, EndpointError> {
        if spec.objects.is_empty() {
            return Err(EndpointError::invalid_filter("Filter spec has no objects"));
        }

        let mut state = self.state.write().await;
        if let Some(unknown) = spec.objects.iter().find(|t| !state.tasks.contains_key(*t)) {
            return Err(EndpointError::invalid_filter(format!(
                "Filter spec references unknown task: {}",
                unknown
            )));
        }

        state.next_filter += 1;
        let id = FilterId::new(format!("filter-{}", state.next_filter));
        info!("Created {} on {} task(s)", id, spec.objects.len());
        state.filters.insert(
            id.clone(),
            Filter {
                owner: session.to_string(),
                spec,
                log: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Return changes newer than `version`, waiting until there is at least one.
    ///
    /// Without a version, returns the current `info` of every watched task.
    pub async fn wait_for_updates(
        &self,
        session: &str,
        filter: &FilterId,
        version: Option<&Version>,
    ) -> Result<UpdateSet, EndpointError> {
        let since = match version {
            Some(v) => Some(v.as_str().parse::<u64>().map_err(|_| {
                EndpointError::invalid_version(format!("Invalid version token: {}", v))
            })?),
            None => None,
        };

        let mut changed = self.changed.subscribe();
        loop {
            {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                let entry = state
                    .filters
                    .get_mut(filter)
                    .filter(|f| f.owner == session)
                    .ok_or_else(|| {
                        EndpointError::filter_not_found(format!("Filter not found: {}", filter))
                    })?;

                match since {
                    None => {
                        entry.log.clear();
                        let object_set = entry
                            .spec
                            .objects
                            .iter()
                            .filter_map(|key| state.tasks.get(key))
                            .map(|task| ObjectUpdate {
                                obj: task.key.clone(),
                                kind: ObjectUpdateKind::Enter,
                                change_set: vec![PropertyChange::assign(INFO, to_value(task))],
                            })
                            .collect();
                        return Ok(update_set(filter, state.seq, object_set));
                    }
                    Some(since) => {
                        entry.log.retain(|(seq, _)| *seq > since);
                        if let Some((last, _)) = entry.log.last() {
                            let last = *last;
                            let object_set = entry.log.iter().map(|(_, u)| u.clone()).collect();
                            return Ok(update_set(filter, last, object_set));
                        }
                    }
                }
            }

            if changed.changed().await.is_err() {
                return Err(EndpointError::unreachable("Property collector shut down"));
            }
        }
    }

    /// Remove a filter; unknown filters are ignored.
    ///
    /// Waits parked on the filter wake up and fail with E005.
    pub async fn destroy_filter(&self, session: &str, filter: &FilterId) {
        let removed = {
            let mut state = self.state.write().await;
            let owned = state
                .filters
                .get(filter)
                .map(|f| f.owner == session)
                .unwrap_or(false);
            owned && state.filters.remove(filter).is_some()
        };
        if removed {
            info!("Destroyed {}", filter);
            self.wake_waiters();
        }
    }

    /// Remove every filter created by `session`
    pub async fn destroy_session_filters(&self, session: &str) -> usize {
        let removed = {
            let mut state = self.state.write().await;
            let before = state.filters.len();
            state.filters.retain(|_, f| f.owner != session);
            before - state.filters.len()
        };
        if removed > 0 {
            self.wake_waiters();
        }
        removed
    }

    /// Make every parked wait re-check its filter without publishing a change
    fn wake_waiters(&self) {
        self.changed.send_modify(|_| {});
    }

    pub async fn filter_count(&self) -> usize {
        self.state.read().await.filters.len()
    }

    /// Drop completed tasks older than `retention` that no filter watches
    pub async fn prune_completed(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let before = state.tasks.len();
        let filters = &state.filters;
        state.tasks.retain(|key, task| {
            let expired = task.complete_time.map(|t| t < cutoff).unwrap_or(false);
            !expired || filters.values().any(|f| f.spec.watches(key))
        });
        before - state.tasks.len()
    }
}

fn update_set(filter: &FilterId, version: u64, object_set: Vec<ObjectUpdate>) -> UpdateSet {
    UpdateSet {
        version: Version::new(version.to_string()),
        filter_set: vec![FilterUpdate {
            filter: filter.clone(),
            object_set,
        }],
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    // Task records contain only strings, numbers and timestamps
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
