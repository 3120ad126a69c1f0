// vmctl-sim/src/handler.rs
// Request handler for endpoint operations
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;
use vmctl_common::protocol::{AboutInfo, LoginResponse, TaskSubmitted};
use vmctl_common::{
    EndpointError, Envelope, FilterId, FilterSpec, ObjectRef, Request, Response, SimConfig,
    TaskHandle, Version,
};

use crate::collector::PropertyCollectorService;
use crate::inventory::{Inventory, TaskAction};
use crate::ipc::{read_envelope, write_response};
use crate::tasks::TaskRunner;

/// Handler owns the endpoint state and processes requests
#[derive(Clone)]
pub struct Handler {
    config: Arc<SimConfig>,
    inventory: Arc<Inventory>,
    collector: Arc<PropertyCollectorService>,
    tasks: TaskRunner,
    /// Keys of logged-in sessions
    sessions: Arc<RwLock<HashSet<String>>>,
}

impl Handler {
    /// Create a Handler with the inventory seeded from `config`
    pub fn new(config: Arc<SimConfig>) -> Self {
        let inventory = Arc::new(Inventory::from_seeds(&config.inventory));
        let collector = Arc::new(PropertyCollectorService::new(config.granularity));
        let tasks = TaskRunner::new(
            collector.clone(),
            inventory.clone(),
            Duration::from_millis(config.task_step_ms),
        );
        Self {
            config,
            inventory,
            collector,
            tasks,
            sessions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn collector(&self) -> Arc<PropertyCollectorService> {
        self.collector.clone()
    }

    /// Handle a single connection (read request, process, write response)
    pub async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let envelope = match read_envelope(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to read request: {}", e);
                let response = Response::error(&EndpointError::invalid_request(e.to_string()));
                let _ = write_response(&mut stream, &response).await;
                return Ok(());
            }
        };

        let response = self.handle(envelope).await;

        if let Err(ref e) = response {
            error!("Error handling request: {}", e);
        }

        write_response(&mut stream, &response?).await?;
        Ok(())
    }

    /// Process a request and return a response
    pub async fn handle(&self, envelope: Envelope) -> Result<Response> {
        let Envelope { session, request } = envelope;

        // Login and About are the only calls accepted without a session
        let session = if request.is_anonymous() {
            String::new()
        } else {
            match session {
                Some(key) if self.sessions.read().await.contains(&key) => key,
                _ => {
                    return Ok(Response::error(&EndpointError::not_authenticated(
                        "The session is not authenticated",
                    )));
                }
            }
        };

        match request {
            Request::Login { user, password } => self.handle_login(user, password).await,
            Request::About => self.handle_about().await,
            Request::Logout => self.handle_logout(session).await,
            Request::ListVms => self.handle_list_vms().await,
            Request::PowerOn { vm } => self.handle_power(vm, true).await,
            Request::PowerOff { vm } => self.handle_power(vm, false).await,
            Request::RevertToSnapshot { snapshot } => self.handle_revert(snapshot).await,
            Request::CreateFilter { spec } => self.handle_create_filter(session, spec).await,
            Request::WaitForUpdates { filter, version } => {
                self.handle_wait_for_updates(session, filter, version).await
            }
            Request::DestroyFilter { filter } => self.handle_destroy_filter(session, filter).await,
            Request::TaskInfo { task } => self.handle_task_info(task).await,
        }
    }

    async fn handle_login(&self, user: String, password: String) -> Result<Response> {
        info!("Login request: user={}", user);

        if user != self.config.user || password != self.config.password {
            warn!("Rejected login for user {}", user);
            return Ok(Response::error(&EndpointError::invalid_login(
                "Cannot complete login due to an incorrect user name or password",
            )));
        }

        let session = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(session.clone());
        Ok(Response::success(serde_json::to_value(LoginResponse {
            session,
        })?))
    }

    /// Logging out also releases the session's filters
    async fn handle_logout(&self, session: String) -> Result<Response> {
        self.sessions.write().await.remove(&session);
        let released = self.collector.destroy_session_filters(&session).await;
        info!("Logout: released {} filter(s)", released);
        Ok(Response::success(serde_json::json!({ "released_filters": released })))
    }

    async fn handle_about(&self) -> Result<Response> {
        let about = AboutInfo {
            name: "vmctl-sim".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            vm_count: self.inventory.vm_count().await,
        };
        Ok(Response::success(serde_json::to_value(about)?))
    }

    async fn handle_list_vms(&self) -> Result<Response> {
        let vms = self.inventory.list().await;
        info!("ListVms request: {} vm(s)", vms.len());
        Ok(Response::success(serde_json::to_value(vms)?))
    }

    async fn handle_power(&self, vm: ObjectRef, on: bool) -> Result<Response> {
        info!("Power request: vm={}, on={}", vm, on);

        let summary = match self.inventory.vm(&vm).await {
            Some(s) => s,
            None => {
                return Ok(Response::error(&EndpointError::not_found(format!(
                    "Virtual machine not found: {}",
                    vm
                ))));
            }
        };

        let action = if on {
            TaskAction::PowerOn { vm }
        } else {
            TaskAction::PowerOff { vm }
        };
        let task = self.tasks.submit(action, summary.name).await;
        Ok(Response::success(serde_json::to_value(TaskSubmitted { task })?))
    }

    async fn handle_revert(&self, snapshot: ObjectRef) -> Result<Response> {
        info!("RevertToSnapshot request: snapshot={}", snapshot);

        let owner = match self.inventory.snapshot_owner(&snapshot).await {
            Some(o) => o,
            None => {
                return Ok(Response::error(&EndpointError::not_found(format!(
                    "Snapshot not found: {}",
                    snapshot
                ))));
            }
        };

        info!("Reverting {} to snapshot {}", owner.vm_name, owner.snapshot_name);
        let action = TaskAction::Revert {
            vm: owner.vm,
            snapshot,
        };
        let task = self.tasks.submit(action, owner.snapshot_name).await;
        Ok(Response::success(serde_json::to_value(TaskSubmitted { task })?))
    }

    async fn handle_create_filter(&self, session: String, spec: FilterSpec) -> Result<Response> {
        match self.collector.create_filter(&session, spec).await {
            Ok(filter) => Ok(Response::success(serde_json::to_value(filter)?)),
            Err(e) => Ok(Response::error(&e)),
        }
    }

    async fn handle_wait_for_updates(
        &self,
        session: String,
        filter: FilterId,
        version: Option<Version>,
    ) -> Result<Response> {
        match self
            .collector
            .wait_for_updates(&session, &filter, version.as_ref())
            .await
        {
            Ok(update) => Ok(Response::success(serde_json::to_value(update)?)),
            Err(e) => Ok(Response::error(&e)),
        }
    }

    async fn handle_destroy_filter(&self, session: String, filter: FilterId) -> Result<Response> {
        self.collector.destroy_filter(&session, &filter).await;
        Ok(Response::success(serde_json::Value::Null))
    }

    async fn handle_task_info(&self, task: TaskHandle) -> Result<Response> {
        match self.collector.task_info(&task).await {
            Ok(info) => Ok(Response::success(serde_json::to_value(info)?)),
            Err(e) => Ok(Response::error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmctl_common::{
        ChangeGranularity, PowerState, PropertyCollector, TaskError, TaskInfo, TaskState,
        TaskWaiter, UpdateSet, VmSummary,
    };

    fn test_config(granularity: ChangeGranularity) -> SimConfig {
        SimConfig {
            granularity,
            task_step_ms: 5,
            ..SimConfig::default()
        }
    }

    /// Calls the handler directly, the way a remote client would
    struct InProcessClient {
        handler: Handler,
        session: Option<String>,
    }

    impl InProcessClient {
        async fn login(handler: Handler) -> Self {
            let mut client = Self {
                handler,
                session: None,
            };
            let data = client
                .call(Request::Login {
                    user: "admin".to_string(),
                    password: "admin".to_string(),
                })
                .await
                .unwrap();
            let login: LoginResponse = serde_json::from_value(data).unwrap();
            client.session = Some(login.session);
            client
        }

        async fn call(&self, request: Request) -> anyhow::Result<serde_json::Value> {
            let response = self
                .handler
                .handle(Envelope::new(self.session.clone(), request))
                .await?;
            Ok(response.into_result()?)
        }

        async fn submit(&self, request: Request) -> TaskHandle {
            let data = self.call(request).await.unwrap();
            serde_json::from_value::<TaskSubmitted>(data).unwrap().task
        }

        async fn vm(&self, name: &str) -> VmSummary {
            let data = self.call(Request::ListVms).await.unwrap();
            let vms: Vec<VmSummary> = serde_json::from_value(data).unwrap();
            vms.into_iter().find(|vm| vm.name == name).unwrap()
        }
    }

    impl PropertyCollector for InProcessClient {
        async fn create_filter(&self, spec: &FilterSpec) -> anyhow::Result<FilterId> {
            let data = self
                .call(Request::CreateFilter { spec: spec.clone() })
                .await?;
            Ok(serde_json::from_value(data)?)
        }

        async fn wait_for_updates(
            &self,
            filter: &FilterId,
            version: Option<&Version>,
        ) -> anyhow::Result<UpdateSet> {
            let data = self
                .call(Request::WaitForUpdates {
                    filter: filter.clone(),
                    version: version.cloned(),
                })
                .await?;
            Ok(serde_json::from_value(data)?)
        }

        async fn destroy_filter(&self, filter: &FilterId) -> anyhow::Result<()> {
            self.call(Request::DestroyFilter {
                filter: filter.clone(),
            })
            .await
            .map(|_| ())
        }

        async fn task_info(&self, task: &TaskHandle) -> anyhow::Result<TaskInfo> {
            let data = self.call(Request::TaskInfo { task: task.clone() }).await?;
            Ok(serde_json::from_value(data)?)
        }
    }

    #[tokio::test]
    async fn test_requests_require_session() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::Info)));

        let response = handler
            .handle(Envelope::new(None, Request::ListVms))
            .await
            .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, vmctl_common::ErrorCode::E001);

        let response = handler
            .handle(Envelope::new(Some("forged".to_string()), Request::ListVms))
            .await
            .unwrap();
        assert!(response.into_result().is_err());

        let response = handler.handle(Envelope::new(None, Request::About)).await.unwrap();
        let about: AboutInfo = serde_json::from_value(response.into_result().unwrap()).unwrap();
        assert_eq!(about.vm_count, 2);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::Info)));
        let response = handler
            .handle(Envelope::new(
                None,
                Request::Login {
                    user: "admin".to_string(),
                    password: "wrong".to_string(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(
            response.into_result().unwrap_err().code,
            vmctl_common::ErrorCode::E002
        );
    }

    #[tokio::test]
    async fn test_power_on_unknown_vm() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::Info)));
        let client = InProcessClient::login(handler).await;

        let err = client
            .call(Request::PowerOn {
                vm: ObjectRef::new("vm-404"),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("E003"));
    }

    #[tokio::test]
    async fn test_power_on_and_wait_with_full_info() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::Info)));
        let client = InProcessClient::login(handler.clone()).await;
        let db = client.vm("db-01").await;
        assert_eq!(db.power_state, PowerState::PoweredOff);

        let task = client.submit(Request::PowerOn { vm: db.vm.clone() }).await;
        let result = TaskWaiter::new(&client).wait_for_all(vec![task]).await;

        assert!(result.is_ok());
        assert_eq!(client.vm("db-01").await.power_state, PowerState::PoweredOn);
        assert_eq!(handler.collector().filter_count().await, 0);
    }

    #[tokio::test]
    async fn test_several_tasks_with_state_deltas() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::InfoState)));
        let client = InProcessClient::login(handler.clone()).await;
        let web = client.vm("web-01").await;
        let db = client.vm("db-01").await;
        let patched = &web.snapshots[0].children[0];

        let tasks = vec![
            client.submit(Request::PowerOn { vm: db.vm.clone() }).await,
            client
                .submit(Request::RevertToSnapshot {
                    snapshot: patched.snapshot.clone(),
                })
                .await,
        ];
        let result = TaskWaiter::new(&client).wait_for_all(tasks).await;

        assert!(result.is_ok());
        assert_eq!(client.vm("db-01").await.power_state, PowerState::PoweredOn);
        assert_eq!(client.vm("web-01").await.power_state, PowerState::PoweredOn);
        assert_eq!(handler.collector().filter_count().await, 0);
    }

    #[tokio::test]
    async fn test_remote_fault_reaches_caller() {
        for granularity in [ChangeGranularity::Info, ChangeGranularity::InfoState] {
            let handler = Handler::new(Arc::new(test_config(granularity)));
            let client = InProcessClient::login(handler.clone()).await;
            let web = client.vm("web-01").await;

            let task = client.submit(Request::PowerOn { vm: web.vm }).await;
            let result = TaskWaiter::new(&client).wait_for_all(vec![task.clone()]).await;

            match result {
                Err(TaskError::RemoteTaskFailed { task: failed, fault }) => {
                    assert_eq!(failed, task);
                    assert_eq!(fault.fault_type, "InvalidPowerState");
                }
                other => panic!("Expected RemoteTaskFailed, got {:?}", other),
            }
            assert_eq!(handler.collector().filter_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_wait_on_finished_task_returns_from_snapshot() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::InfoState)));
        let client = InProcessClient::login(handler).await;
        let db = client.vm("db-01").await;
        let task = client.submit(Request::PowerOn { vm: db.vm }).await;

        loop {
            let data = client.call(Request::TaskInfo { task: task.clone() }).await.unwrap();
            let info: TaskInfo = serde_json::from_value(data).unwrap();
            if info.state == TaskState::Success {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = TaskWaiter::new(&client).wait_for_all(vec![task]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_logout_releases_filters() {
        let handler = Handler::new(Arc::new(test_config(ChangeGranularity::Info)));
        let client = InProcessClient::login(handler.clone()).await;
        let db = client.vm("db-01").await;
        let task = client.submit(Request::PowerOn { vm: db.vm }).await;
        client
            .create_filter(&FilterSpec::for_tasks(&[task]))
            .await
            .unwrap();
        assert_eq!(handler.collector().filter_count().await, 1);

        let data = client.call(Request::Logout).await.unwrap();
        assert_eq!(data["released_filters"], 1);
        assert_eq!(handler.collector().filter_count().await, 0);
        assert!(client.call(Request::ListVms).await.is_err());
    }
}
