use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use vmctl_common::protocol::{LoginResponse, TaskSubmitted, MAX_FRAME_SIZE};
use vmctl_common::{
    Envelope, FilterId, FilterSpec, ObjectRef, PropertyCollector, Request, Response, TaskHandle,
    TaskInfo, UpdateSet, Version, VmSummary,
};

/// Connection to a management endpoint, holding the login session
#[derive(Debug)]
pub struct EndpointClient {
    addr: String,
    session: Option<String>,
}

impl EndpointClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            session: None,
        }
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let login: LoginResponse = self
            .call_as(Request::Login {
                user: user.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.session = Some(login.session);
        debug!("Logged in to {} as {}", self.addr, user);
        Ok(())
    }

    /// End the session; the endpoint releases any filters it still holds
    pub async fn logout(&mut self) -> Result<()> {
        if self.session.is_some() {
            self.call(Request::Logout).await?;
            self.session = None;
        }
        Ok(())
    }

    /// Send one request and return the success payload
    pub async fn call(&self, request: Request) -> Result<serde_json::Value> {
        let envelope = Envelope::new(self.session.clone(), request);
        let response = send_request(&self.addr, &envelope).await?;
        Ok(response.into_result()?)
    }

    async fn call_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let data = self.call(request).await?;
        serde_json::from_value(data).context("Unexpected response payload")
    }

    pub async fn list_vms(&self) -> Result<Vec<VmSummary>> {
        self.call_as(Request::ListVms).await
    }

    pub async fn power_on(&self, vm: &ObjectRef) -> Result<TaskHandle> {
        let submitted: TaskSubmitted = self.call_as(Request::PowerOn { vm: vm.clone() }).await?;
        Ok(submitted.task)
    }

    pub async fn power_off(&self, vm: &ObjectRef) -> Result<TaskHandle> {
        let submitted: TaskSubmitted = self.call_as(Request::PowerOff { vm: vm.clone() }).await?;
        Ok(submitted.task)
    }

    pub async fn revert_to_snapshot(&self, snapshot: &ObjectRef) -> Result<TaskHandle> {
        let submitted: TaskSubmitted = self
            .call_as(Request::RevertToSnapshot {
                snapshot: snapshot.clone(),
            })
            .await?;
        Ok(submitted.task)
    }
}

impl PropertyCollector for EndpointClient {
    async fn create_filter(&self, spec: &FilterSpec) -> Result<FilterId> {
        self.call_as(Request::CreateFilter { spec: spec.clone() })
            .await
            .context("CreateFilter failed")
    }

    async fn wait_for_updates(
        &self,
        filter: &FilterId,
        version: Option<&Version>,
    ) -> Result<UpdateSet> {
        self.call_as(Request::WaitForUpdates {
            filter: filter.clone(),
            version: version.cloned(),
        })
        .await
        .context("WaitForUpdates failed")
    }

    async fn destroy_filter(&self, filter: &FilterId) -> Result<()> {
        self.call(Request::DestroyFilter {
            filter: filter.clone(),
        })
        .await
        .context("DestroyFilter failed")?;
        Ok(())
    }

    async fn task_info(&self, task: &TaskHandle) -> Result<TaskInfo> {
        self.call_as(Request::TaskInfo { task: task.clone() })
            .await
            .context("TaskInfo failed")
    }
}

/// Send a request to the endpoint and receive the response
/// Uses length-prefixed framing: [4 bytes length][JSON payload]
pub async fn send_request(addr: &str, envelope: &Envelope) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)
        .await
        .context(format!("Failed to connect to endpoint at {}", addr))?;

    let json_bytes = serde_json::to_vec(envelope).context("Failed to serialize request")?;

    // Write length prefix (big-endian u32)
    let len = json_bytes.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .context("Failed to write request length")?;

    stream
        .write_all(&json_bytes)
        .await
        .context("Failed to write request payload")?;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read response length")?;
    let resp_len = u32::from_be_bytes(len_buf) as usize;
    if resp_len > MAX_FRAME_SIZE {
        anyhow::bail!(
            "Response size {} exceeds maximum allowed size of {}",
            resp_len,
            MAX_FRAME_SIZE
        );
    }

    let mut resp_buf = vec![0u8; resp_len];
    stream
        .read_exact(&mut resp_buf)
        .await
        .context("Failed to read response payload")?;

    let response: Response =
        serde_json::from_slice(&resp_buf).context("Failed to deserialize response")?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use vmctl_common::{EndpointError, ErrorCode};

    /// Accept one connection, check the request, send back `response`
    async fn serve_once<F>(listener: TcpListener, check: F, response: Response)
    where
        F: FnOnce(Envelope),
    {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut buf).await.unwrap();
        check(serde_json::from_slice(&buf).unwrap());

        let body = serde_json::to_vec(&response).unwrap();
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            |envelope| {
                assert!(envelope.session.is_none());
                assert!(matches!(envelope.request, Request::Login { .. }));
            },
            Response::success(serde_json::json!({"session": "key-42"})),
        ));

        let mut client = EndpointClient::new("127.0.0.1", port);
        client.login("admin", "admin").await.unwrap();
        assert_eq!(client.session.as_deref(), Some("key-42"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_power_on_returns_task_handle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            |envelope| {
                assert_eq!(envelope.session.as_deref(), Some("key-1"));
                match envelope.request {
                    Request::PowerOn { vm } => assert_eq!(vm, ObjectRef::new("vm-2")),
                    other => panic!("Unexpected request {:?}", other),
                }
            },
            Response::success(serde_json::json!({"task": "task-5"})),
        ));

        let client = EndpointClient {
            addr: format!("127.0.0.1:{}", port),
            session: Some("key-1".to_string()),
        };
        let task = client.power_on(&ObjectRef::new("vm-2")).await.unwrap();
        assert_eq!(task, TaskHandle::new("task-5"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_error_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            |_| {},
            Response::error(&EndpointError::filter_not_found("Filter not found: filter-9")),
        ));

        let client = EndpointClient::new("127.0.0.1", port);
        let err = client
            .wait_for_updates(&FilterId::new("filter-9"), None)
            .await
            .unwrap_err();
        let endpoint_err = err.downcast_ref::<EndpointError>().unwrap();
        assert_eq!(endpoint_err.code, ErrorCode::E005);
        assert!(format!("{:#}", err).contains("WaitForUpdates failed"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = EndpointClient::new("127.0.0.1", port);
        let err = client.list_vms().await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect to endpoint"));
    }

    #[tokio::test]
    async fn test_logout_without_session_is_a_no_op() {
        let mut client = EndpointClient::new("127.0.0.1", 1);
        assert!(client.logout().await.is_ok());
    }
}
