// Blocking client for the vSphere JSON API (`/sdk/vim25/{release}`)
//
// Properties are read with `GET {base}/{type}/{id}/{property}` and methods
// are invoked with `POST {base}/{type}/{id}/{method}`. The session id
// returned by Login travels in the `vmware-api-session-id` header.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::vsphere::types::{
    ConfigSpec, ConfigTarget, ManagedObjectReference, PciPassthroughInfo, RemoteFault,
    ServiceContent, TaskInfo, VirtualMachineConfigInfo,
};
use crate::vsphere::ManagementApi;

/// vim25 release path segment used when none is given
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";

/// Upper bound for a single HTTP request, not for a task
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Where and how to connect
#[derive(Clone)]
pub struct ConnectConfig {
    /// Host name, IP, or full `http(s)://` URL of vCenter/ESXi
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub api_release: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("api_release", &self.api_release)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// An authenticated session against one endpoint
pub struct VcClient {
    http: Client,
    base_url: String,
    session_id: String,
    content: ServiceContent,
}

impl VcClient {
    /// Opens a session: reads the service content, then logs in.
    ///
    /// Certificates are not verified. Management endpoints commonly run with
    /// self-signed certificates.
    #[instrument(skip_all, fields(endpoint = %config.endpoint))]
    pub fn connect(config: &ConnectConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("hotplug-passthru/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;

        let base_url = sdk_base_url(&config.endpoint, &config.api_release);
        debug!(base_url = %base_url, "fetching service content");

        let url = format!("{base_url}/ServiceInstance/ServiceInstance/content");
        let response = check_response("ServiceInstance.content", http.get(&url).send()?)?;
        let content: ServiceContent = response.json()?;

        let url = method_url(&base_url, &content.session_manager, "Login");
        let body = json!({ "userName": config.user, "password": config.password });
        let response = http.post(&url).json(&body).send()?;
        let response = check_response("SessionManager.Login", response)?;
        let session_id = session_id_from_headers(response.headers())?;
        debug!(user = %config.user, "logged in");

        Ok(Self {
            http,
            base_url,
            session_id,
            content,
        })
    }

    /// Reads one property of a managed object
    fn property<T: DeserializeOwned>(
        &self,
        object: &ManagedObjectReference,
        property: &str,
    ) -> Result<T> {
        let url = format!("{}/{}/{}/{}", self.base_url, object.kind, object.value, property);
        trace!(url = %url, "reading property");

        let response = self
            .http
            .get(&url)
            .header(SESSION_HEADER, &self.session_id)
            .send()?;
        let response = check_response(&format!("{}.{}", object.kind, property), response)?;
        Ok(response.json()?)
    }

    /// Invokes a method on a managed object
    fn invoke(
        &self,
        object: &ManagedObjectReference,
        method: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = method_url(&self.base_url, object, method);
        trace!(url = %url, "invoking method");

        let mut request = self.http.post(&url).header(SESSION_HEADER, &self.session_id);
        if let Some(body) = body {
            request = request.json(body);
        }
        check_response(&format!("{}.{}", object.kind, method), request.send()?)
    }
}

impl ManagementApi for VcClient {
    fn virtual_machines(&self) -> Result<Vec<ManagedObjectReference>> {
        let body = json!({
            "container": serde_json::to_value(&self.content.root_folder)?,
            "type": ["VirtualMachine"],
            "recursive": true,
        });
        let view: ManagedObjectReference = self
            .invoke(&self.content.view_manager, "CreateContainerView", Some(&body))?
            .json()?;

        read_then_destroy(
            || self.property::<Vec<ManagedObjectReference>>(&view, "view"),
            || {
                self.invoke(&view, "DestroyView", None)?;
                Ok(())
            },
        )
    }

    fn vm_name(&self, vm: &ManagedObjectReference) -> Result<String> {
        self.property(vm, "name")
    }

    fn available_pci_passthrough(
        &self,
        vm: &ManagedObjectReference,
    ) -> Result<Vec<PciPassthroughInfo>> {
        let browser: ManagedObjectReference = self.property(vm, "environmentBrowser")?;
        let target: ConfigTarget = self
            .invoke(&browser, "QueryConfigTarget", Some(&json!({})))?
            .json()?;
        Ok(target.pci_passthrough)
    }

    fn attached_devices(&self, vm: &ManagedObjectReference) -> Result<Vec<Value>> {
        let config: VirtualMachineConfigInfo = self.property(vm, "config")?;
        Ok(config.hardware.device)
    }

    fn reconfigure_vm(
        &self,
        vm: &ManagedObjectReference,
        spec: &ConfigSpec,
    ) -> Result<ManagedObjectReference> {
        let body = json!({ "spec": serde_json::to_value(spec)? });
        Ok(self.invoke(vm, "ReconfigVM_Task", Some(&body))?.json()?)
    }

    fn task_info(&self, task: &ManagedObjectReference) -> Result<TaskInfo> {
        self.property(task, "info")
    }

    fn logout(&self) -> Result<()> {
        self.invoke(&self.content.session_manager, "Logout", None)?;
        Ok(())
    }
}

/// Builds `https://{host}/sdk/vim25/{release}` from what the user typed
pub fn sdk_base_url(endpoint: &str, api_release: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let origin = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    };
    format!("{origin}/sdk/vim25/{api_release}")
}

fn method_url(base_url: &str, object: &ManagedObjectReference, method: &str) -> String {
    format!("{}/{}/{}/{}", base_url, object.kind, object.value, method)
}

/// Turns a non-success response into `Error::Fault`
fn check_response(method: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    Err(fault_from_body(method, status, &body))
}

/// Builds `Error::Fault` from the body of a failed call
///
/// A JSON fault object supplies its `_typeName` and first message; any
/// other body becomes the message as is. The status reason fills in
/// whatever is missing.
fn fault_from_body(method: &str, status: StatusCode, body: &str) -> Error {
    let reason = status.canonical_reason().unwrap_or("error").to_string();

    let (fault, message) = match serde_json::from_str::<RemoteFault>(body) {
        Ok(parsed) => {
            let message = parsed.message().unwrap_or_else(|| reason.clone());
            (parsed.type_name.unwrap_or_else(|| reason.clone()), message)
        }
        Err(_) if body.trim().is_empty() => (reason.clone(), reason),
        Err(_) => (reason, body.trim().to_string()),
    };

    Error::Fault {
        method: method.to_string(),
        status: status.as_u16(),
        fault,
        message,
    }
}

/// Session id handed out by Login
fn session_id_from_headers(headers: &HeaderMap) -> Result<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingSession)
}

/// Runs `read`, then `destroy` whatever `read` returned
///
/// A failed `destroy` is only logged; the result of `read` is returned.
fn read_then_destroy<T>(
    read: impl FnOnce() -> Result<T>,
    destroy: impl FnOnce() -> Result<()>,
) -> Result<T> {
    let result = read();
    if let Err(e) = destroy() {
        warn!(error = %e, "failed to destroy container view");
    }
    result
}
