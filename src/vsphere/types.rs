// vim25 data objects used by hotplug-passthru
//
// Only the fields this tool sends or reads are modelled. Objects sent to the
// endpoint carry their `_typeName` discriminator through serde's internal
// tagging; objects read back ignore fields they do not name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type discriminator key used by the JSON binding
pub const TYPE_NAME_KEY: &str = "_typeName";

/// `_typeName` of an attached passthrough device
pub const PCI_PASSTHROUGH_TYPE: &str = "VirtualPCIPassthrough";

/// Key given to devices that do not exist yet
pub const NEW_DEVICE_KEY: i32 = -100;

/// Reference to a remote managed object, e.g. `VirtualMachine:vm-42`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "_typeName", rename = "ManagedObjectReference")]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ManagedObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Entry points of the endpoint, read from `ServiceInstance.content`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: ManagedObjectReference,
    pub view_manager: ManagedObjectReference,
    pub session_manager: ManagedObjectReference,
}

/// Motherboard layouts a VM can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MotherboardLayout {
    AcpiHostBridges,
}

/// Operation of a single device change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceOperation {
    Add,
    Remove,
}

/// `VirtualMachineConfigSpec`, the body of a reconfigure call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualMachineConfigSpec", rename_all = "camelCase")]
pub struct ConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motherboard_layout: Option<MotherboardLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_passthru_hot_plug_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<DeviceConfigSpec>,
}

/// `VirtualDeviceConfigSpec`
///
/// The device is kept as raw JSON: removals must send back the device
/// exactly as the VM reported it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualDeviceConfigSpec")]
pub struct DeviceConfigSpec {
    pub operation: DeviceOperation,
    pub device: Value,
}

/// New `VirtualPCIPassthrough` device for hot-add
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualPCIPassthrough")]
pub struct PciPassthroughDevice {
    pub key: i32,
    pub backing: PciPassthroughBacking,
}

/// `VirtualPCIPassthroughDeviceBackingInfo`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VirtualPCIPassthroughDeviceBackingInfo",
    rename_all = "camelCase"
)]
pub struct PciPassthroughBacking {
    pub device_name: String,
    pub id: String,
    pub device_id: String,
    pub system_id: String,
    pub vendor_id: i16,
}

/// `EnvironmentBrowser.QueryConfigTarget` result, trimmed to passthrough
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTarget {
    #[serde(default)]
    pub pci_passthrough: Vec<PciPassthroughInfo>,
}

/// A passthrough-capable device advertised by the host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PciPassthroughInfo {
    pub pci_device: HostPciDevice,
    pub system_id: String,
}

/// `HostPciDevice`; ids are signed shorts on the wire
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPciDevice {
    pub id: String,
    pub vendor_id: i16,
    pub device_id: i16,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub device_name: String,
}

impl HostPciDevice {
    /// Device id as the backing expects it, e.g. `0x1eb8`
    pub fn device_id_hex(&self) -> String {
        format!("0x{:x}", self.device_id as u16)
    }

    /// Vendor id as conventionally printed, e.g. `10de`
    pub fn vendor_id_hex(&self) -> String {
        format!("{:04x}", self.vendor_id as u16)
    }
}

/// `VirtualMachine.config`, trimmed to the device list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualMachineConfigInfo {
    #[serde(default)]
    pub hardware: VirtualHardware,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualHardware {
    #[serde(default)]
    pub device: Vec<Value>,
}

/// Remote task states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

/// `LocalizedMethodFault` attached to a failed task
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedMethodFault {
    #[serde(default)]
    pub localized_message: Option<String>,
    #[serde(default)]
    pub fault: Option<Value>,
}

impl LocalizedMethodFault {
    /// Best human readable description of the fault
    pub fn message(&self) -> String {
        if let Some(msg) = self.localized_message.as_deref().filter(|m| !m.is_empty()) {
            return msg.to_string();
        }
        self.fault
            .as_ref()
            .and_then(|f| f.get(TYPE_NAME_KEY))
            .and_then(Value::as_str)
            .unwrap_or("unknown fault")
            .to_string()
    }
}

/// `Task.info`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub key: String,
    pub state: TaskState,
    #[serde(default)]
    pub error: Option<LocalizedMethodFault>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete_time: Option<DateTime<Utc>>,
}

impl TaskInfo {
    /// A task with only key and state set
    pub fn new(key: impl Into<String>, state: TaskState) -> Self {
        Self {
            key: key.into(),
            state,
            error: None,
            start_time: None,
            complete_time: None,
        }
    }

    /// Time between start and completion, when both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.complete_time? - self.start_time?)
    }
}

/// Fault body returned with a non-success HTTP status
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteFault {
    #[serde(rename = "_typeName", default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub faultstring: Option<String>,
    #[serde(rename = "localizedMessage", default)]
    pub localized_message: Option<String>,
    #[serde(rename = "faultMessage", default)]
    pub fault_message: Vec<LocalizableMessage>,
}

/// One entry of a fault's `faultMessage` list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalizableMessage {
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteFault {
    /// First non-empty message carried by the fault, if any
    pub fn message(&self) -> Option<String> {
        let listed = self.fault_message.iter().filter_map(|m| m.message.as_deref());
        self.localized_message
            .as_deref()
            .into_iter()
            .chain(self.faultstring.as_deref())
            .chain(listed)
            .find(|m| !m.is_empty())
            .map(str::to_string)
    }
}

/// Address of an attached passthrough device, if `device` is one
///
/// Dynamic passthrough backings carry no address and yield `None`.
pub fn attached_passthrough_address(device: &Value) -> Option<&str> {
    if device.get(TYPE_NAME_KEY).and_then(Value::as_str) != Some(PCI_PASSTHROUGH_TYPE) {
        return None;
    }
    device.get("backing")?.get("id")?.as_str()
}
