// vSphere management API module for hotplug-passthru
//
// This module holds the calls the tool needs from a vCenter/ESXi endpoint,
// the data objects exchanged with it, and the HTTP client speaking its
// JSON protocol.

pub mod client;
pub mod types;

use serde_json::Value;

use crate::error::Result;
use types::{ConfigSpec, ManagedObjectReference, PciPassthroughInfo, TaskInfo};

/// Remote calls the command sequencer is built from
///
/// `client::VcClient` implements this against a live endpoint; tests swap in
/// a fake inventory.
pub trait ManagementApi {
    /// All VirtualMachine objects below the root folder, in inventory order
    fn virtual_machines(&self) -> Result<Vec<ManagedObjectReference>>;

    /// Display name of a VM
    fn vm_name(&self, vm: &ManagedObjectReference) -> Result<String>;

    /// Passthrough-capable devices the VM's host advertises
    fn available_pci_passthrough(
        &self,
        vm: &ManagedObjectReference,
    ) -> Result<Vec<PciPassthroughInfo>>;

    /// Virtual hardware currently attached to the VM, as raw device objects
    fn attached_devices(&self, vm: &ManagedObjectReference) -> Result<Vec<Value>>;

    /// Submits a reconfigure and returns the task tracking it
    fn reconfigure_vm(
        &self,
        vm: &ManagedObjectReference,
        spec: &ConfigSpec,
    ) -> Result<ManagedObjectReference>;

    /// Current state of a task
    fn task_info(&self, task: &ManagedObjectReference) -> Result<TaskInfo>;

    /// Ends the session
    fn logout(&self) -> Result<()>;
}
