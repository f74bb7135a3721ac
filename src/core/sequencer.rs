// Command sequencing for hotplug-passthru
//
// One invocation runs at most: VM lookup, listing, the two configure steps,
// and one device change, strictly in that order.

use std::time::Duration;

use tracing::{info, warn};

use crate::core::inventory::find_vm;
use crate::core::passthrough::PassthroughManager;
use crate::core::pci::PciAddress;
use crate::core::task::DEFAULT_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::vsphere::ManagementApi;

/// Device change requested for the VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add(PciAddress),
    Remove(PciAddress),
}

/// What one invocation should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub vm_name: String,
    /// Prepare the VM for future hot-add before any device change
    pub configure: bool,
    pub action: Option<DeviceAction>,
    /// Log the host's and the VM's passthrough devices
    pub list: bool,
    /// Build reconfigure requests without submitting them
    pub dry_run: bool,
    pub poll_interval: Duration,
}

impl Plan {
    /// A plan that only resolves `vm_name`
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            configure: false,
            action: None,
            list: false,
            dry_run: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Runs `plan` against an open session
///
/// Stops at the first failure. Steps already completed on the endpoint are
/// not undone.
pub fn run<A: ManagementApi + ?Sized>(api: &A, plan: &Plan) -> Result<()> {
    let vm = find_vm(api, &plan.vm_name)?.ok_or_else(|| Error::VmNotFound(plan.vm_name.clone()))?;
    let manager = PassthroughManager::new(api, vm, plan.vm_name.clone(), plan.poll_interval);

    if plan.list {
        manager.list_devices()?;
    }

    if plan.configure {
        info!("Configuring vm: {} for hotadd", plan.vm_name);
        manager.enable_hotplug(plan.dry_run)?;
    }

    match &plan.action {
        Some(DeviceAction::Add(address)) => manager.hot_add(address, plan.dry_run),
        Some(DeviceAction::Remove(address)) => manager.hot_remove(address, plan.dry_run),
        None => {
            info!("Hotadd/Hotremove not requested, exiting");
            Ok(())
        }
    }
}

/// Runs `plan`, then logs out whatever the outcome
///
/// A failed logout is only logged; the plan's result is returned.
pub fn execute<A: ManagementApi + ?Sized>(api: &A, plan: &Plan) -> Result<()> {
    let result = run(api, plan);
    if let Err(e) = api.logout() {
        warn!("Failed to log out: {}", e.report());
    }
    result
}
