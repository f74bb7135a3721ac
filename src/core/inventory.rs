// VM lookup for hotplug-passthru

use tracing::{debug, error, info};

use crate::error::Result;
use crate::vsphere::types::ManagedObjectReference;
use crate::vsphere::ManagementApi;

/// Finds a VM by display name
///
/// Scans every VM in inventory order and returns the first exact match.
/// Names are not unique in vSphere; later VMs with the same name are never
/// looked at.
pub fn find_vm<A: ManagementApi + ?Sized>(
    api: &A,
    vm_name: &str,
) -> Result<Option<ManagedObjectReference>> {
    let vms = api.virtual_machines()?;
    debug!("Scanning {} VM(s) for {}", vms.len(), vm_name);

    for vm in vms {
        if api.vm_name(&vm)? == vm_name {
            info!("Got VM object for {} ({})", vm_name, vm);
            return Ok(Some(vm));
        }
    }

    error!("Failed to get VM with name {}", vm_name);
    Ok(None)
}
