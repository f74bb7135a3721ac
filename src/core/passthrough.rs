// PCI passthrough hot-plug management for hotplug-passthru
//
// This module builds the reconfigure requests that prepare a VM for
// passthrough hot-plug and that attach or detach a passthrough device,
// then submits them and waits for the resulting tasks.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::core::pci::PciAddress;
use crate::core::task::wait_for_task;
use crate::error::{Error, Result};
use crate::vsphere::types::{
    attached_passthrough_address, ConfigSpec, DeviceConfigSpec, DeviceOperation,
    ManagedObjectReference, MotherboardLayout, PciPassthroughBacking, PciPassthroughDevice,
    PciPassthroughInfo, TaskInfo, NEW_DEVICE_KEY,
};
use crate::vsphere::ManagementApi;

/// Manages passthrough devices of one resolved VM
pub struct PassthroughManager<'a, A: ManagementApi + ?Sized> {
    api: &'a A,
    vm: ManagedObjectReference,
    vm_name: String,
    poll_interval: Duration,
}

impl<'a, A: ManagementApi + ?Sized> PassthroughManager<'a, A> {
    /// Creates a manager for `vm`
    pub fn new(
        api: &'a A,
        vm: ManagedObjectReference,
        vm_name: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            vm,
            vm_name: vm_name.into(),
            poll_interval,
        }
    }

    /// Prepares the VM for future hot-add
    ///
    /// Two separate reconfigure tasks, in this order: motherboard layout,
    /// then the fixed passthrough hot-plug flag. The VM should be powered
    /// off. If the second task fails the layout change stays applied.
    ///
    /// Args:
    ///     dry_run: If true, only log the requests without submitting them
    ///
    /// Returns:
    ///     Result indicating success or failure
    pub fn enable_hotplug(&self, dry_run: bool) -> Result<()> {
        self.set_motherboard_layout_acpi(dry_run)?;
        self.set_fixed_passthru_hotplug_enabled(dry_run)
    }

    fn set_motherboard_layout_acpi(&self, dry_run: bool) -> Result<()> {
        let spec = ConfigSpec {
            motherboard_layout: Some(MotherboardLayout::AcpiHostBridges),
            ..Default::default()
        };
        info!(
            "Requesting motherboard layout {:?} on {}",
            MotherboardLayout::AcpiHostBridges,
            self.vm_name
        );
        if self.reconfigure(&spec, dry_run)?.is_some() {
            info!("New motherboard layout: {:?}", MotherboardLayout::AcpiHostBridges);
        }
        Ok(())
    }

    fn set_fixed_passthru_hotplug_enabled(&self, dry_run: bool) -> Result<()> {
        let spec = ConfigSpec {
            fixed_passthru_hot_plug_enabled: Some(true),
            ..Default::default()
        };
        info!("Requesting fixedPassthruHotPlugEnabled=true on {}", self.vm_name);
        if self.reconfigure(&spec, dry_run)?.is_some() {
            info!("New fixedPassthruHotPlugEnabled: true");
        }
        Ok(())
    }

    /// Looks up `address` in the host's passthrough-capable device list
    ///
    /// Args:
    ///     address: PCI address to look for, compared without regard to case
    ///
    /// Returns:
    ///     The host's entry for the device, or None if it is not advertised
    pub fn find_available_device(
        &self,
        address: &PciAddress,
    ) -> Result<Option<PciPassthroughInfo>> {
        let devices = self.api.available_pci_passthrough(&self.vm)?;
        debug!("Host advertises {} passthrough device(s)", devices.len());
        Ok(devices.into_iter().find(|dev| address.matches(&dev.pci_device.id)))
    }

    /// Attaches the host device at `address` to the VM
    ///
    /// Args:
    ///     address: PCI address of the host device, sent as the backing id
    ///     dry_run: If true, only log the request without submitting it
    ///
    /// Returns:
    ///     Result indicating success or failure
    pub fn hot_add(&self, address: &PciAddress, dry_run: bool) -> Result<()> {
        let target = match self.find_available_device(address)? {
            Some(target) => target,
            None => {
                error!("Can not get device with PCI address {}!", address);
                return Err(Error::DeviceNotOnHost(address.to_string()));
            }
        };

        let spec = build_hot_add_spec(address, &target)?;
        info!("Start to add device {}", address);
        self.reconfigure(&spec, dry_run)?;
        info!("Done!");
        Ok(())
    }

    /// Detaches the passthrough device at `address` from the VM
    ///
    /// Args:
    ///     address: Backing address of the attached passthrough device
    ///     dry_run: If true, only log the request without submitting it
    ///
    /// Returns:
    ///     Result indicating success or failure
    pub fn hot_remove(&self, address: &PciAddress, dry_run: bool) -> Result<()> {
        let mut by_address = passthrough_devices_by_address(self.api.attached_devices(&self.vm)?);

        let device = match by_address.remove(address.as_str()) {
            Some(device) => device,
            None => {
                error!("No passthrough device {} on VM {}", address, self.vm_name);
                return Err(Error::DeviceNotAttached {
                    address: address.to_string(),
                    vm: self.vm_name.clone(),
                });
            }
        };
        info!("Got passthru device {} on VM {}", address, self.vm_name);

        let spec = build_hot_remove_spec(device);
        info!("Start to remove device {}", address);
        self.reconfigure(&spec, dry_run)?;
        info!("Done!");
        Ok(())
    }

    /// Logs what the host offers and what the VM already has attached
    pub fn list_devices(&self) -> Result<()> {
        let available = self.api.available_pci_passthrough(&self.vm)?;
        info!("Host of {} advertises {} passthrough device(s):", self.vm_name, available.len());
        for dev in &available {
            info!(
                "  {} [{}:{:04x}] {} {}",
                dev.pci_device.id,
                dev.pci_device.vendor_id_hex(),
                dev.pci_device.device_id as u16,
                dev.pci_device.vendor_name,
                dev.pci_device.device_name
            );
        }

        let attached_devices = self.api.attached_devices(&self.vm)?;
        let mut attached: Vec<_> = passthrough_devices_by_address(attached_devices)
            .into_keys()
            .collect();
        attached.sort();
        if attached.is_empty() {
            info!("No passthrough devices attached to {}", self.vm_name);
        } else {
            info!("Attached to {}: {}", self.vm_name, attached.join(", "));
        }
        Ok(())
    }

    /// Submits `spec` and waits for it, or only logs it on a dry run
    ///
    /// Returns the finished task, `None` on a dry run.
    fn reconfigure(&self, spec: &ConfigSpec, dry_run: bool) -> Result<Option<TaskInfo>> {
        if dry_run {
            info!(
                "[DRY RUN] Would reconfigure {} with:\n{}",
                self.vm_name,
                serde_json::to_string_pretty(spec)?
            );
            return Ok(None);
        }

        let task = self.api.reconfigure_vm(&self.vm, spec)?;
        debug!("Submitted reconfigure of {} as {}", self.vm, task);
        wait_for_task(self.api, &task, self.poll_interval).map(Some)
    }
}

/// Reconfigure request adding a passthrough device at `address`
///
/// The backing carries the requested address as typed; everything else is
/// copied from the host's entry in `target`.
pub fn build_hot_add_spec(
    address: &PciAddress,
    target: &PciPassthroughInfo,
) -> Result<ConfigSpec> {
    let device = PciPassthroughDevice {
        key: NEW_DEVICE_KEY,
        backing: PciPassthroughBacking {
            device_name: target.pci_device.device_name.clone(),
            id: address.to_string(),
            device_id: target.pci_device.device_id_hex(),
            system_id: target.system_id.clone(),
            vendor_id: target.pci_device.vendor_id,
        },
    };

    Ok(ConfigSpec {
        device_change: vec![DeviceConfigSpec {
            operation: DeviceOperation::Add,
            device: serde_json::to_value(&device)?,
        }],
        ..Default::default()
    })
}

/// Reconfigure request removing `device` exactly as the VM reported it
pub fn build_hot_remove_spec(device: Value) -> ConfigSpec {
    ConfigSpec {
        device_change: vec![DeviceConfigSpec {
            operation: DeviceOperation::Remove,
            device,
        }],
        ..Default::default()
    }
}

/// Maps attached passthrough devices by backing address
///
/// Non-passthrough hardware is skipped. When two devices share an address
/// the later one wins.
pub fn passthrough_devices_by_address(devices: Vec<Value>) -> HashMap<String, Value> {
    devices
        .into_iter()
        .filter_map(|device| {
            let address = attached_passthrough_address(&device)?.to_string();
            Some((address, device))
        })
        .collect()
}
