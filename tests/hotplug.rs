// Sequencer tests against an in-memory management endpoint

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::{json, Value};

use hotplug_passthru::core::inventory::find_vm;
use hotplug_passthru::core::passthrough::PassthroughManager;
use hotplug_passthru::core::sequencer::{execute, run, DeviceAction, Plan};
use hotplug_passthru::core::task::wait_for_task;
use hotplug_passthru::error::{Error, Result};
use hotplug_passthru::vsphere::types::{
    ConfigSpec, DeviceOperation, HostPciDevice, LocalizedMethodFault, ManagedObjectReference,
    MotherboardLayout, PciPassthroughInfo, TaskInfo, TaskState,
};
use hotplug_passthru::vsphere::ManagementApi;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Reconfigure { vm: String, spec: ConfigSpec },
    TaskInfo(String),
    Logout,
}

/// Inventory of named VMs sharing one host; every task walks a scripted
/// list of states and then stays in the last one
struct FakeApi {
    vms: Vec<(ManagedObjectReference, String)>,
    host_devices: Vec<PciPassthroughInfo>,
    attached: HashMap<String, Vec<Value>>,
    task_script: Vec<TaskState>,
    task_states: RefCell<HashMap<String, VecDeque<TaskState>>>,
    calls: RefCell<Vec<Call>>,
    next_task: RefCell<u32>,
    fail_logout: bool,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            vms: vec![
                (vm_ref("vm-10"), "web-01".to_string()),
                (vm_ref("vm-11"), "gpu-vm".to_string()),
                (vm_ref("vm-12"), "gpu-vm".to_string()),
            ],
            host_devices: vec![
                host_device("0000:3b:00.0", 0x15b3, 0x101b, "MT28908 Family [ConnectX-6]"),
                host_device("0000:44:00.0", 0x10de, 0x1eb8, "TU104GL [Tesla T4]"),
            ],
            attached: HashMap::new(),
            task_script: vec![TaskState::Queued, TaskState::Running, TaskState::Success],
            task_states: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            next_task: RefCell::new(1),
            fail_logout: false,
        }
    }

    fn with_attached(mut self, vm: &str, devices: Vec<Value>) -> Self {
        self.attached.insert(vm.to_string(), devices);
        self
    }

    fn with_task_script(mut self, script: Vec<TaskState>) -> Self {
        self.task_script = script;
        self
    }

    fn reconfigures(&self) -> Vec<(String, ConfigSpec)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Reconfigure { vm, spec } => Some((vm.clone(), spec.clone())),
                _ => None,
            })
            .collect()
    }

    fn logged_out(&self) -> bool {
        self.calls.borrow().contains(&Call::Logout)
    }
}

impl ManagementApi for FakeApi {
    fn virtual_machines(&self) -> Result<Vec<ManagedObjectReference>> {
        Ok(self.vms.iter().map(|(vm, _)| vm.clone()).collect())
    }

    fn vm_name(&self, vm: &ManagedObjectReference) -> Result<String> {
        Ok(self
            .vms
            .iter()
            .find(|(r, _)| r == vm)
            .map(|(_, name)| name.clone())
            .unwrap_or_default())
    }

    fn available_pci_passthrough(
        &self,
        _vm: &ManagedObjectReference,
    ) -> Result<Vec<PciPassthroughInfo>> {
        Ok(self.host_devices.clone())
    }

    fn attached_devices(&self, vm: &ManagedObjectReference) -> Result<Vec<Value>> {
        Ok(self.attached.get(&vm.value).cloned().unwrap_or_default())
    }

    fn reconfigure_vm(
        &self,
        vm: &ManagedObjectReference,
        spec: &ConfigSpec,
    ) -> Result<ManagedObjectReference> {
        self.calls.borrow_mut().push(Call::Reconfigure {
            vm: vm.value.clone(),
            spec: spec.clone(),
        });
        let mut next = self.next_task.borrow_mut();
        let task = format!("task-{}", *next);
        *next += 1;
        self.task_states
            .borrow_mut()
            .insert(task.clone(), self.task_script.iter().copied().collect());
        Ok(ManagedObjectReference::new("Task", task))
    }

    fn task_info(&self, task: &ManagedObjectReference) -> Result<TaskInfo> {
        self.calls.borrow_mut().push(Call::TaskInfo(task.value.clone()));
        let mut states = self.task_states.borrow_mut();
        let queue = states.get_mut(&task.value).expect("unknown task");
        let state = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            *queue.front().unwrap()
        };
        let mut info = TaskInfo::new(task.value.clone(), state);
        if state == TaskState::Error {
            info.error = Some(LocalizedMethodFault {
                localized_message: Some(
                    "The operation is not allowed in the current state.".to_string(),
                ),
                fault: Some(json!({ "_typeName": "InvalidPowerState" })),
            });
        }
        Ok(info)
    }

    fn logout(&self) -> Result<()> {
        self.calls.borrow_mut().push(Call::Logout);
        if self.fail_logout {
            return Err(Error::Fault {
                method: "SessionManager.Logout".to_string(),
                status: 500,
                fault: "NotAuthenticated".to_string(),
                message: "session expired".to_string(),
            });
        }
        Ok(())
    }
}

fn vm_ref(id: &str) -> ManagedObjectReference {
    ManagedObjectReference::new("VirtualMachine", id)
}

fn host_device(id: &str, vendor_id: u16, device_id: u16, name: &str) -> PciPassthroughInfo {
    PciPassthroughInfo {
        pci_device: HostPciDevice {
            id: id.to_string(),
            vendor_id: vendor_id as i16,
            device_id: device_id as i16,
            vendor_name: String::new(),
            device_name: name.to_string(),
        },
        system_id: "5f6b9c2e-7a1d-host".to_string(),
    }
}

fn attached_passthrough(key: i32, id: &str) -> Value {
    json!({
        "_typeName": "VirtualPCIPassthrough",
        "key": key,
        "controllerKey": 100,
        "backing": {
            "_typeName": "VirtualPCIPassthroughDeviceBackingInfo",
            "id": id,
            "deviceId": "1eb8",
            "systemId": "5f6b9c2e-7a1d-host",
            "vendorId": 4318
        }
    })
}

fn plan(vm: &str) -> Plan {
    Plan {
        poll_interval: Duration::ZERO,
        ..Plan::new(vm)
    }
}

fn address(s: &str) -> hotplug_passthru::core::pci::PciAddress {
    s.parse().unwrap()
}

#[test]
fn known_vm_resolves_to_first_match() {
    let api = FakeApi::new();
    assert_eq!(find_vm(&api, "gpu-vm").unwrap(), Some(vm_ref("vm-11")));
    assert_eq!(find_vm(&api, "web-01").unwrap(), Some(vm_ref("vm-10")));
}

#[test]
fn absent_vm_is_no_match() {
    let api = FakeApi::new();
    assert_eq!(find_vm(&api, "GPU-VM").unwrap(), None);
}

#[test]
fn absent_vm_stops_before_any_reconfigure() {
    let api = FakeApi::new();
    let plan = Plan {
        configure: true,
        action: Some(DeviceAction::Add(address("0000:44:00.0"))),
        ..plan("missing-vm")
    };
    let err = run(&api, &plan).unwrap_err();
    assert!(matches!(err, Error::VmNotFound(ref name) if name == "missing-vm"));
    assert_eq!(err.exit_code(), 1);
    assert!(api.reconfigures().is_empty());
}

#[test]
fn device_lookup_ignores_case() {
    let api = FakeApi::new();
    let manager = PassthroughManager::new(&api, vm_ref("vm-11"), "gpu-vm", Duration::ZERO);

    let found = manager.find_available_device(&address("0000:3B:00.0")).unwrap().unwrap();
    assert_eq!(found.pci_device.id, "0000:3b:00.0");
    assert_eq!(found.pci_device.device_name, "MT28908 Family [ConnectX-6]");

    assert!(manager.find_available_device(&address("0000:99:00.0")).unwrap().is_none());
}

#[test]
fn hot_add_of_unknown_device_exits_with_one() {
    let api = FakeApi::new();
    let plan = Plan {
        action: Some(DeviceAction::Add(address("0000:99:00.0"))),
        ..plan("gpu-vm")
    };
    let err = run(&api, &plan).unwrap_err();
    assert!(matches!(err, Error::DeviceNotOnHost(ref a) if a == "0000:99:00.0"));
    assert_eq!(err.exit_code(), 1);
    assert!(api.reconfigures().is_empty());
}

#[test]
fn hot_add_submits_one_add_task_and_waits() {
    let api = FakeApi::new();
    let plan = Plan {
        action: Some(DeviceAction::Add(address("0000:44:00.0"))),
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();

    let reconfigures = api.reconfigures();
    assert_eq!(reconfigures.len(), 1);
    let (vm, spec) = &reconfigures[0];
    assert_eq!(vm, "vm-11");
    assert_eq!(spec.device_change.len(), 1);
    assert_eq!(spec.device_change[0].operation, DeviceOperation::Add);

    let backing = &spec.device_change[0].device["backing"];
    assert_eq!(backing["id"], "0000:44:00.0");
    assert_eq!(backing["deviceId"], "0x1eb8");
    assert_eq!(backing["vendorId"], 0x10de);
    assert_eq!(backing["systemId"], "5f6b9c2e-7a1d-host");
    assert_eq!(backing["deviceName"], "TU104GL [Tesla T4]");

    // queued, running, success
    let polls = api
        .calls
        .borrow()
        .iter()
        .filter(|c| matches!(c, Call::TaskInfo(t) if t == "task-1"))
        .count();
    assert_eq!(polls, 3);
}

#[test]
fn hot_add_sends_the_address_as_requested() {
    let api = FakeApi::new();
    let plan = Plan {
        action: Some(DeviceAction::Add(address("0000:3B:00.0"))),
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();

    let reconfigures = api.reconfigures();
    let backing = &reconfigures[0].1.device_change[0].device["backing"];
    assert_eq!(backing["id"], "0000:3B:00.0");
    assert_eq!(backing["deviceName"], "MT28908 Family [ConnectX-6]");
}

#[test]
fn hot_remove_submits_attached_device() {
    let attached = attached_passthrough(13000, "0000:44:00.0");
    let api = FakeApi::new().with_attached(
        "vm-11",
        vec![
            json!({ "_typeName": "VirtualDisk", "key": 2000 }),
            attached.clone(),
            attached_passthrough(13001, "0000:3b:00.0"),
        ],
    );
    let plan = Plan {
        action: Some(DeviceAction::Remove(address("0000:44:00.0"))),
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();

    let reconfigures = api.reconfigures();
    assert_eq!(reconfigures.len(), 1);
    let change = &reconfigures[0].1.device_change;
    assert_eq!(change.len(), 1);
    assert_eq!(change[0].operation, DeviceOperation::Remove);
    assert_eq!(change[0].device, attached);
}

#[test]
fn hot_remove_of_unattached_device_is_an_error() {
    let api = FakeApi::new()
        .with_attached("vm-11", vec![attached_passthrough(13000, "0000:3b:00.0")]);
    let plan = Plan {
        action: Some(DeviceAction::Remove(address("0000:44:00.0"))),
        ..plan("gpu-vm")
    };
    let err = run(&api, &plan).unwrap_err();
    assert!(matches!(
        err,
        Error::DeviceNotAttached { ref address, ref vm }
            if address == "0000:44:00.0" && vm == "gpu-vm"
    ));
    assert!(api.reconfigures().is_empty());
}

#[test]
fn configure_runs_layout_then_hotplug_flag_before_add() {
    let api = FakeApi::new();
    let plan = Plan {
        configure: true,
        action: Some(DeviceAction::Add(address("0000:44:00.0"))),
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();

    let specs: Vec<ConfigSpec> = api.reconfigures().into_iter().map(|(_, spec)| spec).collect();
    assert_eq!(specs.len(), 3);

    assert_eq!(specs[0].motherboard_layout, Some(MotherboardLayout::AcpiHostBridges));
    assert_eq!(specs[0].fixed_passthru_hot_plug_enabled, None);
    assert!(specs[0].device_change.is_empty());

    assert_eq!(specs[1].motherboard_layout, None);
    assert_eq!(specs[1].fixed_passthru_hot_plug_enabled, Some(true));
    assert!(specs[1].device_change.is_empty());

    assert_eq!(specs[2].device_change[0].operation, DeviceOperation::Add);
}

#[test]
fn configure_waits_for_each_task_in_turn() {
    let api = FakeApi::new();
    let plan = Plan {
        configure: true,
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();

    // The second reconfigure is only submitted after task-1 reported success.
    let calls = api.calls.borrow();
    let second_submit = calls
        .iter()
        .position(|c| match c {
            Call::Reconfigure { spec, .. } => spec.fixed_passthru_hot_plug_enabled.is_some(),
            _ => false,
        })
        .unwrap();
    let last_task1_poll = calls
        .iter()
        .rposition(|c| matches!(c, Call::TaskInfo(t) if t == "task-1"))
        .unwrap();
    assert!(last_task1_poll < second_submit);
}

#[test]
fn failed_configure_task_stops_the_sequence() {
    let api = FakeApi::new().with_task_script(vec![TaskState::Running, TaskState::Error]);
    let plan = Plan {
        configure: true,
        action: Some(DeviceAction::Add(address("0000:44:00.0"))),
        ..plan("gpu-vm")
    };
    let err = run(&api, &plan).unwrap_err();
    match err {
        Error::TaskFailed { task, message } => {
            assert_eq!(task, "task-1");
            assert_eq!(message, "The operation is not allowed in the current state.");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.reconfigures().len(), 1);
}

#[test]
fn no_operation_changes_nothing() {
    let api = FakeApi::new();
    run(&api, &plan("gpu-vm")).unwrap();
    assert!(api.reconfigures().is_empty());
}

#[test]
fn dry_run_submits_nothing() {
    let api = FakeApi::new()
        .with_attached("vm-11", vec![attached_passthrough(13000, "0000:44:00.0")]);
    for action in [
        DeviceAction::Add(address("0000:44:00.0")),
        DeviceAction::Remove(address("0000:44:00.0")),
    ] {
        let plan = Plan {
            configure: true,
            action: Some(action),
            dry_run: true,
            ..plan("gpu-vm")
        };
        run(&api, &plan).unwrap();
    }
    assert!(api.calls.borrow().is_empty());
}

#[test]
fn dry_run_still_reports_missing_device() {
    let api = FakeApi::new();
    let plan = Plan {
        action: Some(DeviceAction::Add(address("0000:99:00.0"))),
        dry_run: true,
        ..plan("gpu-vm")
    };
    assert!(matches!(run(&api, &plan), Err(Error::DeviceNotOnHost(_))));
}

#[test]
fn listing_makes_no_changes() {
    let api = FakeApi::new()
        .with_attached("vm-11", vec![attached_passthrough(13000, "0000:44:00.0")]);
    let plan = Plan {
        list: true,
        ..plan("gpu-vm")
    };
    run(&api, &plan).unwrap();
    assert!(api.reconfigures().is_empty());
}

#[test]
fn execute_logs_out_after_success_and_failure() {
    let api = FakeApi::new();
    execute(&api, &plan("gpu-vm")).unwrap();
    assert!(api.logged_out());

    let api = FakeApi::new();
    assert!(execute(&api, &plan("missing-vm")).is_err());
    assert!(api.logged_out());
}

#[test]
fn logout_failure_does_not_mask_result() {
    let mut api = FakeApi::new();
    api.fail_logout = true;
    execute(&api, &plan("gpu-vm")).unwrap();
    assert!(api.logged_out());
}

#[test]
fn wait_returns_after_success() {
    let api = FakeApi::new().with_task_script(vec![
        TaskState::Queued,
        TaskState::Running,
        TaskState::Running,
        TaskState::Success,
    ]);
    let task = api.reconfigure_vm(&vm_ref("vm-11"), &ConfigSpec::default()).unwrap();
    let info = wait_for_task(&api, &task, Duration::ZERO).unwrap();
    assert_eq!(info.state, TaskState::Success);
    assert_eq!(info.key, "task-1");
}
