// Command line interface for hotplug-passthru

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::core::pci::PciAddress;
use crate::core::sequencer::{DeviceAction, Plan};
use crate::vsphere::client::{ConnectConfig, DEFAULT_API_RELEASE, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Device change to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Hot-add the device
    Add,
    /// Hot-remove the device
    Remove,
}

/// Hot-add or hot-remove a PCI passthrough device on a vSphere VM
#[derive(Debug, Parser)]
#[command(name = "hotplug-passthru", version, about)]
pub struct Cli {
    /// VC IP to connect to
    #[arg(short = 'i', long = "vcip", env = "VC_HOST")]
    pub vcip: String,

    /// User name to use when connecting to VC
    #[arg(short = 'u', long = "user", env = "VC_USER")]
    pub user: String,

    /// Password to use when connecting to VC
    #[arg(short = 'p', long = "password", env = "VC_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// VM name
    #[arg(short = 'v', long = "vm")]
    pub vm: String,

    /// The address of PCI device with passthrough enabled e.g. 0000:44:00.0
    #[arg(
        short = 'd',
        long = "device",
        required_if_eq_any = [("operation", "add"), ("operation", "remove")]
    )]
    pub device: Option<PciAddress>,

    /// Operation to be performed: "add" for hotadd or "remove" for hotremove
    #[arg(short = 'o', long = "operation", value_enum)]
    pub operation: Option<Operation>,

    /// Configure given VM to enable future hotadd, VM should be powered off
    #[arg(short = 'c', long = "configure")]
    pub configure: bool,

    /// List passthrough devices offered by the host and attached to the VM
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Log reconfigure requests instead of submitting them
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// vim25 API release used in request paths
    #[arg(long = "api-release", default_value = DEFAULT_API_RELEASE)]
    pub api_release: String,

    /// Interval between task state polls, in milliseconds
    #[arg(long = "poll-interval-ms", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Timeout of a single HTTP request, in seconds
    #[arg(long = "request-timeout-secs", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Cli {
    /// Splits the arguments into connection settings and the plan to run
    pub fn into_parts(self) -> (ConnectConfig, Plan) {
        let action = match (self.operation, self.device) {
            (Some(Operation::Add), Some(address)) => Some(DeviceAction::Add(address)),
            (Some(Operation::Remove), Some(address)) => Some(DeviceAction::Remove(address)),
            _ => None,
        };

        let config = ConnectConfig {
            endpoint: self.vcip,
            user: self.user,
            password: self.password,
            api_release: self.api_release,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        };

        let plan = Plan {
            vm_name: self.vm,
            configure: self.configure,
            action,
            list: self.list,
            dry_run: self.dry_run,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        };

        (config, plan)
    }
}
