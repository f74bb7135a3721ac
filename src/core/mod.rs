// Core module definitions for hotplug-passthru

pub mod inventory;
pub mod passthrough;
pub mod pci;
pub mod sequencer;
pub mod task;
