// hotplug-passthru
//
// Hot-add and hot-remove PCI passthrough devices on vSphere virtual machines

// Command line interface
pub mod cli;

// Core functionality modules
pub mod core;

// Error types
pub mod error;

// vSphere management API access
pub mod vsphere;

// Utility functions
pub mod utils;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
