//! Audio subsystem module

pub mod devices;

pub use devices::scan_output_sinks;
