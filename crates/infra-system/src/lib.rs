// Citewatch Infrastructure - System Adapters
// Implements: ProcessControl

pub mod process_control;

pub use process_control::SignalProcessControl;
