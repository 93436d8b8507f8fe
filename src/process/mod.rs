//! Rendering client process lifecycle.

pub mod launcher;
pub mod watchdog;

pub use launcher::{ClientProcessHandle, Deployer, LocalDeployer, ProcessControl, ProcessExit};
pub use watchdog::{classify, spawn_watchdog, ExitClass, ExitReport};
