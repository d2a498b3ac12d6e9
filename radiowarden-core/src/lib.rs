//! Core lifecycle logic for the dual-radio wireless appliance.
//!
//! The [`coordinator`] module owns the boot-time sequencing; [`registry`],
//! [`classify`] and [`retry`] are its building blocks, and [`backend`] defines
//! the seams to the kernel so everything above it can be tested with fakes.

// The production backends speak nl80211 and wireless-extensions ioctls; there
// is nothing meaningful to build elsewhere.
#[cfg(not(target_os = "linux"))]
compile_error!("radiowarden-core is intended to be built on Linux only.");

pub mod backend;
pub mod classify;
pub mod coordinator;
pub mod registry;
pub mod retry;

pub use backend::{CommandChannel, IfController, IoctlController, NetlinkChannel};
pub use classify::{classify, Classification};
pub use coordinator::{
    Coordinator, CoordinatorConfig, CreateReport, InitReport, LifecycleError, LifecycleState,
    Role, RoleMap,
};
pub use registry::{InterfaceRegistry, RadioInterface, RegistrySnapshot};
pub use retry::{poll_until, PollConfig};
