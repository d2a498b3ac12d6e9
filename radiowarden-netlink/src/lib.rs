//! # radiowarden-netlink
//!
//! Kernel plumbing for the radiowarden interface lifecycle coordinator:
//!
//! - **nl80211**: generic-netlink command channel for enumerating, creating,
//!   deleting and re-moding virtual wireless interfaces, plus channel tuning.
//! - **ioctl**: classic socket ioctls for interface flags, MAC assignment and
//!   the wireless-extension power-save and frequency calls.
//!
//! Linux-only. Code is gated with `#[cfg(target_os = "linux")]` and compiles
//! on other platforms but functions are unavailable.

#[cfg(target_os = "linux")]
pub mod ioctl;
#[cfg(target_os = "linux")]
pub mod nl80211;

pub mod error;

pub use error::{NetlinkError, Result};

#[cfg(target_os = "linux")]
pub use ioctl::{IfIoctls, InterfaceFlags};
#[cfg(target_os = "linux")]
pub use nl80211::{
    channel_to_frequency, frequency_to_channel, ChannelWidth, Nl80211Session, VifMode,
    WifiInterface,
};
