//! Kernel backend traits and their production implementations.
//!
//! The coordinator is written against these traits so tests can substitute
//! scripted fakes; the real implementations delegate to radiowarden-netlink.
//! Both backends are acquire-on-demand: every operation opens its own session
//! or socket and releases it on completion, error paths included.

use radiowarden_netlink::{ChannelWidth, IfIoctls, Nl80211Session, Result, VifMode};

use crate::registry::RadioInterface;

/// Structured request/response channel to the kernel wireless subsystem.
pub trait CommandChannel {
    fn enumerate(&mut self) -> Result<Vec<RadioInterface>>;
    fn create_interface(&mut self, phy: u32, requested_name: &str, mode: VifMode) -> Result<()>;
    fn delete_interface(&mut self, name: &str) -> Result<()>;
    /// Long-running call (tens of seconds on some drivers); not retried here.
    fn set_interface_mode(&mut self, name: &str, mode: VifMode) -> Result<()>;
    fn set_frequency(&mut self, name: &str, frequency_mhz: u32, width: ChannelWidth) -> Result<()>;
}

/// Classic per-interface control operations (flags, MAC, power management).
pub trait IfController {
    fn bring_up(&mut self, name: &str) -> Result<()>;
    fn bring_down(&mut self, name: &str) -> Result<()>;
    fn set_mac_address(&mut self, name: &str, mac: [u8; 6], monitor: bool) -> Result<()>;
    fn set_power_save_off(&mut self, name: &str) -> Result<()>;
}

/// Production command channel: one nl80211 session per operation.
#[derive(Debug, Default)]
pub struct NetlinkChannel;

impl NetlinkChannel {
    pub fn new() -> Self {
        Self
    }
}

impl CommandChannel for NetlinkChannel {
    fn enumerate(&mut self) -> Result<Vec<RadioInterface>> {
        let mut session = Nl80211Session::open()?;
        let interfaces = session.interfaces()?;
        Ok(interfaces
            .into_iter()
            .map(|i| RadioInterface {
                phy: i.wiphy,
                name: i.name,
                mac: i.mac,
                mode: i.mode,
                frequency_mhz: i.frequency_mhz,
            })
            .collect())
    }

    fn create_interface(&mut self, phy: u32, requested_name: &str, mode: VifMode) -> Result<()> {
        Nl80211Session::open()?.create_interface(phy, requested_name, mode)
    }

    fn delete_interface(&mut self, name: &str) -> Result<()> {
        Nl80211Session::open()?.delete_interface(name)
    }

    fn set_interface_mode(&mut self, name: &str, mode: VifMode) -> Result<()> {
        Nl80211Session::open()?.set_interface_mode(name, mode)
    }

    fn set_frequency(&mut self, name: &str, frequency_mhz: u32, width: ChannelWidth) -> Result<()> {
        Nl80211Session::open()?.set_frequency(name, frequency_mhz, width)
    }
}

/// Production interface controller over the classic ioctls.
#[derive(Debug, Default)]
pub struct IoctlController {
    ioctls: IfIoctls,
}

impl IoctlController {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IfController for IoctlController {
    fn bring_up(&mut self, name: &str) -> Result<()> {
        self.ioctls.bring_up(name)
    }

    fn bring_down(&mut self, name: &str) -> Result<()> {
        self.ioctls.bring_down(name)
    }

    fn set_mac_address(&mut self, name: &str, mac: [u8; 6], monitor: bool) -> Result<()> {
        self.ioctls.set_mac_address(name, mac, monitor)
    }

    fn set_power_save_off(&mut self, name: &str) -> Result<()> {
        self.ioctls.set_power_save_off(name)
    }
}
