//! Interface registry: versioned snapshots of the kernel's wireless interfaces.
//!
//! A snapshot is rebuilt wholesale on every refresh and never mutated in
//! place. Holding interface data across a refresh boundary is a staleness bug
//! (the same name or phy index may describe a different interface after a
//! radio resets), so every snapshot carries a version number and consumers are
//! expected to resolve names only against the version the coordinator
//! currently publishes.

use radiowarden_netlink::{NetlinkError, VifMode};

use crate::backend::CommandChannel;

/// One observed virtual interface at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioInterface {
    /// Owning physical radio index. Stable within one snapshot only.
    pub phy: u32,
    pub name: String,
    pub mac: [u8; 6],
    /// Operating mode as reported by the kernel; `None` when unspecified or
    /// outside the supported role set.
    pub mode: Option<VifMode>,
    pub frequency_mhz: Option<u32>,
}

impl RadioInterface {
    /// First three MAC bytes, identifying the chipset family.
    pub fn oui(&self) -> [u8; 3] {
        [self.mac[0], self.mac[1], self.mac[2]]
    }

    pub fn mac_string(&self) -> String {
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.mac[0], self.mac[1], self.mac[2], self.mac[3], self.mac[4], self.mac[5]
        )
    }
}

/// Immutable result of one registry refresh.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    version: u64,
    interfaces: Vec<RadioInterface>,
}

impl RegistrySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn interfaces(&self) -> &[RadioInterface] {
        &self.interfaces
    }

    /// Interface names in kernel enumeration order.
    pub fn names(&self) -> Vec<String> {
        self.interfaces.iter().map(|i| i.name.clone()).collect()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.interfaces.iter().any(|i| i.name == name)
    }

    /// Distinct physical radio indices, in first-seen order.
    pub fn distinct_phys(&self) -> Vec<u32> {
        let mut phys = Vec::new();
        for iface in &self.interfaces {
            if !phys.contains(&iface.phy) {
                phys.push(iface.phy);
            }
        }
        phys
    }
}

/// Issues enumeration requests and stamps each result with a fresh version.
///
/// Read-only with respect to kernel state; a zero-length result is valid (no
/// wireless interfaces is unusual but not an error).
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    next_version: u64,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(
        &mut self,
        channel: &mut dyn CommandChannel,
    ) -> Result<RegistrySnapshot, NetlinkError> {
        let interfaces = channel.enumerate()?;
        self.next_version += 1;
        log::debug!(
            "registry refresh v{}: {} interfaces",
            self.next_version,
            interfaces.len()
        );
        Ok(RegistrySnapshot {
            version: self.next_version,
            interfaces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandChannel;
    use radiowarden_netlink::{ChannelWidth, Result as NlResult};

    struct StaticChannel(Vec<RadioInterface>);

    impl CommandChannel for StaticChannel {
        fn enumerate(&mut self) -> NlResult<Vec<RadioInterface>> {
            Ok(self.0.clone())
        }
        fn create_interface(&mut self, _: u32, _: &str, _: VifMode) -> NlResult<()> {
            Ok(())
        }
        fn delete_interface(&mut self, _: &str) -> NlResult<()> {
            Ok(())
        }
        fn set_interface_mode(&mut self, _: &str, _: VifMode) -> NlResult<()> {
            Ok(())
        }
        fn set_frequency(&mut self, _: &str, _: u32, _: ChannelWidth) -> NlResult<()> {
            Ok(())
        }
    }

    fn iface(phy: u32, name: &str) -> RadioInterface {
        RadioInterface {
            phy,
            name: name.to_string(),
            mac: [0xd0, 0xb5, 0xc2, 0, 0, phy as u8],
            mode: Some(VifMode::Station),
            frequency_mhz: None,
        }
    }

    #[test]
    fn versions_strictly_increase() {
        let mut registry = InterfaceRegistry::new();
        let mut channel = StaticChannel(vec![iface(0, "wlan0")]);
        let first = registry.refresh(&mut channel).unwrap();
        let second = registry.refresh(&mut channel).unwrap();
        assert!(second.version() > first.version());
        assert_eq!(first.interfaces(), second.interfaces());
    }

    #[test]
    fn distinct_phys_preserves_first_seen_order() {
        let mut registry = InterfaceRegistry::new();
        let mut channel = StaticChannel(vec![
            iface(1, "wlan1"),
            iface(0, "wlan0"),
            iface(1, "mon0"),
        ]);
        let snap = registry.refresh(&mut channel).unwrap();
        assert_eq!(snap.distinct_phys(), vec![1, 0]);
        assert!(snap.contains_name("mon0"));
        assert!(!snap.contains_name("ap0"));
    }

    #[test]
    fn empty_enumeration_is_not_an_error() {
        let mut registry = InterfaceRegistry::new();
        let mut channel = StaticChannel(Vec::new());
        let snap = registry.refresh(&mut channel).unwrap();
        assert!(snap.interfaces().is_empty());
        assert_eq!(snap.names(), Vec::<String>::new());
    }

    #[test]
    fn oui_and_mac_formatting() {
        let i = iface(0, "wlan0");
        assert_eq!(i.oui(), [0xd0, 0xb5, 0xc2]);
        assert_eq!(i.mac_string(), "d0:b5:c2:00:00:00");
    }
}
