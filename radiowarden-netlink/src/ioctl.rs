//! Classic interface ioctls.
//!
//! Covers the operations nl80211 does not: interface flags (up/down), hardware
//! address assignment and the wireless-extension power-save and frequency
//! calls. Each operation opens a throwaway `AF_INET`/`SOCK_DGRAM` socket and
//! closes it on completion, error paths included, so a crashed caller never
//! leaks a descriptor across the lifecycle.

use std::io;
use std::os::unix::io::RawFd;

use log::debug;

use crate::error::{NetlinkError, Result};

// Wireless-extension requests (linux/wireless.h). Not exported by libc.
const SIOCSIWPOWER: libc::c_ulong = 0x8B2C;
const SIOCGIWFREQ: libc::c_ulong = 0x8B05;

const ARPHRD_ETHER: libc::c_ushort = 1;
// MAC family for an interface carrying Radiotap headers (monitor mode).
const ARPHRD_IEEE80211_RADIOTAP: libc::c_ushort = 803;

const IFNAMSIZ: usize = libc::IFNAMSIZ;

/// `struct iw_param` from linux/wireless.h, used for the power-save call.
#[repr(C)]
#[derive(Clone, Copy)]
struct IwParam {
    value: i32,
    fixed: u8,
    disabled: u8,
    flags: u16,
}

/// `struct iw_freq`: frequency as mantissa * 10^exponent Hz.
#[repr(C)]
#[derive(Clone, Copy)]
struct IwFreq {
    m: i32,
    e: i16,
    i: u8,
    flags: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
union IwReqData {
    power: IwParam,
    freq: IwFreq,
    // The kernel union is 16 bytes (pointer + length + flags).
    raw: [u8; 16],
}

#[repr(C)]
struct IwReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    u: IwReqData,
}

/// Decoded interface flags.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceFlags {
    pub raw: i32,
    pub is_up: bool,
    pub is_running: bool,
}

impl InterfaceFlags {
    fn from_raw(raw: i32) -> Self {
        Self {
            raw,
            is_up: raw & libc::IFF_UP != 0,
            is_running: raw & libc::IFF_RUNNING != 0,
        }
    }
}

/// Short-lived control socket, closed on drop.
struct ControlSocket {
    fd: RawFd,
}

impl ControlSocket {
    fn open(operation: &str) -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(NetlinkError::io_error(
                operation.to_string(),
                io::Error::last_os_error(),
            ));
        }
        Ok(Self { fd })
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn ifname_bytes(name: &str) -> Result<[libc::c_char; IFNAMSIZ]> {
    if name.is_empty() {
        return Err(NetlinkError::InvalidArgument {
            parameter: "interface name".to_string(),
            value: String::new(),
            reason: "Interface name cannot be empty".to_string(),
        });
    }
    if name.len() >= IFNAMSIZ {
        return Err(NetlinkError::InvalidArgument {
            parameter: "interface name".to_string(),
            value: name.to_string(),
            reason: format!("Interface name exceeds {} bytes", IFNAMSIZ - 1),
        });
    }
    let mut buf = [0 as libc::c_char; IFNAMSIZ];
    for (dst, src) in buf.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(buf)
}

/// Interface-flag, MAC and power-management operations against a named
/// interface. Stateless; every call is a discrete open/ioctl/close round trip.
#[derive(Debug, Default)]
pub struct IfIoctls;

impl IfIoctls {
    pub fn new() -> Self {
        Self
    }

    fn get_raw_flags(&self, interface: &str) -> Result<i32> {
        let sock = ControlSocket::open("get interface flags")?;
        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        ifr.ifr_name = ifname_bytes(interface)?;
        let rc = unsafe { libc::ioctl(sock.fd, libc::SIOCGIFFLAGS, &mut ifr) };
        if rc < 0 {
            return Err(NetlinkError::io_error(
                format!("SIOCGIFFLAGS on '{}'", interface),
                io::Error::last_os_error(),
            ));
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_flags } as i32)
    }

    fn set_raw_flags(&self, interface: &str, flags: i32) -> Result<()> {
        let sock = ControlSocket::open("set interface flags")?;
        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        ifr.ifr_name = ifname_bytes(interface)?;
        ifr.ifr_ifru.ifru_flags = flags as libc::c_short;
        let rc = unsafe { libc::ioctl(sock.fd, libc::SIOCSIFFLAGS, &ifr) };
        if rc < 0 {
            return Err(NetlinkError::io_error(
                format!("SIOCSIFFLAGS on '{}'", interface),
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    /// Decoded flags for an interface (`IFF_UP`, `IFF_RUNNING` plus raw word).
    pub fn get_flags(&self, interface: &str) -> Result<InterfaceFlags> {
        Ok(InterfaceFlags::from_raw(self.get_raw_flags(interface)?))
    }

    /// Set `IFF_UP` on an interface.
    pub fn bring_up(&self, interface: &str) -> Result<()> {
        let flags = self.get_raw_flags(interface)?;
        self.set_raw_flags(interface, flags | libc::IFF_UP)?;
        debug!("interface {} set to UP", interface);
        Ok(())
    }

    /// Clear `IFF_UP` on an interface.
    pub fn bring_down(&self, interface: &str) -> Result<()> {
        let flags = self.get_raw_flags(interface)?;
        self.set_raw_flags(interface, flags & !libc::IFF_UP)?;
        debug!("interface {} set to DOWN", interface);
        Ok(())
    }

    /// Assign a hardware address.
    ///
    /// A monitor-mode interface carries Radiotap headers and needs the
    /// `ARPHRD_IEEE80211_RADIOTAP` address family; everything else is plain
    /// Ethernet. The interface must be down for the kernel to accept this.
    pub fn set_mac_address(&self, interface: &str, mac: [u8; 6], monitor: bool) -> Result<()> {
        let sock = ControlSocket::open("set hardware address")?;
        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        ifr.ifr_name = ifname_bytes(interface)?;
        unsafe {
            ifr.ifr_ifru.ifru_hwaddr.sa_family = if monitor {
                ARPHRD_IEEE80211_RADIOTAP
            } else {
                ARPHRD_ETHER
            };
            for (dst, src) in ifr.ifr_ifru.ifru_hwaddr.sa_data.iter_mut().zip(mac) {
                *dst = src as libc::c_char;
            }
        }
        let rc = unsafe { libc::ioctl(sock.fd, libc::SIOCSIFHWADDR, &ifr) };
        if rc < 0 {
            return Err(NetlinkError::io_error(
                format!("SIOCSIFHWADDR on '{}'", interface),
                io::Error::last_os_error(),
            ));
        }
        debug!(
            "interface {} hardware address set ({})",
            interface,
            if monitor { "radiotap" } else { "ether" }
        );
        Ok(())
    }

    /// Disable wireless power-save mode, the equivalent of
    /// `iwconfig <iface> power off`.
    ///
    /// The wl12xx firmware corrupts itself coming out of power save; an
    /// interface activated while power save is still on can wedge the radio
    /// until a hard power cycle. Callers must issue this before bringing any
    /// freshly created interface up.
    pub fn set_power_save_off(&self, interface: &str) -> Result<()> {
        let sock = ControlSocket::open("disable power save")?;
        let mut wrq: IwReq = unsafe { std::mem::zeroed() };
        wrq.ifr_name = ifname_bytes(interface)?;
        wrq.u.power.disabled = 1;
        let rc = unsafe { libc::ioctl(sock.fd, SIOCSIWPOWER, &wrq) };
        if rc < 0 {
            return Err(NetlinkError::io_error(
                format!("SIOCSIWPOWER on '{}'", interface),
                io::Error::last_os_error(),
            ));
        }
        debug!("power save disabled on {}", interface);
        Ok(())
    }

    /// Current operating frequency via the legacy wireless-extension call,
    /// reported as a (mantissa, exponent) pair in Hz.
    pub fn get_frequency(&self, interface: &str) -> Result<(i32, i16)> {
        let sock = ControlSocket::open("get frequency")?;
        let mut wrq: IwReq = unsafe { std::mem::zeroed() };
        wrq.ifr_name = ifname_bytes(interface)?;
        let rc = unsafe { libc::ioctl(sock.fd, SIOCGIWFREQ, &mut wrq) };
        if rc < 0 {
            return Err(NetlinkError::io_error(
                format!("SIOCGIWFREQ on '{}'", interface),
                io::Error::last_os_error(),
            ));
        }
        let freq = unsafe { wrq.u.freq };
        Ok((freq.m, freq.e))
    }

    /// Current operating frequency in MHz, or `None` if the driver reports a
    /// channel index instead of a frequency.
    pub fn get_frequency_mhz(&self, interface: &str) -> Result<Option<u32>> {
        let (mantissa, exponent) = self.get_frequency(interface)?;
        Ok(frequency_pair_to_mhz(mantissa, exponent))
    }
}

fn frequency_pair_to_mhz(mantissa: i32, exponent: i16) -> Option<u32> {
    if mantissa <= 0 {
        return None;
    }
    let hz = (mantissa as i64) * 10i64.checked_pow(exponent.max(0) as u32)?;
    // Values below 1 KHz are channel indices, not frequencies.
    if hz < 1_000 {
        return None;
    }
    Some((hz / 1_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decode_up_and_running() {
        let flags = InterfaceFlags::from_raw(libc::IFF_UP | libc::IFF_RUNNING);
        assert!(flags.is_up);
        assert!(flags.is_running);

        let down = InterfaceFlags::from_raw(libc::IFF_BROADCAST);
        assert!(!down.is_up);
        assert!(!down.is_running);
    }

    #[test]
    fn ifname_rejects_empty_and_oversized() {
        assert!(ifname_bytes("").is_err());
        assert!(ifname_bytes("a-name-way-beyond-ifnamsiz").is_err());
        let buf = ifname_bytes("mon0").unwrap();
        assert_eq!(buf[0] as u8, b'm');
        assert_eq!(buf[4], 0);
    }

    #[test]
    fn frequency_pair_conversion() {
        // 2.437 GHz reported as 2437 * 10^6 Hz.
        assert_eq!(frequency_pair_to_mhz(2437, 6), Some(2437));
        // Same frequency as 2.437e9 with a raw mantissa.
        assert_eq!(frequency_pair_to_mhz(2_437_000_000i64 as i32, 0), None); // overflows i32, not representable
        assert_eq!(frequency_pair_to_mhz(2_437_000, 3), Some(2437));
        // Channel index, not a frequency.
        assert_eq!(frequency_pair_to_mhz(6, 0), None);
        assert_eq!(frequency_pair_to_mhz(0, 0), None);
    }
}
