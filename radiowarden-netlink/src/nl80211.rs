//! Radio command channel over generic netlink (nl80211).
//!
//! A session resolves the nl80211 family on open and is intended to live for
//! one discrete operation; dropping it closes the socket. The lifecycle
//! coordinator opens a fresh session per request rather than holding one
//! across its whole run.

use std::io;
use std::time::Duration;

use log::{debug, info, warn};
use neli::{
    consts::nl::{NlmF, NlmFFlags},
    consts::socket::NlFamily,
    genl::{Genlmsghdr, Nlattr},
    nl::{NlPayload, Nlmsghdr},
    socket::NlSocketHandle,
    types::GenlBuffer,
};

use crate::error::{NetlinkError, Result};

const NL80211_GENL_NAME: &str = "nl80211";
const NLMSG_ERR: u16 = 2; // NLMSG_ERROR
const NLMSG_DONE: u16 = 3;

// nl80211 commands
const NL80211_CMD_SET_WIPHY: u8 = 2;
const NL80211_CMD_GET_INTERFACE: u8 = 5;
const NL80211_CMD_SET_INTERFACE: u8 = 6;
const NL80211_CMD_NEW_INTERFACE: u8 = 7;
const NL80211_CMD_DEL_INTERFACE: u8 = 8;

// nl80211 attributes
const NL80211_ATTR_WIPHY: u16 = 1;
const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_IFNAME: u16 = 4;
const NL80211_ATTR_IFTYPE: u16 = 5;
const NL80211_ATTR_MAC: u16 = 6;
const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
const NL80211_ATTR_WIPHY_CHANNEL_TYPE: u16 = 39;

// Interface types
const NL80211_IFTYPE_STATION: u32 = 2;
const NL80211_IFTYPE_AP: u32 = 3;
const NL80211_IFTYPE_MONITOR: u32 = 6;

// Channel types
const NL80211_CHAN_NO_HT: u32 = 0;
const NL80211_CHAN_HT20: u32 = 1;
const NL80211_CHAN_HT40MINUS: u32 = 2;
const NL80211_CHAN_HT40PLUS: u32 = 3;

/// Operating mode of a virtual interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VifMode {
    Station,
    AccessPoint,
    Monitor,
}

impl VifMode {
    fn to_nl80211(self) -> u32 {
        match self {
            Self::Station => NL80211_IFTYPE_STATION,
            Self::AccessPoint => NL80211_IFTYPE_AP,
            Self::Monitor => NL80211_IFTYPE_MONITOR,
        }
    }

    /// Modes outside this set (mesh, P2P, ...) decode to `None`; the
    /// coordinator treats them as "unspecified".
    pub fn from_nl80211(iftype: u32) -> Option<Self> {
        match iftype {
            NL80211_IFTYPE_STATION => Some(Self::Station),
            NL80211_IFTYPE_AP => Some(Self::AccessPoint),
            NL80211_IFTYPE_MONITOR => Some(Self::Monitor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "managed",
            Self::AccessPoint => "ap",
            Self::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for VifMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel bandwidth for the set-frequency command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelWidth {
    NoHt,
    Ht20,
    Ht40Minus,
    Ht40Plus,
}

impl ChannelWidth {
    fn to_nl80211(self) -> u32 {
        match self {
            Self::NoHt => NL80211_CHAN_NO_HT,
            Self::Ht20 => NL80211_CHAN_HT20,
            Self::Ht40Minus => NL80211_CHAN_HT40MINUS,
            Self::Ht40Plus => NL80211_CHAN_HT40PLUS,
        }
    }
}

/// One virtual interface as reported by a GET_INTERFACE dump.
#[derive(Debug, Clone)]
pub struct WifiInterface {
    /// Owning physical radio (wiphy index). Stable within one dump only; a
    /// radio that resets re-enumerates with a new index.
    pub wiphy: u32,
    pub ifindex: u32,
    pub name: String,
    pub mac: [u8; 6],
    pub mode: Option<VifMode>,
    pub frequency_mhz: Option<u32>,
}

/// One open nl80211 session.
pub struct Nl80211Session {
    socket: NlSocketHandle,
    family_id: u16,
}

impl Nl80211Session {
    /// Connect a generic-netlink socket and resolve the nl80211 family.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be created (requires CAP_NET_ADMIN) or the
    /// nl80211 family is not registered (wireless drivers not loaded).
    pub fn open() -> Result<Self> {
        let mut socket = NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(|e| {
            NetlinkError::ConnectionFailed(format!("Failed to create nl80211 socket: {}", e))
        })?;

        let family_id = socket.resolve_genl_family(NL80211_GENL_NAME).map_err(|e| {
            NetlinkError::ConnectionFailed(format!(
                "Failed to resolve nl80211 family (wireless drivers not loaded?): {}",
                e
            ))
        })?;

        Ok(Self { socket, family_id })
    }

    fn get_ifindex(&self, interface: &str) -> Result<u32> {
        let path = format!("/sys/class/net/{}/ifindex", interface);
        let contents = std::fs::read_to_string(&path).map_err(|_| {
            NetlinkError::InterfaceNotFound {
                name: interface.to_string(),
            }
        })?;
        contents
            .trim()
            .parse::<u32>()
            .map_err(|e| NetlinkError::InterfaceIndexError {
                interface: interface.to_string(),
                reason: e.to_string(),
            })
    }

    fn send_request(
        &mut self,
        operation: &str,
        cmd: u8,
        flags: &[NlmF],
        attrs: GenlBuffer<u16, neli::types::Buffer>,
    ) -> Result<()> {
        let genlhdr = Genlmsghdr::new(cmd, 1, attrs);
        let nlhdr = Nlmsghdr::new(
            None,
            self.family_id,
            NlmFFlags::new(flags),
            None,
            None,
            NlPayload::Payload(genlhdr),
        );
        self.socket.send(nlhdr).map_err(|e| {
            NetlinkError::netlink_error(operation.to_string(), format!("send failed: {}", e))
        })
    }

    /// Receive the single ACK/error response for a Request|Ack round trip.
    fn recv_ack(&mut self, operation: &str) -> Result<()> {
        let response: Nlmsghdr<u16, Genlmsghdr<u8, u16>> = self
            .socket
            .recv()
            .map_err(|e| {
                NetlinkError::netlink_error(operation.to_string(), format!("recv failed: {}", e))
            })?
            .ok_or_else(|| {
                NetlinkError::netlink_error(operation.to_string(), "no response received")
            })?;

        if response.nl_type != NLMSG_ERR {
            return Ok(());
        }
        let err_code = match response.nl_payload {
            NlPayload::Err(err) => err.error,
            NlPayload::Ack(ack) => ack.error,
            other => {
                return Err(NetlinkError::netlink_error(
                    operation.to_string(),
                    format!("unexpected payload {:?}", other),
                ));
            }
        };
        if err_code == 0 {
            // NLMSG_ERROR with error == 0 is the expected ACK.
            return Ok(());
        }
        let errno = err_code.abs();
        let io_err = io::Error::from_raw_os_error(errno);
        if errno == libc::EPERM || errno == libc::EACCES {
            return Err(NetlinkError::PermissionDenied {
                operation: operation.to_string(),
            });
        }
        Err(NetlinkError::OperationFailed(format!(
            "{} failed: {} (errno {})",
            operation, io_err, errno
        )))
    }

    /// Dump every virtual interface known to nl80211.
    ///
    /// Records missing a name or MAC (phantom P2P device entries) are skipped;
    /// a zero-length result is valid. Only a broken channel or an undecodable
    /// message stream is an error.
    pub fn interfaces(&mut self) -> Result<Vec<WifiInterface>> {
        self.send_request(
            "enumerate interfaces",
            NL80211_CMD_GET_INTERFACE,
            &[NlmF::Request, NlmF::Dump],
            GenlBuffer::new(),
        )?;

        set_recv_timeout(&self.socket, Duration::from_millis(800));

        let mut interfaces = Vec::new();
        loop {
            let msg: Nlmsghdr<u16, Genlmsghdr<u8, u16>> = match self.socket.recv() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    return Err(NetlinkError::netlink_error(
                        "enumerate interfaces",
                        format!("recv failed: {}", e),
                    ));
                }
            };

            if msg.nl_type == NLMSG_DONE {
                break;
            }
            if msg.nl_type == NLMSG_ERR {
                if let NlPayload::Err(err) = msg.nl_payload {
                    let errno = err.error.abs();
                    if errno != 0 {
                        let io_err = io::Error::from_raw_os_error(errno);
                        return Err(NetlinkError::netlink_error(
                            "enumerate interfaces",
                            format!("{} (errno {})", io_err, errno),
                        ));
                    }
                }
                break;
            }

            if let NlPayload::Payload(genl) = msg.nl_payload {
                match Self::decode_interface_record(&genl) {
                    Some(iface) => interfaces.push(iface),
                    None => debug!("skipping interface record without name/MAC"),
                }
            }
        }

        debug!("nl80211 dump returned {} interfaces", interfaces.len());
        Ok(interfaces)
    }

    fn decode_interface_record(genl: &Genlmsghdr<u8, u16>) -> Option<WifiInterface> {
        let mut wiphy: Option<u32> = None;
        let mut ifindex: Option<u32> = None;
        let mut name: Option<String> = None;
        let mut mac: Option<[u8; 6]> = None;
        let mut iftype: Option<u32> = None;
        let mut frequency: Option<u32> = None;

        let attrs = genl.get_attr_handle();
        for attr in attrs.iter() {
            let payload = attr.nla_payload.as_ref();
            match attr.nla_type.nla_type {
                NL80211_ATTR_WIPHY => wiphy = read_u32(payload),
                NL80211_ATTR_IFINDEX => ifindex = read_u32(payload),
                NL80211_ATTR_IFNAME => {
                    if let Ok(s) = std::str::from_utf8(payload) {
                        let trimmed = s.trim_end_matches('\0');
                        if !trimmed.is_empty() {
                            name = Some(trimmed.to_string());
                        }
                    }
                }
                NL80211_ATTR_MAC => {
                    if payload.len() >= 6 {
                        mac = Some([
                            payload[0], payload[1], payload[2], payload[3], payload[4], payload[5],
                        ]);
                    }
                }
                NL80211_ATTR_IFTYPE => iftype = read_u32(payload),
                NL80211_ATTR_WIPHY_FREQ => frequency = read_u32(payload),
                _ => {}
            }
        }

        Some(WifiInterface {
            wiphy: wiphy?,
            ifindex: ifindex.unwrap_or(0),
            name: name?,
            mac: mac?,
            mode: iftype.and_then(VifMode::from_nl80211),
            frequency_mhz: frequency,
        })
    }

    /// Create a virtual interface on a physical radio.
    ///
    /// The requested name is advisory: some drivers ignore it and pick their
    /// own. Callers must re-enumerate to learn the name actually assigned;
    /// the kernel gives no synchronous confirmation of it.
    pub fn create_interface(&mut self, wiphy: u32, requested_name: &str, mode: VifMode) -> Result<()> {
        let mut attrs = GenlBuffer::new();
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_WIPHY, wiphy).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create wiphy attr: {}", e))
            })?,
        );
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFNAME, requested_name.as_bytes()).map_err(
                |e| NetlinkError::OperationFailed(format!("Failed to create ifname attr: {}", e)),
            )?,
        );
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFTYPE, mode.to_nl80211()).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create iftype attr: {}", e))
            })?,
        );

        self.send_request(
            "create interface",
            NL80211_CMD_NEW_INTERFACE,
            &[NlmF::Request, NlmF::Ack],
            attrs,
        )?;
        self.recv_ack("create interface")?;
        info!(
            "requested {} interface '{}' on phy {}",
            mode, requested_name, wiphy
        );
        Ok(())
    }

    /// Delete a virtual interface. Physical base interfaces cannot be deleted.
    pub fn delete_interface(&mut self, interface: &str) -> Result<()> {
        let ifindex = self.get_ifindex(interface)?;
        let mut attrs = GenlBuffer::new();
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFINDEX, ifindex).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create ifindex attr: {}", e))
            })?,
        );

        self.send_request(
            "delete interface",
            NL80211_CMD_DEL_INTERFACE,
            &[NlmF::Request, NlmF::Ack],
            attrs,
        )?;
        self.recv_ack("delete interface")?;
        info!("deleted interface '{}'", interface);
        Ok(())
    }

    /// Reconfigure an existing interface's operating mode in place.
    ///
    /// Observed to take tens of seconds on some drivers; the recv timeout is
    /// raised accordingly. The interface must be down. Not retried here:
    /// blindly reissuing a slow hardware reconfiguration is the caller's call
    /// to make.
    pub fn set_interface_mode(&mut self, interface: &str, mode: VifMode) -> Result<()> {
        let ifindex = self.get_ifindex(interface)?;
        let mut attrs = GenlBuffer::new();
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFINDEX, ifindex).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create ifindex attr: {}", e))
            })?,
        );
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFTYPE, mode.to_nl80211()).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create iftype attr: {}", e))
            })?,
        );

        debug!("set_interface_mode iface={} mode={} (slow call)", interface, mode);
        self.send_request(
            "set interface mode",
            NL80211_CMD_SET_INTERFACE,
            &[NlmF::Request, NlmF::Ack],
            attrs,
        )?;
        set_recv_timeout(&self.socket, Duration::from_secs(60));
        self.recv_ack("set interface mode")?;
        info!("interface '{}' switched to {} mode", interface, mode);
        Ok(())
    }

    /// Tune an interface's radio to a frequency.
    pub fn set_frequency(
        &mut self,
        interface: &str,
        frequency_mhz: u32,
        width: ChannelWidth,
    ) -> Result<()> {
        let ifindex = self.get_ifindex(interface)?;
        let mut attrs = GenlBuffer::new();
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_IFINDEX, ifindex).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create ifindex attr: {}", e))
            })?,
        );
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_WIPHY_FREQ, frequency_mhz).map_err(|e| {
                NetlinkError::OperationFailed(format!("Failed to create frequency attr: {}", e))
            })?,
        );
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_WIPHY_CHANNEL_TYPE, width.to_nl80211())
                .map_err(|e| {
                    NetlinkError::OperationFailed(format!(
                        "Failed to create channel_type attr: {}",
                        e
                    ))
                })?,
        );

        self.send_request(
            "set frequency",
            NL80211_CMD_SET_WIPHY,
            &[NlmF::Request, NlmF::Ack],
            attrs,
        )?;
        self.recv_ack("set frequency")?;
        debug!("interface '{}' tuned to {} MHz", interface, frequency_mhz);
        Ok(())
    }

    /// Tune an interface to a channel number (2.4 GHz and 5 GHz bands).
    pub fn set_channel(&mut self, interface: &str, channel: u8) -> Result<()> {
        let frequency = channel_to_frequency(channel).ok_or_else(|| {
            NetlinkError::InvalidArgument {
                parameter: "channel".to_string(),
                value: channel.to_string(),
                reason: "not a supported 2.4/5 GHz channel".to_string(),
            }
        })?;
        self.set_frequency(interface, frequency, ChannelWidth::NoHt)
    }
}

fn read_u32(payload: &[u8]) -> Option<u32> {
    if payload.len() >= 4 {
        Some(u32::from_ne_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    } else {
        None
    }
}

fn set_recv_timeout(sock: &NlSocketHandle, timeout: Duration) {
    use std::os::unix::io::AsRawFd;

    let fd = sock.as_raw_fd();
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!(
            "failed to set nl80211 recv timeout: {}",
            io::Error::last_os_error()
        );
    }
}

/// Convert a channel number to its center frequency in MHz.
pub fn channel_to_frequency(channel: u8) -> Option<u32> {
    match channel {
        // 2.4 GHz
        1..=13 => Some(2412 + 5 * (channel as u32 - 1)),
        14 => Some(2484),
        // 5 GHz
        36 | 40 | 44 | 48 | 52 | 56 | 60 | 64 => Some(5000 + 5 * channel as u32),
        100 | 104 | 108 | 112 | 116 | 120 | 124 | 128 | 132 | 136 | 140 | 144 => {
            Some(5000 + 5 * channel as u32)
        }
        149 | 153 | 157 | 161 | 165 => Some(5000 + 5 * channel as u32),
        _ => None,
    }
}

/// Convert a center frequency in MHz back to its channel number.
pub fn frequency_to_channel(frequency_mhz: u32) -> Option<u8> {
    match frequency_mhz {
        2484 => Some(14),
        2412..=2472 if (frequency_mhz - 2412) % 5 == 0 => {
            Some(((frequency_mhz - 2412) / 5 + 1) as u8)
        }
        5180..=5825 if frequency_mhz % 5 == 0 => {
            let channel = (frequency_mhz - 5000) / 5;
            channel_to_frequency(channel as u8).map(|_| channel as u8)
        }
        _ => None,
    }
}
