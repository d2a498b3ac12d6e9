//! Wireless interface lifecycle coordinator.
//!
//! Brings the device's two radios into the required topology at boot: the
//! built-in chip hosts the access point, the external USB radio hosts the
//! passive-capture monitor interface plus a station VIF for outbound alert
//! traffic. The radios enumerate under unpredictable names and phy indices,
//! create VIFs asynchronously (some names are assigned by the driver, not the
//! caller), and the built-in chip's firmware wedges unrecoverably when
//! operations run in the wrong order, so the whole sequence is a small state
//! machine over refresh/classify/create/poll steps rather than a straight-line
//! script.
//!
//! One coordinator instance is constructed at the process's composition point
//! and passed to every consumer; there is no global. Callers serialize
//! `init` / `create_interfaces` themselves; the coordinator has no internal
//! locking.

use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;

use radiowarden_netlink::{NetlinkError, VifMode};

use crate::backend::{CommandChannel, IfController};
use crate::classify::classify;
use crate::registry::{InterfaceRegistry, RegistrySnapshot};
use crate::retry::{poll_until, PollConfig};

/// Logical interface roles published by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hostapd's interface on the built-in radio.
    AccessPoint,
    /// Passive-capture interface on the external radio.
    Monitor,
    /// Station VIF used by the supplicant for outbound alert mail.
    Uplink,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessPoint => "access-point",
            Self::Monitor => "monitor",
            Self::Uplink => "uplink",
        }
    }
}

/// Coordinator lifecycle states. `Failed` is terminal for the attempt; the
/// two "reboot required" conditions are never auto-repaired because radio
/// re-enumeration mid-process cannot be reconciled safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    InterfacesReady,
    Failed,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("wireless registry unavailable: {source}")]
    RegistryUnavailable {
        #[source]
        source: NetlinkError,
    },

    #[error("found {found} physical radios, expected exactly {expected}")]
    UnexpectedRadioCount { found: usize, expected: usize },

    #[error("no interface carries the built-in radio OUI; reboot required")]
    NoBuiltInRadioDetected,

    #[error(
        "expected one VIF per radio, found {builtin} built-in and {external} external; reboot required"
    )]
    VifCountMismatch { builtin: usize, external: usize },

    #[error("no interface on an external radio, nothing to host the uplink VIF")]
    NoExternalRadio,

    #[error("interface creation request rejected: {source}")]
    CreateRequestFailed {
        #[source]
        source: NetlinkError,
    },

    #[error(
        "created interface did not appear after {attempts} registry refreshes \
         (driver likely rejected the request silently)"
    )]
    InterfaceDidNotAppear { attempts: u32 },

    #[error("failed to switch '{name}' to {mode} mode: {source}")]
    ModeChange {
        name: String,
        mode: VifMode,
        #[source]
        source: NetlinkError,
    },

    #[error("failed to bring '{name}' up: {source}")]
    ActivationFailed {
        name: String,
        #[source]
        source: NetlinkError,
    },

    #[error("interface '{name}' vanished before publication")]
    InterfaceVanished { name: String },

    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// Coordinator tuning. Defaults match the shipped hardware: a TI wl12xx
/// built-in chip (OUI d0:b5:c2) plus one external USB radio.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// OUI identifying the built-in radio family.
    pub builtin_oui: [u8; 3],
    /// Expected number of distinct physical radios.
    pub expected_radios: usize,
    /// Requested name for the uplink VIF. Advisory only; the driver may
    /// assign a different one.
    pub uplink_name: String,
    /// Budget for the appearance-polling loop after VIF creation.
    pub poll: PollConfig,
    /// Randomize the uplink VIF's MAC (keeping the radio's OUI). The chip
    /// family ships identical factory MACs across units.
    pub randomize_uplink_mac: bool,
    /// Delete VIFs that hold no role once the role interfaces are up.
    pub delete_leftover_vifs: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            builtin_oui: [0xd0, 0xb5, 0xc2],
            expected_radios: 2,
            uplink_name: "sta0".to_string(),
            poll: PollConfig::default(),
            randomize_uplink_mac: true,
            delete_leftover_vifs: true,
        }
    }
}

/// The published role → interface-name mapping. Immutable once published;
/// replaced wholesale on the next successful reconciliation.
#[derive(Debug, Clone)]
pub struct RoleMap {
    registry_version: u64,
    access_point: String,
    monitor: String,
    uplink: Option<String>,
}

impl RoleMap {
    /// Version of the registry snapshot this mapping was resolved against.
    pub fn registry_version(&self) -> u64 {
        self.registry_version
    }

    pub fn name(&self, role: Role) -> Option<&str> {
        match role {
            Role::AccessPoint => Some(&self.access_point),
            Role::Monitor => Some(&self.monitor),
            Role::Uplink => self.uplink.as_deref(),
        }
    }
}

/// Outcome of a successful `init`, carrying non-fatal diagnostics.
#[derive(Debug)]
pub struct InitReport {
    pub warnings: Vec<String>,
    pub registry_version: u64,
}

/// Outcome of a successful `create_interfaces`.
#[derive(Debug)]
pub struct CreateReport {
    pub warnings: Vec<String>,
    /// Driver-assigned name of the created uplink VIF.
    pub uplink: String,
}

/// The lifecycle coordinator. See the module docs for the overall contract.
pub struct Coordinator {
    channel: Box<dyn CommandChannel>,
    ifctl: Box<dyn IfController>,
    config: CoordinatorConfig,
    sleep: Box<dyn FnMut(Duration)>,
    registry: InterfaceRegistry,
    state: LifecycleState,
    failure: Option<String>,
    roles: Option<RoleMap>,
}

impl Coordinator {
    pub fn new(
        channel: Box<dyn CommandChannel>,
        ifctl: Box<dyn IfController>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_sleeper(channel, ifctl, config, Box::new(std::thread::sleep))
    }

    /// Construct with an injected sleeper so polling can be tested without
    /// real delays.
    pub fn with_sleeper(
        channel: Box<dyn CommandChannel>,
        ifctl: Box<dyn IfController>,
        config: CoordinatorConfig,
        sleep: Box<dyn FnMut(Duration)>,
    ) -> Self {
        Self {
            channel,
            ifctl,
            config,
            sleep,
            registry: InterfaceRegistry::new(),
            state: LifecycleState::Uninitialized,
            failure: None,
            roles: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Reason for the last transition into `Failed`, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn role_map(&self) -> Option<&RoleMap> {
        self.roles.as_ref()
    }

    /// Current interface name for a role, if resolved.
    pub fn resolved_name(&self, role: Role) -> Option<&str> {
        self.roles.as_ref().and_then(|map| map.name(role))
    }

    fn fail(&mut self, err: LifecycleError) -> LifecycleError {
        warn!("lifecycle failure: {}", err);
        self.state = LifecycleState::Failed;
        self.failure = Some(err.to_string());
        err
    }

    fn refresh_or_fail(&mut self) -> Result<RegistrySnapshot, LifecycleError> {
        match self.registry.refresh(self.channel.as_mut()) {
            Ok(snapshot) => Ok(snapshot),
            Err(source) => Err(self.fail(LifecycleError::RegistryUnavailable { source })),
        }
    }

    /// Enumerate the radios, apply safety hygiene, classify, and record the
    /// access-point and monitor role candidates.
    ///
    /// `strict` enforces the expected radio count and the one-VIF-per-radio
    /// topology; lenient mode downgrades both checks to warnings and picks
    /// the first entry of an oversized classification set. Lenient mode is a
    /// diagnostic escape hatch, nothing stronger.
    pub fn init(&mut self, strict: bool) -> Result<InitReport, LifecycleError> {
        let mut warnings = Vec::new();
        self.roles = None;

        let snapshot = self.refresh_or_fail()?;

        let phys = snapshot.distinct_phys();
        if phys.len() != self.config.expected_radios {
            if strict {
                return Err(self.fail(LifecycleError::UnexpectedRadioCount {
                    found: phys.len(),
                    expected: self.config.expected_radios,
                }));
            }
            let msg = format!(
                "found {} physical radios, expected {}; continuing in lenient mode",
                phys.len(),
                self.config.expected_radios
            );
            warn!("{}", msg);
            warnings.push(msg);
        }

        // Hygiene sweep: force everything down and disable power save so we
        // never inherit a half-configured interface from a previous run.
        // Best effort; one stuck legacy interface must not block the rest.
        for iface in snapshot.interfaces() {
            if let Err(e) = self.ifctl.bring_down(&iface.name) {
                let msg = format!("could not bring {} down: {}", iface.name, e);
                warn!("{}", msg);
                warnings.push(msg);
            }
            if let Err(e) = self.ifctl.set_power_save_off(&iface.name) {
                let msg = format!("could not disable power save on {}: {}", iface.name, e);
                warn!("{}", msg);
                warnings.push(msg);
            }
        }

        let classes = classify(snapshot.interfaces(), self.config.builtin_oui);
        if classes.no_builtin_match() {
            // Without the built-in radio the device cannot serve as an AP.
            return Err(self.fail(LifecycleError::NoBuiltInRadioDetected));
        }
        if classes.external.is_empty() {
            return Err(self.fail(LifecycleError::VifCountMismatch {
                builtin: classes.builtin.len(),
                external: 0,
            }));
        }
        if classes.builtin.len() != 1 || classes.external.len() != 1 {
            if strict {
                // Disambiguating multiple VIFs on one radio has no safe
                // default; require a reboot instead of guessing.
                return Err(self.fail(LifecycleError::VifCountMismatch {
                    builtin: classes.builtin.len(),
                    external: classes.external.len(),
                }));
            }
            let msg = format!(
                "expected one VIF per radio, found {} built-in and {} external; keeping the first of each",
                classes.builtin.len(),
                classes.external.len()
            );
            warn!("{}", msg);
            warnings.push(msg);
        }

        let access_point = classes.builtin[0].name.clone();
        let monitor = classes.external[0].name.clone();
        info!(
            "lifecycle init complete: ap candidate '{}' ({}), monitor candidate '{}' ({})",
            access_point,
            classes.builtin[0].mac_string(),
            monitor,
            classes.external[0].mac_string()
        );

        self.roles = Some(RoleMap {
            registry_version: snapshot.version(),
            access_point,
            monitor,
            uplink: None,
        });
        self.state = LifecycleState::Initialized;
        self.failure = None;
        Ok(InitReport {
            warnings,
            registry_version: snapshot.version(),
        })
    }

    /// Create the uplink VIF on the external radio, discover the name the
    /// driver actually assigned, switch the monitor candidate into monitor
    /// mode and publish the final role mapping.
    ///
    /// Only valid from `Initialized`. Any fatal step moves the coordinator to
    /// `Failed` with the reason retained; the caller restarts the whole
    /// sequence, there is no partial retry.
    pub fn create_interfaces(&mut self) -> Result<CreateReport, LifecycleError> {
        if self.state != LifecycleState::Initialized {
            return Err(LifecycleError::InvalidState {
                operation: "create_interfaces",
                state: self.state,
            });
        }
        let Some(roles) = self.roles.clone() else {
            return Err(LifecycleError::InvalidState {
                operation: "create_interfaces",
                state: self.state,
            });
        };
        let mut warnings = Vec::new();

        // Re-read the registry rather than trusting names recorded at init
        // time; the kernel may have shifted underneath us.
        let before = self.refresh_or_fail()?;
        let Some(external) = before
            .interfaces()
            .iter()
            .find(|i| i.oui() != self.config.builtin_oui)
        else {
            return Err(self.fail(LifecycleError::NoExternalRadio));
        };
        let external_phy = external.phy;
        let external_oui = external.oui();

        // Snapshot the "before" name set. The creation call's requested name
        // is advisory only; the diff against this set is how we learn what
        // the driver really called the new VIF.
        let before_names = before.names();

        if let Err(source) = self.channel.create_interface(
            external_phy,
            &self.config.uplink_name,
            VifMode::Station,
        ) {
            return Err(self.fail(LifecycleError::CreateRequestFailed { source }));
        }

        // Creation is asynchronous at the driver layer with no confirmation
        // of name assignment; poll the registry until the interface count
        // grows or the budget runs out.
        let poll = self.config.poll.clone();
        let before_count = before_names.len();
        let registry = &mut self.registry;
        let channel = self.channel.as_mut();
        let sleep = self.sleep.as_mut();
        let polled = poll_until(&poll, |d| sleep(d), |attempt| {
            let snapshot = registry.refresh(channel)?;
            if snapshot.interfaces().len() > before_count {
                Ok(Some(snapshot))
            } else {
                debug!(
                    "appearance poll attempt {}/{}: still {} interfaces",
                    attempt, poll.max_attempts, before_count
                );
                Ok(None)
            }
        });
        let after = match polled {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return Err(self.fail(LifecycleError::InterfaceDidNotAppear {
                    attempts: poll.max_attempts,
                }))
            }
            Err(source) => return Err(self.fail(LifecycleError::RegistryUnavailable { source })),
        };

        let new_names: Vec<String> = after
            .names()
            .into_iter()
            .filter(|name| !before_names.contains(name))
            .collect();
        let Some(uplink) = new_names.last().cloned() else {
            return Err(self.fail(LifecycleError::InterfaceDidNotAppear {
                attempts: poll.max_attempts,
            }));
        };
        if new_names.len() > 1 {
            // More than one new name in a single poll cycle is an anomaly;
            // keeping the last is arbitrary, so say so.
            let msg = format!(
                "multiple new interfaces appeared ({}), keeping '{}'",
                new_names.join(", "),
                uplink
            );
            warn!("{}", msg);
            warnings.push(msg);
        }
        info!(
            "uplink VIF appeared as '{}' (requested '{}')",
            uplink, self.config.uplink_name
        );

        let uplink_mac = self
            .config
            .randomize_uplink_mac
            .then(|| randomized_mac(external_oui));
        self.activate(&uplink, uplink_mac, None, &mut warnings)?;

        // The monitor candidate was brought down during init's sweep; the
        // mode transition requires it down and is fatal on failure since the
        // capture pipeline cannot run without it.
        self.activate(&roles.monitor, None, Some(VifMode::Monitor), &mut warnings)?;

        if self.config.delete_leftover_vifs {
            self.delete_leftovers(&after, &roles.access_point, &roles.monitor, &uplink, &mut warnings);
        }

        // Publish against a fresh snapshot so the mapping never refers to a
        // name the kernel no longer knows.
        let published = self.refresh_or_fail()?;
        for name in [&roles.access_point, &roles.monitor, &uplink] {
            if !published.contains_name(name) {
                return Err(self.fail(LifecycleError::InterfaceVanished { name: name.clone() }));
            }
        }

        info!(
            "interfaces ready: ap='{}' monitor='{}' uplink='{}'",
            roles.access_point, roles.monitor, uplink
        );
        self.roles = Some(RoleMap {
            registry_version: published.version(),
            access_point: roles.access_point,
            monitor: roles.monitor,
            uplink: Some(uplink.clone()),
        });
        self.state = LifecycleState::InterfacesReady;
        Ok(CreateReport { warnings, uplink })
    }

    /// Activate one interface: disable power save, optionally assign a MAC,
    /// optionally switch operating mode, then bring it up.
    ///
    /// Power save must be off before the interface is brought up or switched
    /// to an active mode; activating with power save enabled wedges the radio
    /// firmware in a state only a multi-minute power cycle clears. Every
    /// activation path funnels through here so the ordering holds even when a
    /// caller restarts the sequence.
    fn activate(
        &mut self,
        name: &str,
        mac: Option<[u8; 6]>,
        mode: Option<VifMode>,
        warnings: &mut Vec<String>,
    ) -> Result<(), LifecycleError> {
        if let Err(e) = self.ifctl.set_power_save_off(name) {
            let msg = format!("could not disable power save on {}: {}", name, e);
            warn!("{}", msg);
            warnings.push(msg);
        }
        if let Some(mac) = mac {
            if let Err(e) = self
                .ifctl
                .set_mac_address(name, mac, mode == Some(VifMode::Monitor))
            {
                let msg = format!("could not set MAC on {}: {}", name, e);
                warn!("{}", msg);
                warnings.push(msg);
            }
        }
        if let Some(mode) = mode {
            if let Err(source) = self.channel.set_interface_mode(name, mode) {
                return Err(self.fail(LifecycleError::ModeChange {
                    name: name.to_string(),
                    mode,
                    source,
                }));
            }
        }
        if let Err(source) = self.ifctl.bring_up(name) {
            return Err(self.fail(LifecycleError::ActivationFailed {
                name: name.to_string(),
                source,
            }));
        }
        Ok(())
    }

    /// Remove VIFs that hold no role. Best effort: a leftover that refuses to
    /// go away is a warning, never a lifecycle failure.
    fn delete_leftovers(
        &mut self,
        snapshot: &RegistrySnapshot,
        access_point: &str,
        monitor: &str,
        uplink: &str,
        warnings: &mut Vec<String>,
    ) {
        let ap_phy = snapshot
            .interfaces()
            .iter()
            .find(|i| i.name == access_point)
            .map(|i| i.phy);
        let monitor_phy = snapshot
            .interfaces()
            .iter()
            .find(|i| i.name == monitor)
            .map(|i| i.phy);
        for iface in snapshot.interfaces() {
            if iface.name == access_point || iface.name == monitor || iface.name == uplink {
                continue;
            }
            if Some(iface.phy) != ap_phy && Some(iface.phy) != monitor_phy {
                continue;
            }
            if let Err(e) = self.ifctl.bring_down(&iface.name) {
                warn!("could not bring leftover {} down: {}", iface.name, e);
            }
            if let Err(e) = self.channel.delete_interface(&iface.name) {
                let msg = format!("could not delete leftover VIF {}: {}", iface.name, e);
                warn!("{}", msg);
                warnings.push(msg);
            } else {
                info!("deleted leftover VIF {}", iface.name);
            }
        }
    }
}

fn randomized_mac(oui: [u8; 3]) -> [u8; 6] {
    let mut rng = rand::thread_rng();
    [oui[0], oui[1], oui[2], rng.gen(), rng.gen(), rng.gen()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RadioInterface;
    use radiowarden_netlink::{ChannelWidth, Result as NlResult};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeState {
        /// Scripted enumeration results; the last entry repeats once the
        /// script is exhausted.
        enumerations: Vec<Vec<RadioInterface>>,
        cursor: usize,
        enumerate_calls: u32,
        /// Ordered log of every channel and ioctl operation.
        ops: Vec<String>,
        fail_create: bool,
        fail_mode_change: bool,
    }

    struct FakeChannel(Rc<RefCell<FakeState>>);

    impl CommandChannel for FakeChannel {
        fn enumerate(&mut self) -> NlResult<Vec<RadioInterface>> {
            let mut s = self.0.borrow_mut();
            s.enumerate_calls += 1;
            let idx = s.cursor.min(s.enumerations.len() - 1);
            let result = s.enumerations[idx].clone();
            if s.cursor + 1 < s.enumerations.len() {
                s.cursor += 1;
            }
            Ok(result)
        }

        fn create_interface(&mut self, phy: u32, name: &str, mode: VifMode) -> NlResult<()> {
            let mut s = self.0.borrow_mut();
            s.ops.push(format!("create phy{} {} {}", phy, name, mode));
            if s.fail_create {
                return Err(radiowarden_netlink::NetlinkError::OperationFailed(
                    "create rejected".to_string(),
                ));
            }
            Ok(())
        }

        fn delete_interface(&mut self, name: &str) -> NlResult<()> {
            self.0.borrow_mut().ops.push(format!("delete {}", name));
            Ok(())
        }

        fn set_interface_mode(&mut self, name: &str, mode: VifMode) -> NlResult<()> {
            let mut s = self.0.borrow_mut();
            s.ops.push(format!("set_mode {} {}", name, mode));
            if s.fail_mode_change {
                return Err(radiowarden_netlink::NetlinkError::OperationFailed(
                    "mode change rejected".to_string(),
                ));
            }
            Ok(())
        }

        fn set_frequency(&mut self, name: &str, mhz: u32, _width: ChannelWidth) -> NlResult<()> {
            self.0
                .borrow_mut()
                .ops
                .push(format!("set_freq {} {}", name, mhz));
            Ok(())
        }
    }

    struct FakeIfctl(Rc<RefCell<FakeState>>);

    impl IfController for FakeIfctl {
        fn bring_up(&mut self, name: &str) -> NlResult<()> {
            self.0.borrow_mut().ops.push(format!("up {}", name));
            Ok(())
        }

        fn bring_down(&mut self, name: &str) -> NlResult<()> {
            self.0.borrow_mut().ops.push(format!("down {}", name));
            Ok(())
        }

        fn set_mac_address(&mut self, name: &str, _mac: [u8; 6], _monitor: bool) -> NlResult<()> {
            self.0.borrow_mut().ops.push(format!("mac {}", name));
            Ok(())
        }

        fn set_power_save_off(&mut self, name: &str) -> NlResult<()> {
            self.0.borrow_mut().ops.push(format!("ps_off {}", name));
            Ok(())
        }
    }

    fn builtin(name: &str, phy: u32) -> RadioInterface {
        RadioInterface {
            phy,
            name: name.to_string(),
            mac: [0xd0, 0xb5, 0xc2, 0xcb, 0x90, 0xca],
            mode: Some(VifMode::Station),
            frequency_mhz: None,
        }
    }

    fn usb(name: &str, phy: u32) -> RadioInterface {
        RadioInterface {
            phy,
            name: name.to_string(),
            mac: [0xec, 0xf0, 0x0e, 0x67, 0x79, phy as u8],
            mode: Some(VifMode::Station),
            frequency_mhz: None,
        }
    }

    fn coordinator(
        enumerations: Vec<Vec<RadioInterface>>,
        config: CoordinatorConfig,
    ) -> (Coordinator, Rc<RefCell<FakeState>>) {
        let state = Rc::new(RefCell::new(FakeState {
            enumerations,
            ..FakeState::default()
        }));
        let coord = Coordinator::with_sleeper(
            Box::new(FakeChannel(state.clone())),
            Box::new(FakeIfctl(state.clone())),
            config,
            Box::new(|_| {}),
        );
        (coord, state)
    }

    fn base_pair() -> Vec<RadioInterface> {
        vec![builtin("wlan0", 0), usb("wlan1", 1)]
    }

    fn op_index(state: &Rc<RefCell<FakeState>>, op: &str) -> usize {
        let s = state.borrow();
        s.ops
            .iter()
            .position(|o| o == op)
            .unwrap_or_else(|| panic!("op '{}' not found in {:?}", op, s.ops))
    }

    fn last_op_index(state: &Rc<RefCell<FakeState>>, op: &str) -> usize {
        let s = state.borrow();
        s.ops
            .iter()
            .rposition(|o| o == op)
            .unwrap_or_else(|| panic!("op '{}' not found in {:?}", op, s.ops))
    }

    #[test]
    fn init_publishes_ap_and_monitor_candidates() {
        let (mut coord, state) = coordinator(vec![base_pair()], CoordinatorConfig::default());
        let report = coord.init(true).unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(coord.state(), LifecycleState::Initialized);
        assert_eq!(coord.resolved_name(Role::AccessPoint), Some("wlan0"));
        assert_eq!(coord.resolved_name(Role::Monitor), Some("wlan1"));
        assert_eq!(coord.resolved_name(Role::Uplink), None);

        // Hygiene sweep touched every interface.
        let s = state.borrow();
        for op in ["down wlan0", "ps_off wlan0", "down wlan1", "ps_off wlan1"] {
            assert!(s.ops.iter().any(|o| o == op), "missing {}", op);
        }
    }

    #[test]
    fn init_strict_rejects_unexpected_radio_count() {
        let snapshot = vec![builtin("wlan0", 0), usb("wlan1", 1), usb("wlan2", 2)];
        let (mut coord, _) = coordinator(vec![snapshot], CoordinatorConfig::default());
        let err = coord.init(true).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::UnexpectedRadioCount {
                found: 3,
                expected: 2
            }
        ));
        assert_eq!(coord.state(), LifecycleState::Failed);
        assert!(coord.failure_reason().unwrap().contains("3 physical radios"));
    }

    #[test]
    fn init_lenient_tolerates_unexpected_radio_count() {
        let snapshot = vec![builtin("wlan0", 0), usb("wlan1", 1), usb("wlan2", 2)];
        let (mut coord, _) = coordinator(vec![snapshot], CoordinatorConfig::default());
        let report = coord.init(false).unwrap();
        assert_eq!(coord.state(), LifecycleState::Initialized);
        assert!(!report.warnings.is_empty());
        assert_eq!(coord.resolved_name(Role::AccessPoint), Some("wlan0"));
        // Oversized external set: the first in enumeration order wins.
        assert_eq!(coord.resolved_name(Role::Monitor), Some("wlan1"));
    }

    #[test]
    fn init_without_builtin_oui_is_fatal_regardless_of_strictness() {
        for strict in [true, false] {
            let snapshot = vec![usb("wlan0", 0), usb("wlan1", 1)];
            let (mut coord, _) = coordinator(vec![snapshot], CoordinatorConfig::default());
            let err = coord.init(strict).unwrap_err();
            assert!(matches!(err, LifecycleError::NoBuiltInRadioDetected));
            assert_eq!(coord.state(), LifecycleState::Failed);
        }
    }

    #[test]
    fn init_strict_rejects_multiple_vifs_on_one_radio() {
        let snapshot = vec![builtin("wlan0", 0), builtin("ap0", 0), usb("wlan1", 1)];
        let (mut coord, _) = coordinator(vec![snapshot], CoordinatorConfig::default());
        let err = coord.init(true).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::VifCountMismatch {
                builtin: 2,
                external: 1
            }
        ));
    }

    #[test]
    fn init_twice_yields_the_same_mapping() {
        let (mut coord, _) = coordinator(
            vec![base_pair(), base_pair()],
            CoordinatorConfig::default(),
        );
        let first = coord.init(true).unwrap();
        let ap_first = coord.resolved_name(Role::AccessPoint).map(str::to_string);
        let second = coord.init(true).unwrap();
        assert_eq!(
            ap_first.as_deref(),
            coord.resolved_name(Role::AccessPoint)
        );
        assert_eq!(coord.resolved_name(Role::Monitor), Some("wlan1"));
        // Every refresh has a fresh version even when nothing changed.
        assert!(second.registry_version > first.registry_version);
    }

    #[test]
    fn create_interfaces_requires_initialized_state() {
        let (mut coord, _) = coordinator(vec![base_pair()], CoordinatorConfig::default());
        let err = coord.create_interfaces().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState {
                operation: "create_interfaces",
                state: LifecycleState::Uninitialized
            }
        ));
        // A precondition violation is the caller's bug, not a lifecycle failure.
        assert_eq!(coord.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn create_interfaces_records_driver_assigned_name() {
        let base = base_pair();
        let mut grown = base.clone();
        // Driver ignored the requested "sta0" and picked its own name.
        grown.push(usb("rw-sta1", 1));
        let (mut coord, state) = coordinator(
            vec![
                base.clone(), // init
                base.clone(), // "before" snapshot
                base.clone(), // poll 1
                base.clone(), // poll 2
                base,         // poll 3
                grown,        // poll 4 and everything after
            ],
            CoordinatorConfig::default(),
        );
        coord.init(true).unwrap();
        let report = coord.create_interfaces().unwrap();
        assert_eq!(report.uplink, "rw-sta1");
        assert_eq!(coord.state(), LifecycleState::InterfacesReady);
        assert_eq!(coord.resolved_name(Role::Uplink), Some("rw-sta1"));
        assert_eq!(coord.resolved_name(Role::AccessPoint), Some("wlan0"));
        assert_eq!(coord.resolved_name(Role::Monitor), Some("wlan1"));

        // The advisory name went out against the external phy.
        let s = state.borrow();
        assert!(s.ops.iter().any(|o| o == "create phy1 sta0 managed"));
        drop(s);

        // Published mapping matches the final snapshot's version.
        assert_eq!(
            coord.role_map().unwrap().registry_version(),
            state.borrow().enumerate_calls as u64
        );
    }

    #[test]
    fn create_interfaces_times_out_after_exact_attempt_budget() {
        let config = CoordinatorConfig {
            poll: PollConfig {
                max_attempts: 4,
                interval: Duration::from_millis(100),
            },
            ..CoordinatorConfig::default()
        };
        let (mut coord, state) = coordinator(vec![base_pair()], config);
        coord.init(true).unwrap();
        let calls_before = state.borrow().enumerate_calls;
        let err = coord.create_interfaces().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InterfaceDidNotAppear { attempts: 4 }
        ));
        assert_eq!(coord.state(), LifecycleState::Failed);
        // One "before" refresh plus exactly four poll refreshes.
        assert_eq!(state.borrow().enumerate_calls - calls_before, 5);
    }

    #[test]
    fn power_save_is_disabled_before_every_activation() {
        let base = base_pair();
        let mut grown = base.clone();
        grown.push(usb("sta0", 1));
        let (mut coord, state) = coordinator(
            vec![base.clone(), base, grown],
            CoordinatorConfig::default(),
        );
        coord.init(true).unwrap();
        coord.create_interfaces().unwrap();

        // Uplink: power save off strictly before MAC assignment and bring-up.
        let ps_uplink = op_index(&state, "ps_off sta0");
        assert!(ps_uplink < op_index(&state, "mac sta0"));
        assert!(ps_uplink < op_index(&state, "up sta0"));

        // Monitor: the activation-path power-save call precedes the mode
        // transition, which precedes bring-up.
        let ps_monitor = last_op_index(&state, "ps_off wlan1");
        let mode_monitor = op_index(&state, "set_mode wlan1 monitor");
        assert!(ps_monitor < mode_monitor);
        assert!(mode_monitor < op_index(&state, "up wlan1"));
    }

    #[test]
    fn mode_change_failure_is_fatal() {
        let base = base_pair();
        let mut grown = base.clone();
        grown.push(usb("sta0", 1));
        let (mut coord, state) = coordinator(
            vec![base.clone(), base, grown],
            CoordinatorConfig::default(),
        );
        state.borrow_mut().fail_mode_change = true;
        coord.init(true).unwrap();
        let err = coord.create_interfaces().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ModeChange { ref name, mode: VifMode::Monitor, .. } if name == "wlan1"
        ));
        assert_eq!(coord.state(), LifecycleState::Failed);
        assert!(coord.failure_reason().is_some());
    }

    #[test]
    fn create_request_rejection_is_fatal() {
        let (mut coord, state) = coordinator(vec![base_pair()], CoordinatorConfig::default());
        state.borrow_mut().fail_create = true;
        coord.init(true).unwrap();
        let err = coord.create_interfaces().unwrap_err();
        assert!(matches!(err, LifecycleError::CreateRequestFailed { .. }));
        assert_eq!(coord.state(), LifecycleState::Failed);
    }

    #[test]
    fn multiple_new_names_keep_last_and_warn() {
        let base = base_pair();
        let mut grown = base.clone();
        grown.push(usb("sta0", 1));
        grown.push(usb("p2p-dev-wlan1", 1));
        let (mut coord, _) = coordinator(
            vec![base.clone(), base, grown],
            CoordinatorConfig::default(),
        );
        coord.init(true).unwrap();
        let report = coord.create_interfaces().unwrap();
        assert_eq!(report.uplink, "p2p-dev-wlan1");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("multiple new interfaces")));
    }

    #[test]
    fn leftover_vifs_are_deleted_after_roles_are_up() {
        // Lenient topology: a stale extra VIF sits on the external radio.
        let base = vec![builtin("wlan0", 0), usb("wlan1", 1), usb("stale0", 1)];
        let mut grown = base.clone();
        grown.push(usb("sta0", 1));
        let (mut coord, state) = coordinator(
            vec![base.clone(), base, grown],
            CoordinatorConfig::default(),
        );
        coord.init(false).unwrap();
        coord.create_interfaces().unwrap();
        let s = state.borrow();
        assert!(s.ops.iter().any(|o| o == "delete stale0"));
        assert!(!s.ops.iter().any(|o| o == "delete wlan1"));
        assert!(!s.ops.iter().any(|o| o == "delete sta0"));
        assert!(!s.ops.iter().any(|o| o == "delete wlan0"));
    }

    #[test]
    fn no_external_radio_is_fatal_in_create() {
        // The USB radio disappears between init and create; the re-read
        // before creation is what catches it.
        let snapshot = vec![builtin("wlan0", 0), usb("wlan1", 1)];
        let after_unplug = vec![builtin("wlan0", 0), builtin("ap0", 0)];
        let (mut coord, _) = coordinator(
            vec![snapshot, after_unplug],
            CoordinatorConfig::default(),
        );
        coord.init(true).unwrap();
        let err = coord.create_interfaces().unwrap_err();
        assert!(matches!(err, LifecycleError::NoExternalRadio));
        assert_eq!(coord.state(), LifecycleState::Failed);
    }
}
