//! Radio classification by hardware OUI.
//!
//! The built-in radio family ships with a fixed manufacturer prefix in its
//! factory MAC, and that prefix survives interface re-creation, so the first
//! three MAC bytes are the one stable signal for telling the on-board chip
//! apart from the USB radio regardless of which kernel name or phy index each
//! came up with.

use crate::registry::RadioInterface;

/// Disjoint partition of one registry snapshot's interfaces.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Interfaces whose MAC carries the built-in chipset OUI.
    pub builtin: Vec<RadioInterface>,
    /// Everything else (external / USB radios).
    pub external: Vec<RadioInterface>,
}

impl Classification {
    /// True when no interface matched the built-in OUI. Callers decide whether
    /// that is fatal; this is a signal, not an error.
    pub fn no_builtin_match(&self) -> bool {
        self.builtin.is_empty()
    }
}

/// Partition interfaces by comparing each MAC's first three bytes against the
/// built-in chipset OUI. Pure and total: every input interface lands in
/// exactly one output set, in input order.
pub fn classify(interfaces: &[RadioInterface], builtin_oui: [u8; 3]) -> Classification {
    let mut result = Classification::default();
    for iface in interfaces {
        if iface.oui() == builtin_oui {
            result.builtin.push(iface.clone());
        } else {
            result.external.push(iface.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiowarden_netlink::VifMode;

    const TI_OUI: [u8; 3] = [0xd0, 0xb5, 0xc2];

    fn iface(name: &str, mac: [u8; 6]) -> RadioInterface {
        RadioInterface {
            phy: 0,
            name: name.to_string(),
            mac,
            mode: Some(VifMode::Station),
            frequency_mhz: None,
        }
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let input = vec![
            iface("wlan0", [0xd0, 0xb5, 0xc2, 0xcb, 0x90, 0xca]),
            iface("wlan1", [0xec, 0xf0, 0x0e, 0x67, 0x79, 0x0a]),
            iface("mon0", [0xec, 0xf0, 0x0e, 0x67, 0x79, 0x0b]),
        ];
        let classes = classify(&input, TI_OUI);
        assert_eq!(classes.builtin.len(), 1);
        assert_eq!(classes.external.len(), 2);
        assert_eq!(classes.builtin.len() + classes.external.len(), input.len());
        assert_eq!(classes.builtin[0].name, "wlan0");
        assert!(classes.external.iter().all(|i| i.oui() != TI_OUI));
    }

    #[test]
    fn deterministic_across_runs() {
        let input = vec![
            iface("wlan0", [0xd0, 0xb5, 0xc2, 1, 2, 3]),
            iface("wlan1", [0x00, 0x11, 0x22, 4, 5, 6]),
        ];
        let first = classify(&input, TI_OUI);
        let second = classify(&input, TI_OUI);
        assert_eq!(first.builtin, second.builtin);
        assert_eq!(first.external, second.external);
    }

    #[test]
    fn missing_builtin_is_a_signal_not_an_error() {
        let input = vec![iface("wlan1", [0xec, 0xf0, 0x0e, 0, 0, 1])];
        let classes = classify(&input, TI_OUI);
        assert!(classes.no_builtin_match());
        assert_eq!(classes.external.len(), 1);
    }

    #[test]
    fn empty_input_yields_empty_sets() {
        let classes = classify(&[], TI_OUI);
        assert!(classes.builtin.is_empty());
        assert!(classes.external.is_empty());
    }
}
