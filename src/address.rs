//! Advertised-address resolution for services and checks

use crate::error::{SyncError, SyncResult};
use crate::types::{AddressMode, DriverNetwork, NetworkResource};

/// Resolve the (ip, port) a service or check should advertise.
///
/// A port of 0 with an empty or single-network host address is the
/// backward-compatible signal that the catalog picks the address itself.
pub fn resolve_address(
    mode: AddressMode,
    port_label: &str,
    networks: &[NetworkResource],
    driver_network: Option<&DriverNetwork>,
) -> SyncResult<(String, u16)> {
    match mode {
        AddressMode::Auto => {
            let advertise = driver_network.map(|d| d.auto_advertise).unwrap_or(false);
            let mode = if advertise {
                AddressMode::Driver
            } else {
                AddressMode::Host
            };
            resolve_address(mode, port_label, networks, driver_network)
        }

        AddressMode::Host => {
            if port_label.is_empty() {
                if networks.len() != 1 {
                    return Ok((String::new(), 0));
                }
                return Ok((networks[0].ip.clone(), 0));
            }

            for network in networks {
                if let Some(port) = network.port(port_label) {
                    return Ok((network.ip.clone(), port.value));
                }
            }
            Err(SyncError::PortLabelNotFound {
                label: port_label.to_string(),
            })
        }

        AddressMode::Driver => {
            let driver = driver_network.ok_or(SyncError::MissingDriverNetwork)?;

            if port_label.is_empty() {
                return Ok((driver.ip.clone(), 0));
            }

            if let Some(port) = driver.port_map.get(port_label) {
                return Ok((driver.ip.clone(), *port));
            }

            // Not a label; accept a literal positive port number. The parse
            // error is not propagated because the label was likely never
            // intended to be numeric.
            let port: u16 = port_label.parse().map_err(|_| SyncError::InvalidPortLabel {
                label: port_label.to_string(),
                reason: "driver ports must be numeric or in the driver's port map".to_string(),
            })?;
            if port == 0 {
                return Err(SyncError::InvalidPortLabel {
                    label: port_label.to_string(),
                    reason: "port must be > 0".to_string(),
                });
            }
            Ok((driver.ip.clone(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortMapping;
    use std::collections::HashMap;

    fn networks() -> Vec<NetworkResource> {
        vec![NetworkResource {
            ip: "192.168.0.10".to_string(),
            ports: vec![PortMapping {
                label: "http".to_string(),
                value: 8080,
                to: 80,
            }],
        }]
    }

    fn driver() -> DriverNetwork {
        DriverNetwork {
            ip: "172.17.0.2".to_string(),
            auto_advertise: true,
            port_map: HashMap::from([("http".to_string(), 80)]),
        }
    }

    #[test]
    fn host_mode_resolves_port_label() {
        let (ip, port) =
            resolve_address(AddressMode::Host, "http", &networks(), None).unwrap();
        assert_eq!(ip, "192.168.0.10");
        assert_eq!(port, 8080);
    }

    #[test]
    fn host_mode_unknown_label_fails() {
        let err = resolve_address(AddressMode::Host, "db", &networks(), None).unwrap_err();
        assert!(matches!(err, SyncError::PortLabelNotFound { label } if label == "db"));
    }

    #[test]
    fn host_mode_empty_label_single_network() {
        let (ip, port) = resolve_address(AddressMode::Host, "", &networks(), None).unwrap();
        assert_eq!(ip, "192.168.0.10");
        assert_eq!(port, 0);
    }

    #[test]
    fn host_mode_empty_label_no_networks_is_catalog_pick() {
        let (ip, port) = resolve_address(AddressMode::Host, "", &[], None).unwrap();
        assert_eq!(ip, "");
        assert_eq!(port, 0);
    }

    #[test]
    fn auto_mode_prefers_driver_when_advertising() {
        let driver = driver();
        let (ip, port) =
            resolve_address(AddressMode::Auto, "http", &networks(), Some(&driver)).unwrap();
        assert_eq!(ip, "172.17.0.2");
        assert_eq!(port, 80);
    }

    #[test]
    fn auto_mode_falls_back_to_host() {
        let mut driver = driver();
        driver.auto_advertise = false;
        let (ip, port) =
            resolve_address(AddressMode::Auto, "http", &networks(), Some(&driver)).unwrap();
        assert_eq!(ip, "192.168.0.10");
        assert_eq!(port, 8080);
    }

    #[test]
    fn driver_mode_requires_driver_network() {
        let err = resolve_address(AddressMode::Driver, "http", &networks(), None).unwrap_err();
        assert!(matches!(err, SyncError::MissingDriverNetwork));
    }

    #[test]
    fn driver_mode_port_map_beats_numeric_parse() {
        let mut driver = driver();
        // A label that also parses as a number; the map entry must win.
        driver.port_map.insert("9000".to_string(), 80);
        let (_, port) =
            resolve_address(AddressMode::Driver, "9000", &networks(), Some(&driver)).unwrap();
        assert_eq!(port, 80);
    }

    #[test]
    fn driver_mode_parses_literal_port() {
        let (ip, port) =
            resolve_address(AddressMode::Driver, "9000", &networks(), Some(&driver())).unwrap();
        assert_eq!(ip, "172.17.0.2");
        assert_eq!(port, 9000);
    }

    #[test]
    fn driver_mode_rejects_bad_label() {
        let err = resolve_address(AddressMode::Driver, "db", &networks(), Some(&driver()))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPortLabel { label, .. } if label == "db"));
    }

    #[test]
    fn driver_mode_rejects_zero_port() {
        let err = resolve_address(AddressMode::Driver, "0", &networks(), Some(&driver()))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPortLabel { .. }));
    }

    #[test]
    fn driver_mode_empty_label_returns_driver_ip() {
        let (ip, port) =
            resolve_address(AddressMode::Driver, "", &networks(), Some(&driver())).unwrap();
        assert_eq!(ip, "172.17.0.2");
        assert_eq!(port, 0);
    }
}
