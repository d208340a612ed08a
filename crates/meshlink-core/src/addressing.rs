//! IPv4 helpers for the static mesh addressing.

use std::net::Ipv4Addr;

use crate::error::{MeshError, Result};

/// Network address announced by the routing daemon: each octet of `ip`
/// ANDed with the matching octet of `mask`.
pub fn network_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    let ip = ip.octets();
    let mask = mask.octets();
    Ipv4Addr::new(ip[0] & mask[0], ip[1] & mask[1], ip[2] & mask[2], ip[3] & mask[3])
}

/// Dotted-quad form of [`network_address`].
pub fn mask_ip(ip: &str, mask: &str) -> Result<String> {
    let ip: Ipv4Addr = ip.parse().map_err(|_| MeshError::InvalidProfile {
        name: ip.to_string(),
        reason: "not an IPv4 address".to_string(),
    })?;
    let mask: Ipv4Addr = mask.parse().map_err(|_| MeshError::InvalidProfile {
        name: mask.to_string(),
        reason: "not an IPv4 netmask".to_string(),
    })?;
    Ok(network_address(ip, mask).to_string())
}

/// Prefix length of a contiguous netmask.
pub fn prefix_len(mask: Ipv4Addr) -> Result<u8> {
    ipnet::ipv4_mask_to_prefix(mask).map_err(|_| MeshError::InvalidProfile {
        name: mask.to_string(),
        reason: "netmask is not contiguous".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ip_ands_each_octet() {
        assert_eq!(mask_ip("10.1.2.3", "255.255.0.0").unwrap(), "10.1.0.0");
        assert_eq!(mask_ip("5.6.7.8", "255.0.0.0").unwrap(), "5.0.0.0");
        assert_eq!(mask_ip("192.168.7.200", "255.255.255.192").unwrap(), "192.168.7.192");
    }

    #[test]
    fn test_network_address_matches_bitwise_and_for_all_octets() {
        for a in (0u8..=255).step_by(17) {
            for m in [0u8, 128, 192, 240, 255] {
                let got = network_address(Ipv4Addr::new(a, a, a, a), Ipv4Addr::new(m, m, m, m));
                assert_eq!(got, Ipv4Addr::new(a & m, a & m, a & m, a & m));
            }
        }
    }

    #[test]
    fn test_mask_ip_rejects_garbage() {
        assert!(mask_ip("10.1.2", "255.0.0.0").is_err());
        assert!(mask_ip("10.1.2.3", "mask").is_err());
    }

    #[test]
    fn test_prefix_len_requires_contiguous_mask() {
        assert_eq!(prefix_len(Ipv4Addr::new(255, 255, 255, 0)).unwrap(), 24);
        assert_eq!(prefix_len(Ipv4Addr::new(255, 0, 0, 0)).unwrap(), 8);
        assert!(prefix_len(Ipv4Addr::new(255, 0, 255, 0)).is_err());
    }
}
