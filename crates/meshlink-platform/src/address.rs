//! IPv4 addressing and default gateways via rtnetlink.
//!
//! Captures the addressing of an interface (including whether it came from
//! DHCP) and re-applies static or dynamic addressing during rollback.

use crate::error::{PlatformError, Result};
use futures::stream::TryStreamExt;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute};
use rtnetlink::{new_connection, Handle};
use std::net::{IpAddr, Ipv4Addr};

/// Kernel marker for an address without an expiry.
const INFINITY_LIFE_TIME: u32 = u32::MAX;

/// IPv4 address assigned to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAddress {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Finite valid lifetime, i.e. leased by a DHCP client.
    pub dynamic: bool,
}

/// Link with its IPv4 addresses and default gateways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub index: u32,
    /// Lowercase colon separated hardware address, empty for links without one.
    pub mac: String,
    pub addresses: Vec<LinkAddress>,
    pub gateways: Vec<Ipv4Addr>,
}

/// Manager for link enumeration, IPv4 addresses and default routes.
///
/// Owns a netlink connection spawned as a background tokio task, so it must
/// be constructed inside a runtime.
pub struct AddressManager {
    handle: Handle,
}

impl AddressManager {
    pub fn new() -> Result<Self> {
        let (connection, handle, _) = new_connection()
            .map_err(|e| PlatformError::netlink("creating netlink connection", e))?;

        tokio::spawn(connection);

        Ok(Self { handle })
    }

    /// Enumerates every link with its IPv4 addressing.
    pub async fn list_links(&self) -> Result<Vec<LinkInfo>> {
        let mut links = self.handle.link().get().execute();
        let mut raw = Vec::new();

        while let Some(link) = links
            .try_next()
            .await
            .map_err(|e| PlatformError::netlink("listing links", e))?
        {
            let mut name = String::new();
            let mut mac = String::new();
            for nla in link.attributes {
                match nla {
                    netlink_packet_route::link::LinkAttribute::IfName(n) => name = n,
                    netlink_packet_route::link::LinkAttribute::Address(bytes) => {
                        mac = format_mac(&bytes);
                    }
                    _ => {}
                }
            }
            raw.push((link.header.index, name, mac));
        }

        let routes = self.default_routes().await?;

        let mut out = Vec::with_capacity(raw.len());
        for (index, name, mac) in raw {
            let addresses = self.link_addresses(index).await?;
            let gateways = routes
                .iter()
                .filter(|(oif, _)| *oif == Some(index))
                .map(|(_, gw)| *gw)
                .collect();
            out.push(LinkInfo {
                name,
                index,
                mac,
                addresses,
                gateways,
            });
        }

        Ok(out)
    }

    async fn index_of(&self, interface: &str) -> Result<u32> {
        if interface.is_empty() {
            return Err(PlatformError::empty_interface());
        }
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(interface.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(link)) => Ok(link.header.index),
            Ok(None) | Err(_) => Err(PlatformError::InterfaceNotFound {
                name: interface.to_string(),
            }),
        }
    }

    async fn ipv4_messages(&self, index: u32) -> Result<Vec<(AddressMessage, Ipv4Addr, bool)>> {
        let mut addrs = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();

        let mut out = Vec::new();
        while let Some(msg) = addrs
            .try_next()
            .await
            .map_err(|e| PlatformError::netlink("listing addresses", e))?
        {
            let mut v4 = None;
            let mut dynamic = false;
            for nla in &msg.attributes {
                match nla {
                    AddressAttribute::Address(IpAddr::V4(ip)) => v4 = Some(*ip),
                    AddressAttribute::CacheInfo(info) => {
                        dynamic = info.ifa_valid != INFINITY_LIFE_TIME;
                    }
                    _ => {}
                }
            }
            if let Some(ip) = v4 {
                out.push((msg, ip, dynamic));
            }
        }
        Ok(out)
    }

    async fn link_addresses(&self, index: u32) -> Result<Vec<LinkAddress>> {
        Ok(self
            .ipv4_messages(index)
            .await?
            .into_iter()
            .map(|(msg, address, dynamic)| LinkAddress {
                address,
                prefix_len: msg.header.prefix_len,
                dynamic,
            })
            .collect())
    }

    /// Replaces every IPv4 address on `interface` with `addresses`.
    pub async fn replace_ipv4_addresses(
        &self,
        interface: &str,
        addresses: &[(Ipv4Addr, u8)],
    ) -> Result<()> {
        for (addr, prefix) in addresses {
            if *prefix > 32 {
                return Err(PlatformError::AddAddress {
                    address: addr.to_string(),
                    prefix: *prefix,
                    interface: interface.to_string(),
                    reason: format!("Invalid IPv4 prefix length: {} (must be 0-32)", prefix),
                });
            }
        }
        let index = self.index_of(interface).await?;

        for (msg, ip, _) in self.ipv4_messages(index).await? {
            self.handle
                .address()
                .del(msg)
                .execute()
                .await
                .map_err(|e| PlatformError::DeleteAddress {
                    address: ip.to_string(),
                    interface: interface.to_string(),
                    reason: e.to_string(),
                })?;
        }

        for (addr, prefix) in addresses {
            self.handle
                .address()
                .add(index, IpAddr::V4(*addr), *prefix)
                .execute()
                .await
                .map_err(|e| PlatformError::AddAddress {
                    address: addr.to_string(),
                    prefix: *prefix,
                    interface: interface.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!(target: "net", iface = %interface, addr = %addr, prefix = prefix, "address_added");
        }

        Ok(())
    }

    /// Drops permanent IPv4 addresses so only DHCP leases remain.
    ///
    /// Returns how many addresses were removed.
    pub async fn remove_permanent_ipv4(&self, interface: &str) -> Result<usize> {
        let index = self.index_of(interface).await?;
        let mut removed = 0;

        for (msg, ip, dynamic) in self.ipv4_messages(index).await? {
            if dynamic {
                continue;
            }
            self.handle
                .address()
                .del(msg)
                .execute()
                .await
                .map_err(|e| PlatformError::DeleteAddress {
                    address: ip.to_string(),
                    interface: interface.to_string(),
                    reason: e.to_string(),
                })?;
            removed += 1;
        }

        tracing::info!(target: "net", iface = %interface, removed, "static_addresses_cleared");
        Ok(removed)
    }

    async fn default_routes(&self) -> Result<Vec<(Option<u32>, Ipv4Addr)>> {
        let mut routes = self.handle.route().get(rtnetlink::IpVersion::V4).execute();
        let mut out = Vec::new();

        while let Some(route) = routes
            .try_next()
            .await
            .map_err(|e| PlatformError::netlink("listing routes", e))?
        {
            if route.header.destination_prefix_length != 0 {
                continue;
            }
            let mut gateway = None;
            let mut oif = None;
            for nla in &route.attributes {
                match nla {
                    RouteAttribute::Gateway(RouteAddress::Inet(gw)) => gateway = Some(*gw),
                    RouteAttribute::Oif(idx) => oif = Some(*idx),
                    _ => {}
                }
            }
            if let Some(gw) = gateway {
                out.push((oif, gw));
            }
        }
        Ok(out)
    }

    /// Replaces the default routes leaving `interface` with one per gateway.
    ///
    /// Gateways are added in order with increasing metric so the first one
    /// stays preferred.
    pub async fn replace_default_gateways(&self, interface: &str, gateways: &[Ipv4Addr]) -> Result<()> {
        let index = self.index_of(interface).await?;

        let mut routes = self.handle.route().get(rtnetlink::IpVersion::V4).execute();
        let mut stale = Vec::new();
        while let Some(route) = routes
            .try_next()
            .await
            .map_err(|e| PlatformError::netlink("listing routes", e))?
        {
            let on_link = route
                .attributes
                .iter()
                .any(|nla| matches!(nla, RouteAttribute::Oif(idx) if *idx == index));
            if route.header.destination_prefix_length == 0 && on_link {
                stale.push(route);
            }
        }
        for route in stale {
            self.handle
                .route()
                .del(route)
                .execute()
                .await
                .map_err(|e| PlatformError::netlink("deleting default route", e))?;
        }

        for (metric, gateway) in gateways.iter().enumerate() {
            let mut req = self
                .handle
                .route()
                .add()
                .v4()
                .gateway(*gateway)
                .output_interface(index);
            req.message_mut()
                .attributes
                .push(RouteAttribute::Priority(100 + metric as u32));
            req.execute().await.map_err(|e| PlatformError::Route {
                gateway: gateway.to_string(),
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;
            tracing::info!(target: "net", iface = %interface, gateway = %gateway, "default_route_added");
        }

        Ok(())
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
