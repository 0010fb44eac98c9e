//! Address plans for newly discovered bridge interfaces
//!
//! `Shared` hands every interface the same address, which only works while a
//! single device is connected. `PerInterface` leases a distinct host address
//! inside a prefix to each interface and returns it to the pool when the
//! interface disappears.

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

/// 2001:db8::/32 documentation prefix used by the stock gateway image
pub const DEFAULT_PREFIX: Ipv6Addr = Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 0);

/// Default prefix length
pub const DEFAULT_PREFIX_LEN: u8 = 64;

/// First host id handed out (`::1` is left for the remote side)
pub const DEFAULT_FIRST_HOST: u64 = 2;

/// How interfaces are addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AddressPlan {
    /// Every interface receives `address/prefix_len`
    Shared { address: Ipv6Addr, prefix_len: u8 },
    /// Each interface leases `prefix + host` for the lowest free host id
    PerInterface {
        prefix: Ipv6Addr,
        prefix_len: u8,
        first_host: u64,
    },
}

impl AddressPlan {
    /// The fixed `2001:db8::2/64` plan
    pub fn shared_default() -> Self {
        AddressPlan::Shared {
            address: Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 2),
            prefix_len: DEFAULT_PREFIX_LEN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AddressPlan::Shared { .. } => "shared",
            AddressPlan::PerInterface { .. } => "per-interface",
        }
    }
}

impl Default for AddressPlan {
    fn default() -> Self {
        AddressPlan::PerInterface {
            prefix: DEFAULT_PREFIX,
            prefix_len: DEFAULT_PREFIX_LEN,
            first_host: DEFAULT_FIRST_HOST,
        }
    }
}

/// Hands out addresses according to an [`AddressPlan`]
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    plan: AddressPlan,
    leases: BTreeMap<String, u128>,
    in_use: BTreeSet<u128>,
}

impl AddressAllocator {
    pub fn new(plan: AddressPlan) -> Self {
        Self {
            plan,
            leases: BTreeMap::new(),
            in_use: BTreeSet::new(),
        }
    }

    pub fn plan(&self) -> &AddressPlan {
        &self.plan
    }

    /// Number of interfaces currently holding a lease
    pub fn leased(&self) -> usize {
        self.leases.len()
    }

    /// Address for `interface`, allocating one if needed.
    ///
    /// Returns `None` when the plan is invalid or the prefix is exhausted.
    pub fn lease(&mut self, interface: &str) -> Option<Ipv6Net> {
        match self.plan {
            AddressPlan::Shared {
                address,
                prefix_len,
            } => Ipv6Net::new(address, prefix_len).ok(),
            AddressPlan::PerInterface {
                prefix,
                prefix_len,
                first_host,
            } => {
                let network = Ipv6Net::new(prefix, prefix_len).ok()?.trunc();
                let base = u128::from(network.network());

                if let Some(&host) = self.leases.get(interface) {
                    return Ipv6Net::new(Ipv6Addr::from(base | host), prefix_len).ok();
                }

                let host_bits = 128 - u32::from(prefix_len);
                let max_host = if host_bits >= 128 {
                    u128::MAX
                } else {
                    (1u128 << host_bits) - 1
                };
                // The all-ones host is avoided as it is commonly reserved
                let mut host = u128::from(first_host.max(1));
                while host < max_host && self.in_use.contains(&host) {
                    host += 1;
                }
                if host >= max_host {
                    return None;
                }

                self.in_use.insert(host);
                self.leases.insert(interface.to_string(), host);
                Ipv6Net::new(Ipv6Addr::from(base | host), prefix_len).ok()
            }
        }
    }

    /// Return `interface`'s address to the pool
    pub fn release(&mut self, interface: &str) {
        if let Some(host) = self.leases.remove(interface) {
            self.in_use.remove(&host);
        }
    }
}
