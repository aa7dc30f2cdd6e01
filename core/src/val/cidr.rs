use std::{
    fmt,
    net::IpAddr,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

/// Network address plus prefix length, e.g. `192.168.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCidr")]
pub struct Cidr {
    address: IpAddr,
    prefix: u8,
}

#[derive(Deserialize)]
struct RawCidr {
    address: IpAddr,
    prefix: u8,
}

impl TryFrom<RawCidr> for Cidr {
    type Error = anyhow::Error;

    fn try_from(raw: RawCidr) -> Result<Self> {
        Cidr::new(raw.address, raw.prefix)
    }
}

impl Cidr {
    pub fn new(address: IpAddr, prefix: u8) -> Result<Self> {
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        ensure!(prefix <= max, "prefix /{prefix} out of range for {address}");
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// IPv4 networks never contain IPv6 addresses and vice versa.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.address, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                (u32::from(net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                (u128::from(net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| anyhow!("missing '/' in CIDR notation: {s:?}"))?;
        let address: IpAddr = addr.parse().with_context(|| format!("invalid address in {s:?}"))?;
        let prefix: u8 = prefix.parse().with_context(|| format!("invalid prefix in {s:?}"))?;
        Cidr::new(address, prefix)
    }
}
