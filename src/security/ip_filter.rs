//! Forbidden destination address ranges.
//!
//! Any address an outbound request could connect to is checked here: IP
//! literals in URLs and every A/AAAA record a hostname resolves to.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Why an address is not a valid egress destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenRange {
    Unspecified,
    ThisNetwork,
    Private,
    SharedAddressSpace,
    Loopback,
    LinkLocal,
    IetfProtocolAssignments,
    Benchmarking,
    Multicast,
    Reserved,
    UniqueLocal,
    Documentation,
    SixToFour,
    Teredo,
}

impl ForbiddenRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForbiddenRange::Unspecified => "unspecified",
            ForbiddenRange::ThisNetwork => "this-network",
            ForbiddenRange::Private => "private",
            ForbiddenRange::SharedAddressSpace => "shared-address-space",
            ForbiddenRange::Loopback => "loopback",
            ForbiddenRange::LinkLocal => "link-local",
            ForbiddenRange::IetfProtocolAssignments => "ietf-protocol-assignments",
            ForbiddenRange::Benchmarking => "benchmarking",
            ForbiddenRange::Multicast => "multicast",
            ForbiddenRange::Reserved => "reserved",
            ForbiddenRange::UniqueLocal => "unique-local",
            ForbiddenRange::Documentation => "documentation",
            ForbiddenRange::SixToFour => "6to4",
            ForbiddenRange::Teredo => "teredo",
        }
    }
}

impl fmt::Display for ForbiddenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const V4_RANGES: &[([u8; 4], u32, ForbiddenRange)] = &[
    ([0, 0, 0, 0], 8, ForbiddenRange::ThisNetwork),
    ([10, 0, 0, 0], 8, ForbiddenRange::Private),
    ([100, 64, 0, 0], 10, ForbiddenRange::SharedAddressSpace),
    ([127, 0, 0, 0], 8, ForbiddenRange::Loopback),
    ([169, 254, 0, 0], 16, ForbiddenRange::LinkLocal),
    ([172, 16, 0, 0], 12, ForbiddenRange::Private),
    ([192, 0, 0, 0], 24, ForbiddenRange::IetfProtocolAssignments),
    ([192, 168, 0, 0], 16, ForbiddenRange::Private),
    ([198, 18, 0, 0], 15, ForbiddenRange::Benchmarking),
    ([224, 0, 0, 0], 4, ForbiddenRange::Multicast),
    ([240, 0, 0, 0], 4, ForbiddenRange::Reserved),
];

const V6_RANGES: &[([u16; 8], u32, ForbiddenRange)] = &[
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, ForbiddenRange::UniqueLocal),
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, ForbiddenRange::LinkLocal),
    ([0xff00, 0, 0, 0, 0, 0, 0, 0], 8, ForbiddenRange::Multicast),
    ([0x2001, 0x0db8, 0, 0, 0, 0, 0, 0], 32, ForbiddenRange::Documentation),
    ([0x2002, 0, 0, 0, 0, 0, 0, 0], 16, ForbiddenRange::SixToFour),
    ([0x2001, 0x0000, 0, 0, 0, 0, 0, 0], 32, ForbiddenRange::Teredo),
];

/// Check one address against the forbidden ranges.
pub fn check_ip(ip: IpAddr) -> Result<(), ForbiddenRange> {
    match ip {
        IpAddr::V4(v4) => check_ipv4(v4),
        IpAddr::V6(v6) => check_ipv6(v6),
    }
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), ForbiddenRange> {
    let addr = u32::from(ip);
    for (net, prefix, range) in V4_RANGES {
        let mask = u32::MAX << (32 - prefix);
        if addr & mask == u32::from_be_bytes(*net) & mask {
            return Err(*range);
        }
    }
    Ok(())
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), ForbiddenRange> {
    if ip.is_unspecified() {
        return Err(ForbiddenRange::Unspecified);
    }
    if ip.is_loopback() {
        return Err(ForbiddenRange::Loopback);
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return check_ipv4(v4);
    }

    let addr = u128::from(ip);
    for (net, prefix, range) in V6_RANGES {
        let mask = u128::MAX << (128 - prefix);
        if addr & mask == u128::from(Ipv6Addr::from(*net)) & mask {
            return Err(*range);
        }
    }
    Ok(())
}
