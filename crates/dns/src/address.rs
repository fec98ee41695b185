use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns `true` for addresses that are routable public unicast destinations.
///
/// Rejects unspecified, loopback, private, link-local, multicast and
/// broadcast addresses. IPv4-mapped IPv6 addresses are judged as IPv4.
pub fn is_public_unicast(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_broadcast())
}

fn is_public_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00;
    let link_local = first & 0xffc0 == 0xfe80;
    !(addr.is_unspecified() || addr.is_loopback() || addr.is_multicast() || unique_local || link_local)
}
