//! Expand address ranges into /24-equivalent candidate blocks without walking every address.

use edgepick_core::CandidateBlock;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;

const BLOCK_SIZE: u32 = 256;

/// Parse `a.b.c.d/n` (host bits allowed) or a bare IPv4 address (taken as /32).
pub fn parse_range(cidr: &str) -> Option<Ipv4Net> {
    let s = cidr.trim();
    if s.contains('/') {
        s.parse::<Ipv4Net>().ok().map(|n| n.trunc())
    } else {
        s.parse::<Ipv4Addr>().ok().and_then(|ip| Ipv4Net::new(ip, 32).ok())
    }
}

/// Expand a range into its deduplicated blocks, each tagged with the range's own mask.
/// Malformed or IPv6 input yields an empty set.
pub fn expand(cidr: &str) -> BTreeSet<CandidateBlock> {
    let Some(net) = parse_range(cidr) else {
        debug!(range = cidr, "skipping unparseable range");
        return BTreeSet::new();
    };
    let mask = net.prefix_len();
    let first = u32::from(net.network()) & !(BLOCK_SIZE - 1);
    let last = u32::from(net.broadcast()) & !(BLOCK_SIZE - 1);
    let mut blocks = BTreeSet::new();
    let mut cur = first;
    loop {
        blocks.insert(CandidateBlock::containing(Ipv4Addr::from(cur), mask));
        match cur.checked_add(BLOCK_SIZE) {
            Some(next) if next <= last => cur = next,
            _ => break,
        }
    }
    blocks
}

/// Union of [`expand`] over many ranges.
pub fn expand_all<I, S>(ranges: I) -> BTreeSet<CandidateBlock>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut all = BTreeSet::new();
    for r in ranges {
        all.extend(expand(r.as_ref()));
    }
    all
}

/// The 254 usable hosts of a block (last octet 1..=254), whatever its stored mask.
pub fn expand_block_to_hosts(block: &CandidateBlock) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = block.address.octets();
    (1..=254u8).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}

/// Host probed on behalf of a whole block: `.0` becomes `.1`, anything else is kept.
pub fn representative_host(block: &CandidateBlock) -> Ipv4Addr {
    let [a, b, c, d] = block.address.octets();
    if d == 0 { Ipv4Addr::new(a, b, c, 1) } else { block.address }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blk(s: &str, mask: u8) -> CandidateBlock {
        CandidateBlock { address: s.parse().unwrap(), mask }
    }

    #[test]
    fn slash30_is_one_block() {
        let v = expand("104.16.5.8/30");
        assert_eq!(v.len(), 1);
        assert_eq!(v.into_iter().next(), Some(blk("104.16.5.0", 30)));
    }

    #[test]
    fn slash22_keeps_original_mask() {
        let v: Vec<_> = expand("172.64.4.0/22").into_iter().collect();
        assert_eq!(v, vec![blk("172.64.4.0", 22), blk("172.64.5.0", 22), blk("172.64.6.0", 22), blk("172.64.7.0", 22)]);
    }

    #[test]
    fn host_bits_are_truncated() {
        let v = expand("10.1.2.3/23");
        assert_eq!(v.len(), 2);
        assert!(v.contains(&blk("10.1.2.0", 23)));
        assert!(v.contains(&blk("10.1.3.0", 23)));
    }

    #[test]
    fn short_prefix_steps_by_block() {
        let v = expand("10.0.0.0/8");
        assert_eq!(v.len(), 65536);
        assert_eq!(v.iter().next(), Some(&blk("10.0.0.0", 8)));
        assert_eq!(v.iter().last(), Some(&blk("10.255.255.0", 8)));
    }

    #[test]
    fn top_of_address_space_does_not_overflow() {
        assert_eq!(expand("255.255.254.0/23").len(), 2);
    }

    #[test]
    fn bare_address_is_slash32() {
        let v: Vec<_> = expand("1.2.3.4").into_iter().collect();
        assert_eq!(v, vec![blk("1.2.3.0", 32)]);
    }

    #[test]
    fn malformed_and_ipv6_are_empty() {
        assert!(expand("not-a-range").is_empty());
        assert!(expand("1.2.3.0/33").is_empty());
        assert!(expand("2606:4700::/32").is_empty());
        assert!(expand("").is_empty());
    }

    #[test]
    fn expand_all_dedupes_by_address_and_mask() {
        let v = expand_all(["1.1.1.0/24", "1.1.1.128/25", "1.1.1.7/24"]);
        assert_eq!(v.len(), 2);
        assert!(v.contains(&blk("1.1.1.0", 24)));
        assert!(v.contains(&blk("1.1.1.0", 25)));
    }

    #[test]
    fn block_hosts_are_1_to_254() {
        let hosts = expand_block_to_hosts(&blk("8.8.4.0", 22));
        assert_eq!(hosts.len(), 254);
        let uniq: BTreeSet<_> = hosts.iter().collect();
        assert_eq!(uniq.len(), 254);
        assert!(hosts.iter().all(|h| h.octets()[..3] == [8, 8, 4]));
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(8, 8, 4, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(8, 8, 4, 254)));
    }

    #[test]
    fn representative_replaces_zero_octet_only() {
        assert_eq!(representative_host(&blk("9.9.9.0", 24)), Ipv4Addr::new(9, 9, 9, 1));
        assert_eq!(representative_host(&blk("9.9.9.7", 32)), Ipv4Addr::new(9, 9, 9, 7));
    }
}
