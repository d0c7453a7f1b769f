//! Per-host handshake error tracking.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

/// Running handshake-failure count for one client host.
#[derive(Debug, Default)]
struct HostErrors {
    count: u64,
    blocked: bool,
}

/// Maps client hosts to handshake failure counts and trips a sticky
/// block at the configured threshold.
///
/// Addresses are canonicalized before counting: an IPv4-mapped IPv6
/// address shares its counter with the plain IPv4 form, so v4 and v6
/// clients on the same interface cannot double their budget. A block
/// lasts for the lifetime of the process; unblocking is an operator
/// restart.
#[derive(Debug)]
pub struct ClientBlocklist {
    max_connect_errors: u64,
    hosts: Mutex<HashMap<IpAddr, HostErrors>>,
}

impl ClientBlocklist {
    pub fn new(max_connect_errors: u64) -> Self {
        Self {
            max_connect_errors,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether connections from this host are refused outright.
    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        let hosts = self.hosts.lock().expect("blocklist lock");
        hosts
            .get(&addr.to_canonical())
            .is_some_and(|entry| entry.blocked)
    }

    /// Record one handshake failure for this host.
    ///
    /// Returns `true` exactly when this failure crossed the threshold,
    /// so the caller logs a single blocking line per host.
    pub fn record_handshake_failure(&self, addr: IpAddr) -> bool {
        let mut hosts = self.hosts.lock().expect("blocklist lock");
        let entry = hosts.entry(addr.to_canonical()).or_default();
        entry.count += 1;
        if entry.count >= self.max_connect_errors && !entry.blocked {
            entry.blocked = true;
            return true;
        }
        false
    }

    /// Snapshot of every blocked address, for administrative
    /// inspection.
    pub fn blocked_hosts(&self) -> Vec<IpAddr> {
        let hosts = self.hosts.lock().expect("blocklist lock");
        let mut blocked: Vec<IpAddr> = hosts
            .iter()
            .filter(|(_, entry)| entry.blocked)
            .map(|(addr, _)| *addr)
            .collect();
        blocked.sort();
        blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv6Addr;

    fn v4(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn blocks_at_threshold() {
        let blocklist = ClientBlocklist::new(2);
        let addr = v4(1);

        assert!(!blocklist.is_blocked(addr));
        assert!(!blocklist.record_handshake_failure(addr));
        assert!(!blocklist.is_blocked(addr));

        // Second failure crosses the threshold, reported exactly once.
        assert!(blocklist.record_handshake_failure(addr));
        assert!(blocklist.is_blocked(addr));
        assert!(!blocklist.record_handshake_failure(addr));
    }

    #[test]
    fn block_is_sticky() {
        let blocklist = ClientBlocklist::new(1);
        let addr = v4(2);
        assert!(blocklist.record_handshake_failure(addr));
        for _ in 0..10 {
            assert!(blocklist.is_blocked(addr));
        }
    }

    #[test]
    fn hosts_are_counted_independently() {
        let blocklist = ClientBlocklist::new(2);
        blocklist.record_handshake_failure(v4(1));
        blocklist.record_handshake_failure(v4(2));

        assert!(!blocklist.is_blocked(v4(1)));
        assert!(!blocklist.is_blocked(v4(2)));
    }

    #[test]
    fn mapped_v6_folds_to_v4() {
        let blocklist = ClientBlocklist::new(2);
        let plain = v4(7);
        let mapped = IpAddr::from(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc000, 0x0207));

        blocklist.record_handshake_failure(plain);
        assert!(blocklist.record_handshake_failure(mapped));
        assert!(blocklist.is_blocked(plain));
        assert!(blocklist.is_blocked(mapped));
    }

    #[test]
    fn blocked_hosts_snapshot() {
        let blocklist = ClientBlocklist::new(1);
        blocklist.record_handshake_failure(v4(3));
        blocklist.record_handshake_failure(v4(1));

        // A host under the threshold does not appear.
        let under = ClientBlocklist::new(5);
        under.record_handshake_failure(v4(9));
        assert!(under.blocked_hosts().is_empty());

        assert_eq!(blocklist.blocked_hosts(), vec![v4(1), v4(3)]);
    }
}
