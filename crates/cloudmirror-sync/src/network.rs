//! Network change detection
//!
//! The [`NetworkWatcher`] snapshots the machine's usable network interfaces on
//! every poll tick and compares the result with the last accepted snapshot.
//! When the set of interfaces or any interface's addresses change, or when no
//! usable network has been seen for longer than the idle threshold, it asks
//! the engine to drop its connections and retry.
//!
//! ## Flow
//!
//! ```text
//! poll tick ──→ InterfaceSource ──→ NetworkSnapshot ──→ compare with baseline
//!                                                            │
//!                            changed or idle ──→ engine.retry_pending_connections(true)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cloudmirror_core::ports::IEngine;

// ============================================================================
// Interface enumeration
// ============================================================================

/// One address of one interface, as reported by the operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub addr: IpAddr,
    /// Interface is administratively up and running
    pub up: bool,
    pub loopback: bool,
}

/// Source of interface addresses
pub trait InterfaceSource: Send {
    fn interfaces(&mut self) -> io::Result<Vec<InterfaceAddress>>;
}

/// Enumerates interfaces with `getifaddrs(3)`
#[derive(Debug, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&mut self) -> io::Result<Vec<InterfaceAddress>> {
        system_interfaces()
    }
}

#[cfg(unix)]
fn system_interfaces() -> io::Result<Vec<InterfaceAddress>> {
    use std::ffi::CStr;
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: `head` is a valid out-pointer; on success the list is released below.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let up_mask = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_uint;
    let loopback_mask = libc::IFF_LOOPBACK as libc::c_uint;

    let mut out = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a non-null node of the list returned by getifaddrs.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_name.is_null() {
            continue;
        }

        // SAFETY: `ifa_addr` is non-null and points at a sockaddr whose family
        // determines the concrete layout read below.
        let addr = unsafe {
            match i32::from((*ifa.ifa_addr).sa_family) {
                libc::AF_INET => {
                    let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                    IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
                }
                libc::AF_INET6 => {
                    let sin6 = &*(ifa.ifa_addr as *const libc::sockaddr_in6);
                    IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr))
                }
                _ => continue,
            }
        };

        // SAFETY: `ifa_name` is a non-null NUL-terminated string owned by the list.
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) }
            .to_string_lossy()
            .into_owned();

        out.push(InterfaceAddress {
            name,
            addr,
            up: ifa.ifa_flags & up_mask == up_mask,
            loopback: ifa.ifa_flags & loopback_mask != 0,
        });
    }

    // SAFETY: `head` came from a successful getifaddrs call and is freed once.
    unsafe { libc::freeifaddrs(head) };
    Ok(out)
}

#[cfg(not(unix))]
fn system_interfaces() -> io::Result<Vec<InterfaceAddress>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface enumeration is only implemented for unix",
    ))
}

/// True for addresses that say nothing about external connectivity
fn is_local_only(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

// ============================================================================
// NetworkSnapshot
// ============================================================================

/// Usable interfaces and their addresses at one point in time
///
/// Interfaces without any non-loopback, non-link-local address are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSnapshot {
    interfaces: BTreeMap<String, BTreeSet<IpAddr>>,
}

impl NetworkSnapshot {
    /// Builds a snapshot from raw interface addresses
    pub fn from_addresses<'a>(addresses: impl IntoIterator<Item = &'a InterfaceAddress>) -> Self {
        let mut interfaces: BTreeMap<String, BTreeSet<IpAddr>> = BTreeMap::new();
        for entry in addresses {
            if !entry.up || entry.loopback || is_local_only(&entry.addr) {
                continue;
            }
            interfaces
                .entry(entry.name.clone())
                .or_default()
                .insert(entry.addr);
        }
        Self { interfaces }
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    pub fn addresses(&self, name: &str) -> Option<&BTreeSet<IpAddr>> {
        self.interfaces.get(name)
    }

    /// Whether `other` differs materially from `self`
    ///
    /// A change is a different interface count, an interface of one snapshot
    /// missing from the other, or a different address set on any interface.
    pub fn changed(&self, other: &NetworkSnapshot) -> bool {
        if self.interfaces.len() != other.interfaces.len() {
            return true;
        }
        self.interfaces
            .iter()
            .any(|(name, addrs)| other.interfaces.get(name) != Some(addrs))
    }
}

// ============================================================================
// NetworkWatcher
// ============================================================================

/// Why a poll forced a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectCause {
    /// The interfaces or their addresses changed
    NetworkChanged,
    /// No usable network seen for longer than the idle threshold
    Idle,
}

/// Result of one poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    /// No usable interface right now; the baseline is kept
    NoNetwork,
    Reconnected(ReconnectCause),
}

/// Polls the network interfaces and triggers engine reconnects
pub struct NetworkWatcher {
    source: Box<dyn InterfaceSource>,
    baseline: NetworkSnapshot,
    last_active: DateTime<Utc>,
    max_idle: Duration,
    pool_refresh_every: u32,
    ticks: u64,
}

impl NetworkWatcher {
    pub fn new(
        source: Box<dyn InterfaceSource>,
        max_idle: Duration,
        pool_refresh_every: u32,
        now: DateTime<Utc>,
    ) -> Self {
        info!(
            max_idle_ms = max_idle.as_millis() as u64,
            pool_refresh_every, "Creating network watcher"
        );
        Self {
            source,
            baseline: NetworkSnapshot::default(),
            last_active: now,
            max_idle,
            pool_refresh_every: pool_refresh_every.max(1),
            ticks: 0,
        }
    }

    /// The last accepted snapshot
    pub fn baseline(&self) -> &NetworkSnapshot {
        &self.baseline
    }

    /// Takes a snapshot, compares it with the baseline and reacts
    pub fn poll(&mut self, now: DateTime<Utc>, engine: &mut dyn IEngine) -> PollOutcome {
        let snapshot = match self.source.interfaces() {
            Ok(addresses) => NetworkSnapshot::from_addresses(&addresses),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate network interfaces");
                NetworkSnapshot::default()
            }
        };
        let outcome = self.observe(snapshot, now, engine);

        if self.ticks % u64::from(self.pool_refresh_every) == 0 {
            debug!(tick = self.ticks, "Refreshing engine connection pool");
            engine.refresh_connection_pool();
        }
        self.ticks += 1;

        outcome
    }

    fn observe(
        &mut self,
        snapshot: NetworkSnapshot,
        now: DateTime<Utc>,
        engine: &mut dyn IEngine,
    ) -> PollOutcome {
        if !snapshot.is_empty() {
            self.last_active = now;
        }

        let changed = if snapshot.is_empty() {
            false
        } else if self.baseline.is_empty() {
            debug!(interfaces = snapshot.len(), "Accepting first network snapshot");
            self.baseline = snapshot.clone();
            false
        } else {
            self.baseline.changed(&snapshot)
        };

        let idle = (now - self.last_active)
            .to_std()
            .map_or(false, |elapsed| elapsed > self.max_idle);

        if changed || idle {
            let cause = if changed {
                ReconnectCause::NetworkChanged
            } else {
                ReconnectCause::Idle
            };
            info!(?cause, interfaces = snapshot.len(), "Reconnecting due to local network changes");
            engine.retry_pending_connections(true);
            if !snapshot.is_empty() {
                self.baseline = snapshot;
            }
            self.last_active = now;
            return PollOutcome::Reconnected(cause);
        }

        if snapshot.is_empty() {
            debug!("No usable network interface");
            PollOutcome::NoNetwork
        } else {
            debug!("Local network adapters haven't changed");
            PollOutcome::Unchanged
        }
    }
}
