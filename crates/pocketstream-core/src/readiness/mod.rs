//! Readiness check: has ffmpeg bound the ingest address yet?
//!
//! ffmpeg prints nothing useful when `-listen 1` starts accepting, so the probe looks at the
//! operating system's TCP tables instead. A miss is not treated as failure because socket
//! visibility differs between systems; an unreadable table is.

mod proc_net;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::errors::ProbeError;

pub use proc_net::ProcNetSocketTable;

/// Kernel TCP states as numbered in `include/net/tcp_states.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    Other(u8),
}

impl TcpState {
    /// Listening or connecting/connected. Rows in a teardown state are leftovers.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            TcpState::Established | TcpState::SynSent | TcpState::SynRecv | TcpState::Listen
        )
    }
}

impl From<u8> for TcpState {
    fn from(value: u8) -> Self {
        match value {
            0x01 => TcpState::Established,
            0x02 => TcpState::SynSent,
            0x03 => TcpState::SynRecv,
            0x04 => TcpState::FinWait1,
            0x05 => TcpState::FinWait2,
            0x06 => TcpState::TimeWait,
            0x07 => TcpState::Close,
            0x08 => TcpState::CloseWait,
            0x09 => TcpState::LastAck,
            0x0A => TcpState::Listen,
            0x0B => TcpState::Closing,
            other => TcpState::Other(other),
        }
    }
}

/// One row of a TCP socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
}

impl SocketEntry {
    /// True when the socket is open and either end renders as `target`.
    pub fn matches(&self, target: &str) -> bool {
        self.state.is_open()
            && (socket_label(&self.local) == target || socket_label(&self.remote) == target)
    }
}

/// Renders `ip:port` without IPv6 brackets, e.g. `::1:9000`.
pub fn socket_label(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Source of TCP socket tables, one call per address family.
///
/// Reads may block; [`ReadinessProbe`] calls them on the blocking thread pool.
pub trait SocketTable: Send + Sync {
    fn tcp4(&self) -> Result<Vec<SocketEntry>, ProbeError>;
    fn tcp6(&self) -> Result<Vec<SocketEntry>, ProbeError>;
}

/// Per-family lookup strings for an ingest address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargets {
    pub v4: String,
    pub v6: String,
}

impl ProbeTargets {
    pub fn for_address(address: &str) -> Self {
        Self {
            v4: address.replacen("localhost", "127.0.0.1", 1),
            v6: address.replacen("localhost", "::1", 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Confirmed { attempt: u32, elapsed: Duration },
    NotConfirmed { attempts: u32, elapsed: Duration },
}

impl ProbeOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ProbeOutcome::Confirmed { .. })
    }
}

pub struct ReadinessProbe {
    table: Arc<dyn SocketTable>,
    policy: ProbePolicy,
}

impl ReadinessProbe {
    pub fn new(table: Arc<dyn SocketTable>, policy: ProbePolicy) -> Self {
        Self { table, policy }
    }

    /// Poll until `address` shows up in either table or the attempts run out.
    /// Only a table read failure is an error.
    pub async fn wait_until_bound(&self, address: &str) -> Result<ProbeOutcome, ProbeError> {
        let targets = ProbeTargets::for_address(address);
        let start = Instant::now();
        for attempt in 1..=self.policy.attempts {
            let (v4, v6) = self.read_tables().await?;
            let v4_hit = v4.iter().any(|s| s.matches(&targets.v4));
            let v6_hit = v6.iter().any(|s| s.matches(&targets.v6));
            if v4_hit || v6_hit {
                let elapsed = start.elapsed();
                info!(
                    event = "readiness.confirmed",
                    domain = "readiness",
                    address = %address,
                    attempt = attempt,
                    elapsed_ms = elapsed.as_millis() as u64
                );
                return Ok(ProbeOutcome::Confirmed { attempt, elapsed });
            }
            debug!(
                event = "readiness.not_bound_yet",
                domain = "readiness",
                address = %address,
                attempt = attempt
            );
            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }
        let elapsed = start.elapsed();
        error!(
            event = "readiness.unconfirmed",
            domain = "readiness",
            address = %address,
            attempts = self.policy.attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "failed to determine whether address is claimed"
        );
        Ok(ProbeOutcome::NotConfirmed {
            attempts: self.policy.attempts,
            elapsed,
        })
    }

    async fn read_tables(&self) -> Result<(Vec<SocketEntry>, Vec<SocketEntry>), ProbeError> {
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || -> Result<_, ProbeError> {
            Ok((table.tcp4()?, table.tcp6()?))
        })
        .await
        .map_err(|err| ProbeError::Interrupted(err.to_string()))?
    }
}
