use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use super::{SocketEntry, SocketTable, TcpState};
use crate::errors::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

/// Linux socket tables read from `/proc/net/tcp` and `/proc/net/tcp6`.
#[derive(Debug, Clone)]
pub struct ProcNetSocketTable {
    root: PathBuf,
}

impl Default for ProcNetSocketTable {
    fn default() -> Self {
        Self::new("/proc/net")
    }
}

impl ProcNetSocketTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, file: &str, family: Family) -> Result<Vec<SocketEntry>, ProbeError> {
        let path = self.root.join(file);
        let contents = std::fs::read_to_string(&path).map_err(|source| ProbeError::Read {
            path: path.clone(),
            source,
        })?;
        parse_table(&contents, &path, family)
    }
}

impl SocketTable for ProcNetSocketTable {
    fn tcp4(&self) -> Result<Vec<SocketEntry>, ProbeError> {
        self.read("tcp", Family::V4)
    }

    fn tcp6(&self) -> Result<Vec<SocketEntry>, ProbeError> {
        self.read("tcp6", Family::V6)
    }
}

fn parse_table(
    contents: &str,
    path: &Path,
    family: Family,
) -> Result<Vec<SocketEntry>, ProbeError> {
    let malformed = |line: usize, reason: String| ProbeError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let mut entries = Vec::new();
    // First line is the column header.
    for (idx, line) in contents.lines().enumerate().skip(1) {
        let line_no = idx + 1;
        let mut fields = line.split_whitespace();
        if fields.next().is_none() {
            continue;
        }
        let (Some(local), Some(remote), Some(state)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(line_no, "missing address or state column".into()));
        };
        let local = parse_socket(local, family).map_err(|r| malformed(line_no, r))?;
        let remote = parse_socket(remote, family).map_err(|r| malformed(line_no, r))?;
        let state = u8::from_str_radix(state, 16)
            .map_err(|e| malformed(line_no, format!("bad state {state:?}: {e}")))?;
        entries.push(SocketEntry {
            local,
            remote,
            state: TcpState::from(state),
        });
    }
    Ok(entries)
}

/// Decodes `0100007F:2328`. The kernel prints each 32-bit address word in host byte order.
fn parse_socket(field: &str, family: Family) -> Result<SocketAddr, String> {
    let (ip_hex, port_hex) = field
        .split_once(':')
        .ok_or_else(|| format!("bad address {field:?}"))?;
    let port =
        u16::from_str_radix(port_hex, 16).map_err(|e| format!("bad port {port_hex:?}: {e}"))?;
    let ip = match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(parse_word(ip_hex)?)),
        Family::V6 => {
            if ip_hex.len() != 32 {
                return Err(format!("bad IPv6 address {ip_hex:?}"));
            }
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                chunk.copy_from_slice(&parse_word(&ip_hex[i * 8..i * 8 + 8])?);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };
    Ok(SocketAddr::new(ip, port))
}

fn parse_word(hex: &str) -> Result<[u8; 4], String> {
    if hex.len() != 8 {
        return Err(format!("bad address word {hex:?}"));
    }
    u32::from_str_radix(hex, 16)
        .map(u32::to_ne_bytes)
        .map_err(|e| format!("bad address word {hex:?}: {e}"))
}
