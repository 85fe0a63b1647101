//! ports::prober
//!
//! Determines whether a TCP port is currently bound on the host.
//!
//! # Strategy
//!
//! [`SystemProber`] first tries to bind the port itself on `0.0.0.0` and
//! `127.0.0.1`. `AddrInUse` means taken, a successful bind means free.
//! When the bind fails for any other reason (privileged ports, sandboxing)
//! it falls back to the host socket table:
//!
//! - Linux: `ss -Htln`, then `lsof`
//! - macOS / BSD: `lsof -nP -iTCP:<port> -sTCP:LISTEN`
//! - Windows: `netstat -ano -p tcp`
//!
//! If no tool can be run the probe fails with
//! [`SpinError::ProbeUnavailable`]. Callers must treat that as "unknown",
//! never as "free".

use std::io::ErrorKind as IoErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use tracing::{debug, trace};

use crate::core::errors::SpinError;
use crate::core::process::{self, ProcessError};

/// Answers whether a host TCP port is bound.
pub trait PortProber {
    /// `Ok(true)` if bound, `Ok(false)` if free.
    ///
    /// # Errors
    ///
    /// [`SpinError::ProbeUnavailable`] when the host cannot be queried.
    fn is_in_use(&self, port: u16) -> Result<bool, SpinError>;
}

/// Prober backed by the host network stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProber;

impl SystemProber {
    /// Create a system prober.
    pub fn new() -> Self {
        Self
    }

    fn try_bind(port: u16) -> Result<bool, std::io::Error> {
        for ip in [Ipv4Addr::UNSPECIFIED, Ipv4Addr::LOCALHOST] {
            match TcpListener::bind(SocketAddrV4::new(ip, port)) {
                Ok(listener) => drop(listener),
                Err(e) if e.kind() == IoErrorKind::AddrInUse => return Ok(true),
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    fn query_socket_table(port: u16) -> Result<bool, SpinError> {
        let unavailable = |reason: String| SpinError::ProbeUnavailable { port, reason };

        if cfg!(windows) {
            let out = process::run("netstat", &["-ano", "-p", "tcp"], None)
                .map_err(|e| unavailable(e.to_string()))?;
            if !out.success() {
                return Err(unavailable(format!("netstat failed: {}", out.combined())));
            }
            return Ok(netstat_lists_listener(&out.stdout, port));
        }

        let mut reasons = Vec::new();

        if cfg!(target_os = "linux") {
            match process::run("ss", &["-Htln"], None) {
                Ok(out) if out.success() => return Ok(ss_lists_listener(&out.stdout, port)),
                Ok(out) => reasons.push(format!("ss failed: {}", out.combined())),
                Err(e) => reasons.push(e.to_string()),
            }
        }

        let filter = format!("-iTCP:{}", port);
        match process::run("lsof", &["-nP", &filter, "-sTCP:LISTEN"], None) {
            // lsof exits 1 with no output when nothing matches.
            Ok(out) if out.success() => Ok(!out.stdout.trim().is_empty()),
            Ok(out) if out.code == Some(1) && out.stdout.trim().is_empty() => Ok(false),
            Ok(out) => {
                reasons.push(format!("lsof failed: {}", out.combined()));
                Err(unavailable(reasons.join("; ")))
            }
            Err(ProcessError::NotFound(tool)) => {
                reasons.push(format!("'{}' not found", tool));
                Err(unavailable(reasons.join("; ")))
            }
            Err(e) => {
                reasons.push(e.to_string());
                Err(unavailable(reasons.join("; ")))
            }
        }
    }
}

impl PortProber for SystemProber {
    fn is_in_use(&self, port: u16) -> Result<bool, SpinError> {
        match Self::try_bind(port) {
            Ok(in_use) => {
                trace!(port, in_use, "probed by bind");
                Ok(in_use)
            }
            Err(e) => {
                debug!(port, error = %e, "bind probe inconclusive; querying socket table");
                Self::query_socket_table(port)
            }
        }
    }
}

/// Whether an address column like `0.0.0.0:8080`, `[::]:8080` or `*:8080`
/// names `port`.
fn address_has_port(address: &str, port: u16) -> bool {
    address
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse::<u16>().ok())
        == Some(port)
}

/// Scan `ss -Htln` output. Columns: State Recv-Q Send-Q Local Peer.
fn ss_lists_listener(output: &str, port: u16) -> bool {
    output.lines().any(|line| {
        line.split_whitespace()
            .nth(3)
            .is_some_and(|local| address_has_port(local, port))
    })
}

/// Scan `netstat -ano -p tcp` output. Columns: Proto Local Foreign State PID.
fn netstat_lists_listener(output: &str, port: u16) -> bool {
    output.lines().any(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        cols.len() >= 4
            && cols[0].eq_ignore_ascii_case("tcp")
            && cols[3].eq_ignore_ascii_case("listening")
            && address_has_port(cols[1], port)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_port_parsing() {
        assert!(address_has_port("0.0.0.0:8080", 8080));
        assert!(address_has_port("[::]:8080", 8080));
        assert!(address_has_port("*:8080", 8080));
        assert!(!address_has_port("127.0.0.1:18080", 8080));
        assert!(!address_has_port("garbage", 8080));
    }

    #[test]
    fn ss_output_detects_listener() {
        let output = "\
LISTEN 0      4096         0.0.0.0:3306      0.0.0.0:*
LISTEN 0      511        127.0.0.1:8080      0.0.0.0:*
LISTEN 0      4096            [::]:22           [::]:*
";
        assert!(ss_lists_listener(output, 8080));
        assert!(ss_lists_listener(output, 22));
        assert!(!ss_lists_listener(output, 8081));
        assert!(!ss_lists_listener("", 8080));
    }

    #[test]
    fn netstat_output_detects_listener() {
        let output = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1012
  TCP    0.0.0.0:8080           0.0.0.0:0              LISTENING       4242
  TCP    10.0.0.5:50123         10.0.0.9:8081          ESTABLISHED     77
";
        assert!(netstat_lists_listener(output, 8080));
        assert!(!netstat_lists_listener(output, 8081));
    }

    #[test]
    fn bound_listener_is_reported_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(SystemProber::new().is_in_use(port).unwrap());
    }

    #[test]
    fn released_port_is_reported_free() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!SystemProber::new().is_in_use(port).unwrap());
    }
}
