use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Where a ZeroMQ socket binds or connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Endpoint {
    /// TCP, the normal choice for a distributed worker fleet.
    Tcp { host: String, port: u16 },

    /// Unix-domain IPC for same-host workers (mostly used by tests).
    Ipc(String),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    /// Parse a `host:port` address as declared in a worker registration.
    pub fn from_addr(addr: &str) -> Result<Self, WireError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| WireError::BadAddress(addr.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| WireError::BadAddress(addr.to_string()))?;
        if host.is_empty() {
            return Err(WireError::BadAddress(addr.to_string()));
        }
        Ok(Self::tcp(host, port))
    }

    /// The ZeroMQ endpoint string.
    pub fn url(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
            Self::Ipc(name) => format!("ipc:///tmp/petri/{name}.sock"),
        }
    }

    /// IPC sockets need their parent directory to exist before bind.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let url = self.url();
            let path = url.strip_prefix("ipc://").unwrap_or(&url);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left by a previous run, which would
    /// otherwise fail the bind with `EADDRINUSE`.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let url = self.url();
            let path = url.strip_prefix("ipc://").unwrap_or(&url);
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path, "removed stale IPC socket"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}
