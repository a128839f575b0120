use std::net::{Ipv4Addr, TcpListener};

use crate::error::{AgentError, AgentResult};

/// Holds a localhost port for the life of the process so a second agent
/// on the same machine refuses to start.
#[derive(Debug)]
pub struct InstanceGuard {
    listener: TcpListener,
}

impl InstanceGuard {
    pub fn acquire(port: u16) -> AgentResult<Self> {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .map(|listener| Self { listener })
            .map_err(|_| {
                AgentError::config(format!(
                    "Another agent instance is already running (lock port {} is in use)",
                    port
                ))
            })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or_default()
    }
}
