//! TCP health check used before trusting a supervisor's "active".

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

pub trait HealthCheck: Send + Sync {
    /// `true` when something accepts connections on `port` locally.
    fn is_serving(&self, port: u16) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct TcpHealthCheck {
    pub timeout: Duration,
}

impl TcpHealthCheck {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HealthCheck for TcpHealthCheck {
    fn is_serving(&self, port: u16) -> bool {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match TcpStream::connect_timeout(&addr, self.timeout) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(port, error = %e, "health probe refused");
                false
            }
        }
    }
}
