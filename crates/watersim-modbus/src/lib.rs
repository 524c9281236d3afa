//! Modbus TCP transport for the bridge.
//!
//! Wraps the synchronous `tokio-modbus` TCP client in a
//! [`RegisterTransport`]. Holding registers are addressed 0-based, as on the
//! wire. Modbus exception responses and timeouts reject a single request;
//! a broken socket loses the connection.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_modbus::client::sync::{self, Context, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};
use tracing::{debug, info};

use watersim_core::transport::{RegisterTransport, TransportError};

// ===========================================================================
// Configuration
// ===========================================================================

/// Where and how to reach the Modbus server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusTcpConfig {
    pub host: String,
    pub port: u16,
    /// Unit identifier (slave id) sent with every request.
    pub unit_id: u8,
    /// Connect and response timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 502,
            unit_id: 1,
            timeout_ms: 3000,
        }
    }
}

impl ModbusTcpConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{} (unit {})", self.host, self.port, self.unit_id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let failed = |reason: String| TransportError::ConnectFailed {
            endpoint: self.endpoint(),
            reason,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| failed(e.to_string()))?
            .next()
            .ok_or_else(|| failed("host resolved to no address".into()))
    }
}

// ===========================================================================
// Error mapping
// ===========================================================================

/// Classify an I/O failure: only a dead socket loses the connection.
fn map_io_error(err: &io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost(err.to_string()),
        _ => TransportError::Rejected(err.to_string()),
    }
}

fn map_error(err: tokio_modbus::Error) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(io) => map_io_error(&io),
        other => TransportError::Rejected(other.to_string()),
    }
}

fn map_exception(code: ExceptionCode) -> TransportError {
    TransportError::Rejected(format!("modbus exception: {code:?}"))
}

/// Flatten the client's nested result.
fn flatten<T>(result: tokio_modbus::Result<T>) -> Result<T, TransportError> {
    result.map_err(map_error)?.map_err(map_exception)
}

// ===========================================================================
// Transport
// ===========================================================================

/// A Modbus TCP client holding one connection at a time.
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    context: Option<Context>,
}

impl fmt::Debug for ModbusTcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusTcpTransport")
            .field("config", &self.config)
            .field("connected", &self.context.is_some())
            .finish()
    }
}

impl ModbusTcpTransport {
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    fn context(&mut self) -> Result<&mut Context, TransportError> {
        self.context
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost("not connected".into()))
    }

    /// Drop the connection if the error says it is gone.
    fn observe<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(err) = &result {
            if err.is_connection_lost() {
                self.context = None;
            }
        }
        result
    }
}

impl RegisterTransport for ModbusTcpTransport {
    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.config.resolve()?;
        let slave = Slave(self.config.unit_id);
        let timeout = Some(self.config.timeout());
        let context = sync::tcp::connect_slave_with_timeout(addr, slave, timeout)
            .map_err(|e| TransportError::ConnectFailed {
                endpoint: self.config.endpoint(),
                reason: e.to_string(),
            })?;
        info!(endpoint = %self.config.endpoint(), %addr, "modbus connected");
        self.context = Some(context);
        Ok(())
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let result = self
            .context()
            .and_then(|ctx| flatten(ctx.read_holding_registers(address, count)));
        debug!(address, count, ok = result.is_ok(), "read holding registers");
        self.observe(result)
    }

    fn write_holding_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError> {
        let result = self
            .context()
            .and_then(|ctx| flatten(ctx.write_multiple_registers(address, words)));
        debug!(address, count = words.len(), ok = result.is_ok(), "write holding registers");
        self.observe(result)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.context.take().is_some() {
            info!(endpoint = %self.config.endpoint(), "modbus disconnected");
        }
        Ok(())
    }
}
