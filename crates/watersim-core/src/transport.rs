//! Boundary to the field-bus transport, plus an in-process register bank.
//!
//! The bridge only needs holding-register reads and writes at 0-based
//! addresses. [`RegisterTransport`] captures that; the Modbus TCP adapter
//! lives in its own crate. [`MemoryTransport`] keeps the registers in
//! process, for dry runs and tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::codec::{CodecError, RegisterCodec};

/// Holding registers exposed by the companion test server.
pub const DEFAULT_BANK_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("cannot connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    /// The connection is gone and cannot be used again.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A single request failed; the connection is still usable.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The request addresses registers the device does not have.
    #[error("registers {address}..{address}+{count} are outside a bank of {size}")]
    OutOfRange {
        address: u16,
        count: usize,
        size: usize,
    },
}

impl TransportError {
    /// Whether the connection can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed { .. } | TransportError::ConnectionLost(_)
        )
    }
}

/// Errors from the float helpers: either side of the transfer can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterIoError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Holding-register access on a field-bus endpoint.
pub trait RegisterTransport {
    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;

    fn connect(&mut self) -> Result<(), TransportError>;

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write `words` starting at `address`. One call is one request.
    fn write_holding_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn endpoint(&self) -> String {
        (**self).endpoint()
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        (**self).read_holding_registers(address, count)
    }

    fn write_holding_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError> {
        (**self).write_holding_registers(address, words)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

// ---------------------------------------------------------------------------
// Float helpers
// ---------------------------------------------------------------------------

/// Read `count` floats starting at `address`.
pub fn read_floats<T>(
    transport: &mut T,
    address: u16,
    count: u16,
    codec: &RegisterCodec,
) -> Result<Vec<f32>, RegisterIoError>
where
    T: RegisterTransport + ?Sized,
{
    let words = transport.read_holding_registers(address, count.saturating_mul(2))?;
    Ok(codec.decode_floats(&words, count as usize)?)
}

/// Write consecutive floats starting at `address` in one request.
pub fn write_floats<T>(
    transport: &mut T,
    address: u16,
    values: &[f32],
    codec: &RegisterCodec,
) -> Result<(), TransportError>
where
    T: RegisterTransport + ?Sized,
{
    transport.write_holding_registers(address, &codec.encode_floats(values))
}

// ---------------------------------------------------------------------------
// In-process register bank
// ---------------------------------------------------------------------------

/// One write request as seen by the bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub address: u16,
    pub count: usize,
}

/// Failure injected into the next transport request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reject the next request; the connection survives.
    Reject,
    /// Drop the connection on the next request.
    Disconnect,
}

#[derive(Debug)]
struct BankState {
    registers: Vec<u16>,
    writes: Vec<WriteRecord>,
    faults: Vec<Fault>,
    connects: usize,
    closes: usize,
}

/// Shared holding-register storage.
///
/// Cloning yields another handle to the same registers, so a test (or a
/// simulated controller) can inspect and write what the bridge sees.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    inner: Arc<Mutex<BankState>>,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new(DEFAULT_BANK_SIZE)
    }
}

impl RegisterBank {
    /// A zeroed bank of `size` registers.
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BankState {
                registers: vec![0; size],
                writes: Vec::new(),
                faults: Vec::new(),
                connects: 0,
                closes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.lock().registers.len()
    }

    /// Copy of `count` registers at `address`, if in range.
    pub fn read(&self, address: u16, count: usize) -> Option<Vec<u16>> {
        let state = self.lock();
        let start = address as usize;
        state.registers.get(start..start + count).map(<[u16]>::to_vec)
    }

    /// Store `words` at `address`, as a field-bus peer would. Not logged.
    pub fn write(&self, address: u16, words: &[u16]) -> bool {
        let mut state = self.lock();
        let start = address as usize;
        match state.registers.get_mut(start..start + words.len()) {
            Some(slot) => {
                slot.copy_from_slice(words);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<u16> {
        self.lock().registers.clone()
    }

    /// Write requests received through a [`MemoryTransport`].
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Queue a failure for an upcoming request. Faults fire in order.
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    fn take_fault(state: &mut BankState) -> Option<Fault> {
        (!state.faults.is_empty()).then(|| state.faults.remove(0))
    }
}

/// Transport backed by a [`RegisterBank`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    bank: RegisterBank,
    connected: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(RegisterBank::default())
    }
}

impl MemoryTransport {
    pub fn new(bank: RegisterBank) -> Self {
        Self {
            bank,
            connected: false,
        }
    }

    /// A transport over a fresh bank of `size` registers.
    pub fn with_size(size: usize) -> Self {
        Self::new(RegisterBank::new(size))
    }

    /// Another handle to the underlying registers.
    pub fn bank(&self) -> RegisterBank {
        self.bank.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn check(
        &mut self,
        state: &mut BankState,
        address: u16,
        count: usize,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionLost("not connected".into()));
        }
        match RegisterBank::take_fault(state) {
            Some(Fault::Reject) => {
                return Err(TransportError::Rejected("injected fault".into()));
            }
            Some(Fault::Disconnect) => {
                self.connected = false;
                return Err(TransportError::ConnectionLost("injected disconnect".into()));
            }
            None => {}
        }
        let size = state.registers.len();
        if address as usize + count > size {
            return Err(TransportError::OutOfRange {
                address,
                count,
                size,
            });
        }
        Ok(())
    }
}

impl RegisterTransport for MemoryTransport {
    fn endpoint(&self) -> String {
        format!("memory bank ({} registers)", self.bank.size())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        self.bank.lock().connects += 1;
        self.connected = true;
        Ok(())
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let bank = self.bank.clone();
        let mut state = bank.lock();
        self.check(&mut state, address, count as usize)?;
        let start = address as usize;
        Ok(state.registers[start..start + count as usize].to_vec())
    }

    fn write_holding_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError> {
        let bank = self.bank.clone();
        let mut state = bank.lock();
        self.check(&mut state, address, words.len())?;
        let start = address as usize;
        state.registers[start..start + words.len()].copy_from_slice(words);
        state.writes.push(WriteRecord {
            address,
            count: words.len(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.bank.lock().closes += 1;
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(size: usize) -> MemoryTransport {
        let mut transport = MemoryTransport::with_size(size);
        transport.connect().unwrap();
        transport
    }

    #[test]
    fn write_then_read_back() {
        let mut transport = connected(8);
        transport.write_holding_registers(2, &[7, 8, 9]).unwrap();
        assert_eq!(transport.read_holding_registers(2, 3).unwrap(), vec![7, 8, 9]);
        assert_eq!(
            transport.bank().write_log(),
            vec![WriteRecord {
                address: 2,
                count: 3
            }]
        );
    }

    #[test]
    fn requests_before_connect_fail() {
        let mut transport = MemoryTransport::with_size(4);
        let err = transport.read_holding_registers(0, 1).unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[test]
    fn out_of_range_is_not_fatal() {
        let mut transport = connected(4);
        let err = transport.write_holding_registers(3, &[1, 2]).unwrap_err();
        assert_eq!(
            err,
            TransportError::OutOfRange {
                address: 3,
                count: 2,
                size: 4
            }
        );
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn injected_faults_fire_in_order() {
        let mut transport = connected(4);
        let bank = transport.bank();
        bank.inject_fault(Fault::Reject);
        bank.inject_fault(Fault::Disconnect);

        let first = transport.write_holding_registers(0, &[1]).unwrap_err();
        assert!(!first.is_connection_lost());
        let second = transport.write_holding_registers(0, &[1]).unwrap_err();
        assert!(second.is_connection_lost());
        assert!(!transport.is_connected());
        assert_eq!(bank.write_count(), 0);
    }

    #[test]
    fn bank_handles_share_registers() {
        let transport = connected(4);
        let peer = transport.bank();
        assert!(peer.write(1, &[42]));
        assert_eq!(transport.bank().read(1, 1), Some(vec![42]));
        assert!(!peer.write(4, &[1]));
        assert_eq!(peer.read(3, 2), None);
    }

    #[test]
    fn float_helpers_use_codec_layout() {
        let mut transport = connected(8);
        let codec = RegisterCodec::default();
        write_floats(&mut transport, 0, &[1.0, -2.5], &codec).unwrap();
        assert_eq!(transport.bank().read(0, 2), Some(vec![0x0000, 0x3F80]));
        assert_eq!(
            read_floats(&mut transport, 0, 2, &codec).unwrap(),
            vec![1.0, -2.5]
        );
    }

    #[test]
    fn boxed_transport_delegates() {
        let mut boxed: Box<dyn RegisterTransport> = Box::new(MemoryTransport::with_size(2));
        boxed.connect().unwrap();
        boxed.write_holding_registers(0, &[5, 6]).unwrap();
        assert_eq!(boxed.read_holding_registers(0, 2).unwrap(), vec![5, 6]);
        assert!(boxed.endpoint().contains("2 registers"));
        boxed.close().unwrap();
    }
}
