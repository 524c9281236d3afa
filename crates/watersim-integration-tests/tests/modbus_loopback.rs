//! The Modbus TCP transport against an in-process tokio-modbus server
//! holding a single register bank.

use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};
use tokio_modbus::{ExceptionCode, Request, Response};
use watersim_core::bridge::{Bridge, ExitReason};
use watersim_core::codec::RegisterCodec;
use watersim_core::config::BridgeConfig;
use watersim_core::stop::StopSignal;
use watersim_core::test_utils::tank_and_pipe_engine;
use watersim_core::transport::{
    DEFAULT_BANK_SIZE, RegisterTransport, TransportError, read_floats, write_floats,
};
use watersim_modbus::{ModbusTcpConfig, ModbusTcpTransport};

// ===========================================================================
// Test server
// ===========================================================================

type Registers = Arc<Mutex<Vec<u16>>>;

/// Answers 0x03 and 0x10 against a shared bank; everything else is an
/// illegal function.
struct HoldingRegisters {
    registers: Registers,
}

impl tokio_modbus::server::Service for HoldingRegisters {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let mut registers = self.registers.lock().unwrap();
        let result = match req {
            Request::ReadHoldingRegisters(address, count) => {
                let start = address as usize;
                registers
                    .get(start..start + count as usize)
                    .map(|words| Response::ReadHoldingRegisters(words.to_vec()))
                    .ok_or(ExceptionCode::IllegalDataAddress)
            }
            Request::WriteMultipleRegisters(address, words) => {
                let start = address as usize;
                registers
                    .get_mut(start..start + words.len())
                    .map(|slots| {
                        slots.copy_from_slice(&words);
                        Response::WriteMultipleRegisters(address, words.len() as u16)
                    })
                    .ok_or(ExceptionCode::IllegalDataAddress)
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(result)
    }
}

/// Bind an ephemeral port and serve the bank until the runtime is dropped.
fn spawn_server() -> (u16, Registers, Runtime) {
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let port = listener.local_addr().unwrap().port();
    let registers: Registers = Arc::new(Mutex::new(vec![0; DEFAULT_BANK_SIZE]));
    let shared = registers.clone();

    runtime.spawn(async move {
        let server = Server::new(listener);
        let new_service = move |_addr: SocketAddr| {
            Ok(Some(HoldingRegisters {
                registers: shared.clone(),
            }))
        };
        let on_connected = move |stream: TcpStream, addr: SocketAddr| {
            let new_service = new_service.clone();
            async move { accept_tcp_connection(stream, addr, new_service) }
        };
        let _ = server.serve(&on_connected, |_err: std::io::Error| {}).await;
    });
    (port, registers, runtime)
}

fn client(port: u16) -> ModbusTcpTransport {
    ModbusTcpTransport::new(ModbusTcpConfig {
        port,
        timeout_ms: 2000,
        ..Default::default()
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn floats_round_trip_through_the_server() {
    let (port, registers, _server) = spawn_server();
    let mut transport = client(port);
    transport.connect().unwrap();

    let codec = RegisterCodec::default();
    write_floats(&mut transport, 10, &[1.0, 42.5], &codec).unwrap();
    assert_eq!(&registers.lock().unwrap()[10..12], &[0x0000, 0x3F80]);
    assert_eq!(read_floats(&mut transport, 10, 2, &codec).unwrap(), vec![1.0, 42.5]);

    transport.close().unwrap();
}

#[test]
fn exception_response_is_recoverable() {
    let (port, _registers, _server) = spawn_server();
    let mut transport = client(port);
    transport.connect().unwrap();

    let err = transport.write_holding_registers(99, &[1, 2]).unwrap_err();
    assert!(matches!(err, TransportError::Rejected(_)));
    assert!(transport.is_connected());
    assert_eq!(transport.read_holding_registers(98, 2).unwrap(), vec![0, 0]);

    transport.close().unwrap();
}

#[test]
fn bridge_publishes_over_modbus() {
    let (port, registers, _server) = spawn_server();
    let config = BridgeConfig {
        pacing_ms: 0,
        max_iterations: Some(2),
        ..Default::default()
    };
    let mut bridge = Bridge::new(tank_and_pipe_engine(), client(port), config);

    assert_eq!(bridge.run(&StopSignal::new()).unwrap(), ExitReason::IterationLimit);
    assert!(!bridge.transport().is_connected());

    let regs = registers.lock().unwrap();
    let codec = RegisterCodec::default();
    assert_eq!(codec.decode_floats(&regs[4..8], 2).unwrap(), vec![0.0, 10.0]);
    assert_eq!(regs[8], 1);
    assert_eq!(regs[9], 1);
}
