use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use polbus::client::ModbusTcpClient;
use polbus::error::{Error, ExceptionCode};
use polbus::net::{EndpointAddr, IpVersion};
use polbus::server::{ModbusTcpServer, ServerHandle, ServerHandler};
use polbus::types::{ClientId, DeviceIdentification};

#[derive(Default)]
struct SharedState {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    client_ids: Vec<ClientId>,
    ticks: usize,
    alive: usize,
    deny_all: bool,
}

impl SharedState {
    fn with_data() -> Self {
        Self {
            coils: vec![false; 256],
            discrete_inputs: vec![false; 256],
            holding_registers: vec![0; 256],
            input_registers: vec![0; 256],
            ..Default::default()
        }
    }
}

/// holding-register address whose read blocks until the gate opens
const GATED_ADDR: u16 = 0x0040;

type Gate = Arc<(Mutex<bool>, Condvar)>;

fn open_gate(gate: &Gate) {
    let (released, cvar) = &**gate;
    *released.lock().unwrap() = true;
    cvar.notify_all();
}

struct Handler {
    state: Arc<Mutex<SharedState>>,
    gate: Option<Gate>,
}

fn get_range<T: Copy>(data: &[T], addr: u16, cnt: u16) -> Result<Vec<T>, Error> {
    let start = addr as usize;
    match data.get(start..start + cnt as usize) {
        Some(slice) => Ok(slice.to_vec()),
        None => Err(ExceptionCode::IllegalDataAddress.into()),
    }
}

fn put_range<T: Copy>(data: &mut [T], addr: u16, values: &[T]) -> Result<(), Error> {
    let start = addr as usize;
    match data.get_mut(start..start + values.len()) {
        Some(slice) => {
            slice.copy_from_slice(values);
            Ok(())
        }
        None => Err(ExceptionCode::IllegalDataAddress.into()),
    }
}

impl ServerHandler for Handler {
    fn authorize(
        &mut self,
        id: ClientId,
        _peer: &EndpointAddr,
        _addr: &std::net::SocketAddr,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        state.client_ids.push(id);
        !state.deny_all
    }

    fn alive(&mut self, _id: ClientId) {
        self.state.lock().unwrap().alive += 1;
    }

    fn ticker(&mut self) {
        self.state.lock().unwrap().ticks += 1;
    }

    fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
        get_range(&self.state.lock().unwrap().coils, addr, cnt)
    }

    fn read_discrete_inputs(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
        get_range(&self.state.lock().unwrap().discrete_inputs, addr, cnt)
    }

    fn read_holding_registers(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
        if addr == GATED_ADDR {
            if let Some(gate) = &self.gate {
                let (released, cvar) = &**gate;
                let mut released = released.lock().unwrap();
                while !*released {
                    released = cvar.wait(released).unwrap();
                }
            }
        }
        get_range(&self.state.lock().unwrap().holding_registers, addr, cnt)
    }

    fn read_input_registers(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
        get_range(&self.state.lock().unwrap().input_registers, addr, cnt)
    }

    fn write_coils(&mut self, addr: u16, values: &[bool]) -> Result<(), Error> {
        put_range(&mut self.state.lock().unwrap().coils, addr, values)
    }

    fn write_holding_registers(&mut self, addr: u16, values: &[u16]) -> Result<(), Error> {
        put_range(&mut self.state.lock().unwrap().holding_registers, addr, values)
    }

    fn write_read_holding_registers(
        &mut self,
        write_addr: u16,
        values: &[u16],
        read_addr: u16,
        read_cnt: u16,
    ) -> Result<Vec<u16>, Error> {
        let mut state = self.state.lock().unwrap();
        put_range(&mut state.holding_registers, write_addr, values)?;
        get_range(&state.holding_registers, read_addr, read_cnt)
    }
}

/// route library logging through tracing while the tests run
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn spawn_server(
    port: u16,
    state: Arc<Mutex<SharedState>>,
    configure: impl FnOnce(&mut ModbusTcpServer),
) -> (ServerHandle, thread::JoinHandle<Result<(), Error>>) {
    spawn_server_with_handler(port, Handler { state, gate: None }, configure)
}

fn spawn_server_with_handler(
    port: u16,
    handler: Handler,
    configure: impl FnOnce(&mut ModbusTcpServer),
) -> (ServerHandle, thread::JoinHandle<Result<(), Error>>) {
    init_logging();
    let mut server = ModbusTcpServer::new().unwrap();
    server.set_server_addr(Some("127.0.0.1"), &port.to_string(), IpVersion::V4);
    server.set_backend(Box::new(handler));
    configure(&mut server);
    let handle = server.handle();
    let join = thread::spawn(move || server.run());
    (handle, join)
}

/// the server binds asynchronously, retry until it accepts
fn connect_client(port: u16) -> ModbusTcpClient {
    let service = port.to_string();
    let mut client = ModbusTcpClient::new();
    for _ in 0..100 {
        if client
            .connect_to_server(
                "127.0.0.1",
                &service,
                IpVersion::V4,
                Some(Duration::from_millis(200)),
            )
            .is_ok()
        {
            client.set_response_timeout(Some(Duration::from_secs(5)));
            return client;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not come up on port {port}");
}

fn connect_raw(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return stream;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not come up on port {port}");
}

/// block until the peer closes the stream, with an upper bound
fn wait_for_eof(stream: &mut TcpStream, bound: Duration) -> bool {
    stream.set_read_timeout(Some(bound)).unwrap();
    let mut buf = [0u8; 16];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

#[test]
fn serves_every_operation_of_the_function_code_set() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    {
        let mut guard = state.lock().unwrap();
        let coil_pattern = [
            true, false, true, true, false, false, true, true, //
            true, true, false, true, false, true, true, false, //
            true, false, true,
        ];
        guard.coils[0x13..0x13 + 19].copy_from_slice(&coil_pattern);
        let input_pattern = [
            false, false, true, true, false, true, false, true, //
            true, true, false, true, true, false, true, true, //
            true, false, true, false, true, true,
        ];
        guard.discrete_inputs[0xC4..0xC4 + 22].copy_from_slice(&input_pattern);
        guard.holding_registers[0x6B..0x6E].copy_from_slice(&[0x022B, 0x0000, 0x0064]);
        guard.holding_registers[0x03..0x09]
            .copy_from_slice(&[0x00FE, 0x0ACD, 0x0001, 0x0003, 0x000D, 0x00FF]);
        guard.holding_registers[0x04] = 0x0012;
        guard.input_registers[0x08] = 0x000A;
    }

    let (handle, join) = spawn_server(41502, state.clone(), |_| {});
    let mut client = connect_client(41502);

    let coils = client.read_coils(0x0013, 19).unwrap();
    assert_eq!(coils[..4], [true, false, true, true]);
    assert_eq!(coils.len(), 19);

    let inputs = client.read_discrete_inputs(0x00C4, 22).unwrap();
    assert_eq!(inputs.len(), 22);
    assert_eq!(inputs[2..6], [true, true, false, true]);

    assert_eq!(
        client.read_holding_registers(0x006B, 3).unwrap(),
        vec![0x022B, 0x0000, 0x0064]
    );
    assert_eq!(client.read_input_registers(0x0008, 1).unwrap(), vec![0x000A]);

    client.write_single_coil(0x00AC, true).unwrap();
    assert!(state.lock().unwrap().coils[0xAC]);
    client.write_single_coil(0x00AC, false).unwrap();
    assert!(!state.lock().unwrap().coils[0xAC]);

    client.write_single_register(0x0001, 0xCAFE).unwrap();
    assert_eq!(state.lock().unwrap().holding_registers[1], 0xCAFE);

    client
        .write_multiple_coils(0x0020, &[true, false, true, true, false])
        .unwrap();
    assert_eq!(
        state.lock().unwrap().coils[0x20..0x25],
        [true, false, true, true, false]
    );

    client
        .write_multiple_registers(0x0030, &[0x0102, 0x0304, 0x0506])
        .unwrap();
    assert_eq!(
        state.lock().unwrap().holding_registers[0x30..0x33],
        [0x0102, 0x0304, 0x0506]
    );

    // mask write: (0x0012 & 0x00F2) | (0x0025 & !0x00F2) == 0x0017
    client.mask_write_register(0x0004, 0x00F2, 0x0025).unwrap();
    assert_eq!(state.lock().unwrap().holding_registers[0x04], 0x0017);

    let read_back = client
        .read_write_multiple_registers(0x0003, 6, 0x000E, &[0x00FF, 0x00FF, 0x00FF])
        .unwrap();
    assert_eq!(read_back, vec![0x00FE, 0x0ACD, 0x0001, 0x0003, 0x000D, 0x00FF]);
    assert_eq!(
        state.lock().unwrap().holding_registers[0x0E..0x11],
        [0x00FF, 0x00FF, 0x00FF]
    );

    assert_eq!(
        client.read_device_identification().unwrap(),
        DeviceIdentification::library_default()
    );

    // out-of-range address surfaces the exception the backend produced
    assert_eq!(
        client.read_holding_registers(0xF000, 5).unwrap_err(),
        Error::Exception(ExceptionCode::IllegalDataAddress)
    );

    // the connection survived the exception and the backend saw every request
    assert_eq!(client.read_input_registers(0x0008, 1).unwrap(), vec![0x000A]);
    assert!(state.lock().unwrap().alive >= 13);

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn shutdown_from_another_thread_stops_the_reactor_promptly() {
    let state = Arc::new(Mutex::new(SharedState::default()));
    let (handle, join) = spawn_server(41503, state, |_| {});

    // let the server reach its poll loop
    drop(connect_raw(41503));

    let started = Instant::now();
    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
    // one multiplexer iteration, well under the tick period
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn denied_clients_are_dropped_before_any_request() {
    let state = Arc::new(Mutex::new(SharedState {
        deny_all: true,
        ..SharedState::with_data()
    }));
    let (handle, join) = spawn_server(41504, state.clone(), |_| {});

    let mut stream = connect_raw(41504);
    assert!(wait_for_eof(&mut stream, Duration::from_secs(2)));
    assert_eq!(state.lock().unwrap().client_ids.len(), 1);

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn concurrent_clients_receive_distinct_ids() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    let (handle, join) = spawn_server(41505, state.clone(), |_| {});

    let mut first = connect_client(41505);
    let mut second = connect_client(41505);
    first.read_coils(0, 1).unwrap();
    second.read_coils(0, 1).unwrap();

    let ids = state.lock().unwrap().client_ids.clone();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn idle_clients_are_closed_after_the_idle_timeout() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    let (handle, join) = spawn_server(41506, state, |server| {
        server.set_idle_timeout(Some(Duration::from_millis(300)));
    });

    let mut stream = connect_raw(41506);
    let started = Instant::now();
    assert!(wait_for_eof(&mut stream, Duration::from_secs(3)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "closed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "closed too late: {elapsed:?}");

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn stalled_requests_are_closed_after_the_request_complete_timeout() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    let (handle, join) = spawn_server(41507, state, |server| {
        server.set_request_complete_timeout(Some(Duration::from_millis(300)));
    });

    let mut stream = connect_raw(41507);
    // a fragment of an MBAP header, never completed
    std::io::Write::write_all(&mut stream, &[0x00, 0x01, 0x00]).unwrap();
    let started = Instant::now();
    assert!(wait_for_eof(&mut stream, Duration::from_secs(3)));
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "closed too late: {elapsed:?}");

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn backend_ticker_fires_about_once_per_second() {
    let state = Arc::new(Mutex::new(SharedState::default()));
    let (handle, join) = spawn_server(41508, state.clone(), |_| {});

    drop(connect_raw(41508));
    thread::sleep(Duration::from_millis(2500));

    let ticks = state.lock().unwrap().ticks;
    assert!((2..=4).contains(&ticks), "unexpected tick count: {ticks}");

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn close_client_connection_drops_the_addressed_client() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    let (handle, join) = spawn_server(41509, state.clone(), |_| {});

    let mut client = connect_client(41509);
    client.read_coils(0, 1).unwrap();

    let id = state.lock().unwrap().client_ids[0];
    handle.close_client_connection(id).unwrap();
    thread::sleep(Duration::from_millis(200));

    // the next transaction observes the closed connection, either on the
    // send or on the response read, and discards the stream
    assert_eq!(client.read_coils(0, 1).unwrap_err(), Error::ConnectionClosed);
    assert_eq!(client.read_coils(0, 1).unwrap_err(), Error::NoConnection);

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn occupied_port_fails_passive_open() {
    let state = Arc::new(Mutex::new(SharedState::default()));
    let (handle, join) = spawn_server(41510, state, |_| {});
    drop(connect_raw(41510));

    let mut second = ModbusTcpServer::new().unwrap();
    second.set_server_addr(Some("127.0.0.1"), "41510", IpVersion::V4);
    assert_eq!(second.run().unwrap_err(), Error::PassiveOpen);

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}

#[test]
fn response_timeout_retains_the_connection() {
    let state = Arc::new(Mutex::new(SharedState::with_data()));
    let gate: Gate = Arc::new((Mutex::new(false), Condvar::new()));
    let (handle, join) = spawn_server_with_handler(
        41511,
        Handler {
            state,
            gate: Some(gate.clone()),
        },
        |_| {},
    );

    let mut client = connect_client(41511);
    client.set_response_timeout(Some(Duration::from_millis(100)));

    // the backend sits on the gate, so no response can beat the deadline
    assert_eq!(
        client.read_holding_registers(GATED_ADDR, 1).unwrap_err(),
        Error::ResponseTimeout
    );

    // let the reactor finish the abandoned request and deliver its late
    // response, then keep using the same connection without reconnecting
    open_gate(&gate);
    thread::sleep(Duration::from_millis(300));

    client.set_response_timeout(Some(Duration::from_secs(5)));
    assert_eq!(
        client.read_holding_registers(0x0000, 2).unwrap(),
        vec![0, 0]
    );

    handle.shutdown().unwrap();
    join.join().unwrap().unwrap();
}
