//! The server reactor: one readiness loop drives the wake-up handle, every
//! listening socket and every client connection.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::common::cursor::WriteCursor;
use crate::common::frame::{self, constants::MAX_ADU_SIZE, constants::MBAP_HEADER_SIZE, MbapHeader};
use crate::error::{Error, InternalError};
use crate::logging;
use crate::net::{self, EndpointAddr, EndpointUsage};
use crate::server::{engine, Command, ModbusTcpServer};
use crate::types::ClientId;

pub(crate) const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN_BASE: usize = 1;

const BACKEND_TICKER_PERIOD: Duration = Duration::from_secs(1);
const LISTEN_BACKLOG: i32 = 5;

/// Per-connection state. A block is interested in reading while no
/// response is pending and in writing while one is, never both.
pub(crate) struct ClientBlock {
    id: ClientId,
    token: Token,
    stream: TcpStream,
    req_buf: [u8; MAX_ADU_SIZE],
    rsp_buf: [u8; MAX_ADU_SIZE],
    req_len: usize,
    header: Option<MbapHeader>,
    rsp_start: usize,
    rsp_end: usize,
    idle_deadline: Option<Instant>,
    request_deadline: Option<Instant>,
}

impl ClientBlock {
    fn has_response(&self) -> bool {
        self.rsp_start < self.rsp_end
    }

    /// Bytes still required before the request buffer holds a complete ADU
    fn bytes_missing(&self) -> usize {
        match &self.header {
            Some(header) => header.adu_size() - self.req_len,
            None => MBAP_HEADER_SIZE - self.req_len,
        }
    }
}

/// Compose the 64-bit client id from the accepted socket handle and a CRC32
/// over the raw peer address bytes, so concurrent clients get distinct ids
fn gen_client_id(stream: &TcpStream, peer: &SocketAddr) -> ClientId {
    let mut bytes: Vec<u8> = match peer.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    bytes.extend_from_slice(&peer.port().to_be_bytes());
    let crc = crc32fast::hash(&bytes);
    ((stream.as_raw_fd() as u64) << 32) | crc as u64
}

fn open_listener(addr: &SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        // keep the v4 wildcard bindable alongside
        socket.set_only_v6(true)?;
    }
    socket.bind(&(*addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

impl ModbusTcpServer {
    pub(crate) fn run_reactor(&mut self) -> Result<(), Error> {
        self.stop = false;
        if let Err(err) = self.passive_open() {
            self.teardown();
            return Err(err);
        }
        self.next_tick = Instant::now() + BACKEND_TICKER_PERIOD;

        let mut events = Events::with_capacity(64);
        let result = self.event_loop(&mut events);
        self.teardown();
        result
    }

    fn event_loop(&mut self, events: &mut Events) -> Result<(), Error> {
        while !self.stop {
            let timeout = self.poll_timeout();
            if let Err(err) = self.poll.poll(events, Some(timeout)) {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => self.process_commands(),
                    token if self.is_listener_token(token) => {
                        self.establish_connection(token.0 - LISTENER_TOKEN_BASE)?
                    }
                    token => self.handle_client_event(
                        token,
                        event.is_readable(),
                        event.is_writable(),
                        event.is_error(),
                    )?,
                }
            }

            self.execute_pending_tasks();
        }
        Ok(())
    }

    fn is_listener_token(&self, token: Token) -> bool {
        (LISTENER_TOKEN_BASE..LISTENER_TOKEN_BASE + self.listeners.len()).contains(&token.0)
    }

    /// Minimum of the next backend tick and every configured client
    /// deadline; zero once any deadline has passed
    fn poll_timeout(&self) -> Duration {
        let mut deadline = self.next_tick;
        for client in &self.clients {
            if let Some(idle) = client.idle_deadline {
                deadline = deadline.min(idle);
            }
            if let Some(request) = client.request_deadline {
                deadline = deadline.min(request);
            }
        }
        deadline.saturating_duration_since(Instant::now())
    }

    /// Take ownership of the queued commands and process each
    fn process_commands(&mut self) {
        let commands: Vec<Command> = {
            let mut queue = self.commands.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *queue)
        };

        for command in commands {
            match command {
                Command::Stop => self.stop = true,
                Command::CloseConnection(id) => self.close_client_by_id(id),
            }
        }
    }

    fn passive_open(&mut self) -> Result<(), Error> {
        let service = if self.service.is_empty() {
            net::SERVER_DEFAULT_PORT
        } else {
            self.service.as_str()
        };

        let endpoints = net::resolve_endpoint(
            self.host.as_deref(),
            service,
            self.ip_version,
            EndpointUsage::PassiveOpen,
        )?;

        for addr in endpoints {
            match open_listener(&addr) {
                Ok(mut listener) => {
                    let token = Token(LISTENER_TOKEN_BASE + self.listeners.len());
                    self.poll
                        .registry()
                        .register(&mut listener, token, Interest::READABLE)?;
                    self.listeners.push(listener);
                }
                Err(err) => {
                    let ep = EndpointAddr::from_socket_addr(&addr);
                    logging::error(&format!("failed to bind and listen on {ep}: {err}"));
                }
            }
        }

        if self.listeners.is_empty() {
            return Err(Error::PassiveOpen);
        }

        self.next_token = LISTENER_TOKEN_BASE + self.listeners.len();
        Ok(())
    }

    /// Accept every pending connection on a ready listener
    fn establish_connection(&mut self, listener_index: usize) -> Result<(), Error> {
        loop {
            let (mut stream, peer) = match self.listeners[listener_index].accept() {
                Ok(pair) => pair,
                Err(err) => match err.kind() {
                    std::io::ErrorKind::WouldBlock => return Ok(()),
                    std::io::ErrorKind::Interrupted => continue,
                    std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::TimedOut => {
                        logging::error(&format!("accept aborted prematurely: {err}"));
                        continue;
                    }
                    _ => return Err(err.into()),
                },
            };

            if let Err(err) = stream.set_nodelay(true) {
                logging::warning(&format!("unable to enable TCP_NODELAY: {err}"));
            }

            let id = gen_client_id(&stream, &peer);
            let addr = EndpointAddr::from_socket_addr(&peer);
            let authorized = self.handler.authorize(id, &addr, &peer);

            logging::auth(&format!(
                "client(id={id:#x}) connecting from {addr} {}",
                if authorized { "accepted" } else { "denied" }
            ));

            if !authorized {
                continue;
            }

            let token = Token(self.next_token);
            self.next_token += 1;
            self.poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)?;

            self.clients.push(ClientBlock {
                id,
                token,
                stream,
                req_buf: [0; MAX_ADU_SIZE],
                rsp_buf: [0; MAX_ADU_SIZE],
                req_len: 0,
                header: None,
                rsp_start: 0,
                rsp_end: 0,
                idle_deadline: self.idle_timeout.map(|t| Instant::now() + t),
                request_deadline: None,
            });
        }
    }

    fn handle_client_event(
        &mut self,
        token: Token,
        readable: bool,
        writable: bool,
        is_error: bool,
    ) -> Result<(), Error> {
        let index = match self.clients.iter().position(|c| c.token == token) {
            Some(index) => index,
            None => {
                logging::warning(&format!("no client for token {}", token.0));
                return Ok(());
            }
        };

        if is_error {
            self.close_client_at(index);
            return Ok(());
        }

        if self.clients[index].has_response() {
            if writable {
                self.send_response(index)?;
            }
        } else if readable {
            self.handle_request(index)?;
        }
        Ok(())
    }

    /// Accumulate request bytes until a full ADU is present, then execute
    /// it and switch the client to write interest
    fn handle_request(&mut self, index: usize) -> Result<(), Error> {
        loop {
            // parse the header as soon as it is complete
            if self.clients[index].req_len >= MBAP_HEADER_SIZE
                && self.clients[index].header.is_none()
            {
                let block = &mut self.clients[index];
                match frame::parse_mbap_header(&block.req_buf[..block.req_len]) {
                    Ok(header) => block.header = Some(header),
                    Err(err) => {
                        // TCP provides reliable transfer, so a framing error
                        // means the stream carries corrupted data; drop the
                        // connection without a reply
                        logging::error(&format!("client(id={:#x}) request: {err}", block.id));
                        self.close_client_at(index);
                        return Ok(());
                    }
                }
            }

            let missing = self.clients[index].bytes_missing();
            if missing == 0 {
                if let Err(err) = self.execute_request(index) {
                    logging::error(&format!(
                        "client(id={:#x}) request failed: {err}",
                        self.clients[index].id
                    ));
                    self.close_client_at(index);
                }
                return Ok(());
            }

            let block = &mut self.clients[index];
            let start = block.req_len;
            match block.stream.read(&mut block.req_buf[start..start + missing]) {
                Ok(0) => {
                    self.close_client_at(index);
                    return Ok(());
                }
                Ok(count) => {
                    block.req_len += count;
                    if start == 0 {
                        // first byte of a new request starts the assembly clock
                        block.request_deadline =
                            self.request_complete_timeout.map(|t| Instant::now() + t);
                    }
                }
                Err(err) => match err.kind() {
                    std::io::ErrorKind::WouldBlock => return Ok(()),
                    std::io::ErrorKind::Interrupted => continue,
                    _ => {
                        logging::error(&format!("client(id={:#x}) read: {err}", block.id));
                        self.close_client_at(index);
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Run the assembled request through the engine and queue the response
    fn execute_request(&mut self, index: usize) -> Result<(), Error> {
        let handler = self.handler.as_mut();
        let block = &mut self.clients[index];

        let header = match block.header {
            Some(header) => header,
            None => return Err(InternalError::NoneError.into()),
        };

        logging::debug(&format!(
            "client(id={:#x}) request: {} byte ADU, tx_id {}",
            block.id,
            header.adu_size(),
            header.transaction_id
        ));

        let pdu = &block.req_buf[MBAP_HEADER_SIZE..header.adu_size()];
        let pdu_size = engine::server_engine(handler, pdu, &mut block.rsp_buf[MBAP_HEADER_SIZE..])?;
        handler.alive(block.id);

        let rsp_header = MbapHeader::new(header.transaction_id, header.unit_id, pdu_size);
        let mut cursor = WriteCursor::new(&mut block.rsp_buf[..MBAP_HEADER_SIZE]);
        frame::serialize_mbap_header(&mut cursor, &rsp_header)?;

        block.rsp_start = 0;
        block.rsp_end = MBAP_HEADER_SIZE + pdu_size;
        block.request_deadline = None;
        self.poll
            .registry()
            .reregister(&mut block.stream, block.token, Interest::WRITABLE)?;
        Ok(())
    }

    /// Drain as much of the response span as the socket accepts; once it is
    /// empty, reset the block and return to read interest
    fn send_response(&mut self, index: usize) -> Result<(), Error> {
        loop {
            let block = &mut self.clients[index];
            match block.stream.write(&block.rsp_buf[block.rsp_start..block.rsp_end]) {
                Ok(count) => {
                    block.rsp_start += count;
                    if block.rsp_start == block.rsp_end {
                        block.req_len = 0;
                        block.header = None;
                        block.rsp_start = 0;
                        block.rsp_end = 0;
                        block.idle_deadline = self.idle_timeout.map(|t| Instant::now() + t);
                        self.poll.registry().reregister(
                            &mut block.stream,
                            block.token,
                            Interest::READABLE,
                        )?;
                        return Ok(());
                    }
                }
                Err(err) => match err.kind() {
                    std::io::ErrorKind::WouldBlock => return Ok(()),
                    std::io::ErrorKind::Interrupted => continue,
                    std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                        self.close_client_at(index);
                        return Ok(());
                    }
                    _ => return Err(err.into()),
                },
            }
        }
    }

    /// Fire the backend ticker and close clients whose deadlines expired
    fn execute_pending_tasks(&mut self) {
        let now = Instant::now();

        if now >= self.next_tick {
            self.handler.ticker();
            self.next_tick = now + BACKEND_TICKER_PERIOD;
        }

        loop {
            let expired = self.clients.iter().position(|c| {
                c.idle_deadline.is_some_and(|d| now >= d)
                    || c.request_deadline.is_some_and(|d| now >= d)
            });
            match expired {
                Some(index) => {
                    logging::info(&format!(
                        "client(id={:#x}) timed out",
                        self.clients[index].id
                    ));
                    self.close_client_at(index);
                }
                None => break,
            }
        }
    }

    fn close_client_by_id(&mut self, id: ClientId) {
        match self.clients.iter().position(|c| c.id == id) {
            Some(index) => self.close_client_at(index),
            None => logging::warning(&format!("close_client_by_id: client(id={id:#x}) not found")),
        }
    }

    fn close_client_at(&mut self, index: usize) {
        let mut block = self.clients.remove(index);
        if let Err(err) = self.poll.registry().deregister(&mut block.stream) {
            logging::warning(&format!("failed to deregister client socket: {err}"));
        }
        self.handler.disconnect(block.id);
        logging::info(&format!("client(id={:#x}) disconnected", block.id));
    }

    /// Release all sockets so the server can be run again
    fn teardown(&mut self) {
        for mut listener in self.listeners.drain(..) {
            let _ = self.poll.registry().deregister(&mut listener);
        }
        for mut block in self.clients.drain(..) {
            let _ = self.poll.registry().deregister(&mut block.stream);
        }
    }
}
