//! Poll-driven Modbus TCP server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::{Poll, Waker};

use crate::error::Error;
use crate::net::IpVersion;
use crate::types::ClientId;

mod engine;
mod handler;
mod task;

pub use handler::ServerHandler;

use handler::DefaultHandler;
use task::ClientBlock;

pub(crate) enum Command {
    Stop,
    CloseConnection(ClientId),
}

/// A Modbus TCP server (slave).
///
/// The server is a single-threaded reactor: [`run`](Self::run) drives all
/// listening sockets, client connections and backend invocations from the
/// calling thread until a shutdown command arrives. While `run` is active
/// the only safe interactions from other threads are through a
/// [`ServerHandle`].
pub struct ModbusTcpServer {
    pub(crate) host: Option<String>,
    pub(crate) service: String,
    pub(crate) ip_version: IpVersion,
    pub(crate) handler: Box<dyn ServerHandler>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) request_complete_timeout: Option<Duration>,
    pub(crate) poll: Poll,
    waker: Arc<Waker>,
    pub(crate) commands: Arc<Mutex<Vec<Command>>>,
    // reactor state, only touched by the loop in task.rs
    pub(crate) listeners: Vec<mio::net::TcpListener>,
    pub(crate) clients: Vec<ClientBlock>,
    pub(crate) next_token: usize,
    pub(crate) next_tick: Instant,
    pub(crate) stop: bool,
}

impl ModbusTcpServer {
    /// Create a server bound to no address yet, with the default backend
    /// that answers every data operation with an illegal function exception
    pub fn new() -> Result<Self, Error> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), task::WAKER_TOKEN)?);
        Ok(Self {
            host: None,
            service: String::new(),
            ip_version: IpVersion::Any,
            handler: Box::new(DefaultHandler),
            idle_timeout: None,
            request_complete_timeout: None,
            poll,
            waker,
            commands: Arc::new(Mutex::new(Vec::new())),
            listeners: Vec::new(),
            clients: Vec::new(),
            next_token: 0,
            next_tick: Instant::now(),
            stop: false,
        })
    }

    /// Local endpoint to listen on. A `None` host selects the wildcard
    /// address; an empty service selects the default Modbus port.
    pub fn set_server_addr(&mut self, host: Option<&str>, service: &str, ip_version: IpVersion) {
        self.host = host.map(str::to_owned);
        self.service = service.to_owned();
        self.ip_version = ip_version;
    }

    /// Install the backend invoked for every client request
    pub fn set_backend(&mut self, handler: Box<dyn ServerHandler>) {
        self.handler = handler;
    }

    /// Close a client connection when more than `timeout` passes since its
    /// last completed request (or since it connected). `None` disables the
    /// timeout.
    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
    }

    /// Close a client connection when a request is still incomplete
    /// `timeout` after its first byte arrived. `None` disables the timeout.
    pub fn set_request_complete_timeout(&mut self, timeout: Option<Duration>) {
        self.request_complete_timeout = timeout;
    }

    /// A cloneable handle for controlling the server from other threads
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.commands.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Run the reactor on the calling thread.
    ///
    /// Returns `Ok(())` after [`ServerHandle::shutdown`] is processed.
    /// Fails with [`Error::PassiveOpen`] when no resolved endpoint could be
    /// bound, or with an unexpected system error.
    pub fn run(&mut self) -> Result<(), Error> {
        self.run_reactor()
    }
}

/// Thread-safe control surface of a running [`ModbusTcpServer`].
///
/// Commands are queued and take effect on the next reactor iteration.
#[derive(Clone)]
pub struct ServerHandle {
    commands: Arc<Mutex<Vec<Command>>>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    /// Request the reactor to exit its loop cooperatively
    pub fn shutdown(&self) -> Result<(), Error> {
        self.send(Command::Stop)
    }

    /// Close one client connection, identified by the id passed to
    /// [`ServerHandler::authorize`]
    pub fn close_client_connection(&self, id: ClientId) -> Result<(), Error> {
        self.send(Command::CloseConnection(id))
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        {
            let mut queue = self.commands.lock().unwrap_or_else(|e| e.into_inner());
            queue.push(command);
        }
        self.waker.wake()?;
        Ok(())
    }
}
