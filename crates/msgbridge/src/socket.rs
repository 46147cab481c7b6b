//! Sockets, listeners and dialers
//!
//! Thin owners over engine identifiers. Each closes its engine object when
//! dropped; closing twice reports `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use msgbridge_core::{kdebug, DialerId, Errno, Flags, ListenerId, Msg, SocketId};
use msgbridge_engine::{Engine, OptValue, Protocol, SendError};

use crate::aio::Aio;
use crate::endpoint::{Direction, Endpoint};
use crate::error::Result;

/// An open socket
pub struct Socket {
    engine: Engine,
    id: SocketId,
    closed: AtomicBool,
}

impl Socket {
    /// Open a socket on the global engine.
    pub fn open(protocol: Protocol) -> Result<Socket> {
        Self::open_in(Engine::global()?, protocol)
    }

    /// Open a socket on `engine`.
    pub fn open_in(engine: &Engine, protocol: Protocol) -> Result<Socket> {
        let id = engine.open(protocol)?;
        Ok(Socket {
            engine: engine.clone(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Close every socket open on the global engine, including ones still
    /// owned by a `Socket`.
    pub fn close_all() -> Result<()> {
        Engine::global()?.close_all();
        Ok(())
    }

    /// Engine identifier
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Engine the socket lives on
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Protocol spoken by the socket
    pub fn protocol(&self) -> Result<Protocol> {
        Ok(self.engine.protocol(self.id)?)
    }

    /// Close the socket. Pending operations complete with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Errno::Closed.into());
        }
        Ok(self.engine.close(self.id)?)
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Bind `url` and accept dialers.
    pub fn listen(&self, url: &str, flags: Flags) -> Result<Listener> {
        let id = self.engine.listen(self.id, url, flags)?;
        Ok(Listener::new(&self.engine, id))
    }

    /// Connect to `url`.
    pub fn dial(&self, url: &str, flags: Flags) -> Result<Dialer> {
        let id = self.engine.dial(self.id, url, flags)?;
        Ok(Dialer::new(&self.engine, id))
    }

    /// Listener for `url`, not yet started
    pub fn create_listener(&self, url: &str) -> Result<Listener> {
        let id = self.engine.create_listener(self.id, url)?;
        Ok(Listener::new(&self.engine, id))
    }

    /// Dialer for `url`, not yet started
    pub fn create_dialer(&self, url: &str) -> Result<Dialer> {
        let id = self.engine.create_dialer(self.id, url)?;
        Ok(Dialer::new(&self.engine, id))
    }

    // ------------------------------------------------------------------
    // Blocking I/O
    // ------------------------------------------------------------------

    /// Send `data` as one message.
    pub fn send(&self, data: &[u8], flags: Flags) -> Result<()> {
        Ok(self.engine.send(self.id, data, flags)?)
    }

    /// Send `msg`. On failure the message comes back inside the error.
    pub fn send_msg(&self, msg: Msg, flags: Flags) -> std::result::Result<(), SendError> {
        self.engine.send_msg(self.id, msg, flags)
    }

    /// Receive one message body.
    pub fn recv(&self, flags: Flags) -> Result<Vec<u8>> {
        Ok(self.engine.recv(self.id, flags)?)
    }

    /// Receive one message.
    pub fn recv_msg(&self, flags: Flags) -> Result<Msg> {
        Ok(self.engine.recv_msg(self.id, flags)?)
    }

    // ------------------------------------------------------------------
    // Asynchronous I/O
    // ------------------------------------------------------------------

    /// Arm `aio` to send its attached message.
    pub fn send_aio(&self, aio: &Aio) -> Result<()> {
        aio.arm(self, Direction::Send, None)
    }

    /// Arm `aio` to receive.
    pub fn recv_aio(&self, aio: &Aio) -> Result<()> {
        aio.arm(self, Direction::Receive, None)
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Set an option by name
    pub fn set_opt(&self, name: &str, value: OptValue) -> Result<()> {
        Ok(self.engine.set_opt(self.id, name, value)?)
    }

    /// Read an option by name
    pub fn get_opt(&self, name: &str) -> Result<OptValue> {
        Ok(self.engine.get_opt(self.id, name)?)
    }

    /// Set a boolean option
    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        self.set_opt(name, OptValue::Bool(value))
    }

    /// Read a boolean option
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        Ok(self.get_opt(name)?.as_bool()?)
    }

    /// Set an integer option
    pub fn set_int(&self, name: &str, value: i32) -> Result<()> {
        self.set_opt(name, OptValue::Int(value))
    }

    /// Read an integer option
    pub fn get_int(&self, name: &str) -> Result<i32> {
        Ok(self.get_opt(name)?.as_int()?)
    }

    /// Set a duration option. `None` means no limit.
    pub fn set_ms(&self, name: &str, value: Option<Duration>) -> Result<()> {
        self.set_opt(name, OptValue::Ms(value))
    }

    /// Read a duration option
    pub fn get_ms(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.get_opt(name)?.as_ms()?)
    }

    /// Set a size option
    pub fn set_size(&self, name: &str, value: usize) -> Result<()> {
        self.set_opt(name, OptValue::Size(value))
    }

    /// Read a size option
    pub fn get_size(&self, name: &str) -> Result<usize> {
        Ok(self.get_opt(name)?.as_size()?)
    }

    /// Set a 64-bit option
    pub fn set_u64(&self, name: &str, value: u64) -> Result<()> {
        self.set_opt(name, OptValue::U64(value))
    }

    /// Read a 64-bit option
    pub fn get_u64(&self, name: &str) -> Result<u64> {
        Ok(self.get_opt(name)?.as_u64()?)
    }

    /// Set a string option
    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.set_opt(name, OptValue::Str(value.to_string()))
    }

    /// Read a string option
    pub fn get_string(&self, name: &str) -> Result<String> {
        Ok(self.get_opt(name)?.into_string()?)
    }

    /// Set a byte-array option
    pub fn set_bytes(&self, name: &str, value: &[u8]) -> Result<()> {
        self.set_opt(name, OptValue::Bytes(value.to_vec()))
    }

    /// Read a byte-array option
    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.get_opt(name)?.into_bytes()?)
    }
}

impl Endpoint for Socket {
    fn submit_send(&self, aio: &Aio) -> Result<()> {
        aio.submit_with(|native| self.engine.submit_send(self.id, native))
    }

    fn submit_receive(&self, aio: &Aio) -> Result<()> {
        aio.submit_with(|native| self.engine.submit_recv(self.id, native))
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.engine.close(self.id) {
                kdebug!("{} already gone at drop: {}", self.id, err);
            }
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A bound address accepting dialers
pub struct Listener {
    engine: Engine,
    id: ListenerId,
    closed: AtomicBool,
}

impl Listener {
    fn new(engine: &Engine, id: ListenerId) -> Self {
        Listener {
            engine: engine.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Bind a listener from [`Socket::create_listener`].
    pub fn start(&self, flags: Flags) -> Result<()> {
        Ok(self.engine.start_listener(self.id, flags)?)
    }

    pub fn url(&self) -> Result<String> {
        Ok(self.engine.listener_url(self.id)?)
    }

    /// Unbind and drop the pipes this listener accepted.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Errno::Closed.into());
        }
        Ok(self.engine.close_listener(self.id)?)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.engine.close_listener(self.id);
        }
    }
}

/// A connection to a listening address
pub struct Dialer {
    engine: Engine,
    id: DialerId,
    closed: AtomicBool,
}

impl Dialer {
    fn new(engine: &Engine, id: DialerId) -> Self {
        Dialer {
            engine: engine.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DialerId {
        self.id
    }

    /// Connect a dialer from [`Socket::create_dialer`]. With `NONBLOCK`
    /// and nobody listening yet, connects once a listener appears.
    pub fn start(&self, flags: Flags) -> Result<()> {
        Ok(self.engine.start_dialer(self.id, flags)?)
    }

    pub fn url(&self) -> Result<String> {
        Ok(self.engine.dialer_url(self.id)?)
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Errno::Closed.into());
        }
        Ok(self.engine.close_dialer(self.id)?)
    }
}

impl Drop for Dialer {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.engine.close_dialer(self.id);
        }
    }
}
