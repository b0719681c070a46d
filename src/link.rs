//! Connection lifecycle for the command stream.
//!
//! A [`Link`] produces a fresh [`TcpStream`] per session, either by
//! accepting on a listener it binds once and reuses, or by connecting out.
//! A [`Connection`] owns the stream for one session and closes it exactly
//! once.

use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::protocol::FrameChannel;

/// Which side opens the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind `addr` and accept one peer per session.
    Listen(String),
    /// Connect to `addr` for each session.
    Connect(String),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Listen(addr) => write!(f, "listen on {addr}"),
            Endpoint::Connect(addr) => write!(f, "connect to {addr}"),
        }
    }
}

/// Session factory for one endpoint.
pub struct Link {
    endpoint: Endpoint,
    listener: Option<TcpListener>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl Link {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            listener: None,
            connect_timeout: None,
            read_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Read timeout applied to every established stream.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bind the listener now (listen role only). Returns the bound address.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let Endpoint::Listen(addr) = &self.endpoint else {
            return Err(AppError::config("Only a listening endpoint can be bound"));
        };
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }

        let listener = TcpListener::bind(addr.as_str())
            .map_err(|e| AppError::ConnectionFailed(format!("Cannot bind {addr}: {e}")))?;
        let local = listener.local_addr()?;
        info!("Listening on {local}");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Open the stream for the next session.
    pub fn establish(&mut self) -> Result<TcpStream> {
        let stream = match self.endpoint.clone() {
            Endpoint::Listen(_) => {
                self.bind()?;
                let listener = self
                    .listener
                    .as_ref()
                    .ok_or_else(|| AppError::ConnectionFailed("Listener not bound".to_string()))?;
                let (stream, peer) = listener.accept()?;
                info!(%peer, "Accepted connection");
                stream
            }
            Endpoint::Connect(addr) => {
                let stream = connect(&addr, self.connect_timeout)?;
                info!("Connected to {addr}");
                stream
            }
        };

        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.read_timeout)?;
        Ok(stream)
    }

    /// Establish, retrying with `delay` between failed attempts.
    ///
    /// `attempts` of `None` retries forever.
    pub fn establish_retrying(&mut self, delay: Duration, attempts: Option<usize>) -> Result<TcpStream> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.establish() {
                Ok(stream) => return Ok(stream),
                Err(e) if attempts.is_none_or(|max| attempt < max) => {
                    warn!("Attempt {attempt} to {} failed: {e}", self.endpoint);
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Connect to `addr`, honouring an optional timeout per resolved address.
pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect(addr).map_err(|e| AppError::ConnectionFailed(format!("{addr}: {e}")));
    };

    let mut last_error = None;
    for candidate in addr
        .to_socket_addrs()
        .map_err(|e| AppError::ConnectionFailed(format!("Cannot resolve {addr}: {e}")))?
    {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {candidate} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(AppError::ConnectionFailed(match last_error {
        Some(e) => format!("{addr}: {e}"),
        None => format!("{addr}: no addresses resolved"),
    }))
}

/// The command stream of one session.
pub struct Connection {
    channel: Option<FrameChannel<TcpStream>>,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            channel: Some(FrameChannel::new(stream)),
            peer,
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Peer address, used for the secondary transports.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer.map(|addr| addr.ip())
    }

    pub fn channel(&mut self) -> Result<&mut FrameChannel<TcpStream>> {
        self.channel
            .as_mut()
            .ok_or_else(|| AppError::ConnectionFailed("Connection is closed".to_string()))
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.channel.as_ref().map(|channel| channel.get_ref())
    }

    /// Shut the stream down. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Closing connection to {:?}", self.peer);
            channel.close();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
