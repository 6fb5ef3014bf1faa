use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, trace};

use super::{Connector, RawStream};
use crate::constants::{PORT_POLL_INTERVAL, TCP_CONNECT_TIMEOUT, WAIT_CONNECTED_TIMEOUT};
use crate::error::{DeviceError, DeviceResult};
use crate::operation::OperationEnvironment;

/// Reads everything currently queued on a socket without blocking
fn discard_pending(
    set_nonblocking: impl Fn(bool) -> io::Result<()>,
    mut read: impl FnMut(&mut [u8]) -> io::Result<usize>,
) -> io::Result<()> {
    let mut buffer = [0u8; 512];
    set_nonblocking(true)?;
    let result = loop {
        match read(&mut buffer) {
            Ok(0) => break Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    set_nonblocking(false)?;
    result
}

struct TcpSocketStream {
    stream: TcpStream,
}

impl TcpSocketStream {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_read_timeout(Some(PORT_POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        Ok(TcpSocketStream { stream })
    }
}

impl RawStream for TcpSocketStream {
    fn read_some(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buffer) {
            Ok(0) if !buffer.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            result => result,
        }
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream.write(data)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let stream = &self.stream;
        discard_pending(|on| stream.set_nonblocking(on), |buf| (&*stream).read(buf))
    }

    fn try_clone(&self) -> io::Result<Box<dyn RawStream>> {
        Ok(Box::new(TcpSocketStream {
            stream: self.stream.try_clone()?,
        }))
    }
}

/// Connects to a TCP server when the port is first waited on
pub struct TcpClientConnector {
    host: String,
    port: u16,
}

impl TcpClientConnector {
    pub fn new(host: &str, port: u16) -> Self {
        TcpClientConnector {
            host: host.to_string(),
            port,
        }
    }
}

impl Connector for TcpClientConnector {
    fn connect(&mut self, env: &dyn OperationEnvironment) -> DeviceResult<Box<dyn RawStream>> {
        let addresses = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| DeviceError::Communication(format!("{}: {}", self.host, e)))?;

        let mut last_error = None;
        for address in addresses {
            env.check_cancelled()?;
            debug!("Connecting to {}", address);
            match TcpStream::connect_timeout(&address, TCP_CONNECT_TIMEOUT) {
                Ok(stream) => {
                    info!("Connected to {}", address);
                    return Ok(Box::new(TcpSocketStream::new(stream)?));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => DeviceError::Timeout,
            Some(e) => DeviceError::Communication(format!("{}:{}: {}", self.host, self.port, e)),
            None => DeviceError::Communication(format!("{}: no address", self.host)),
        })
    }
}

/// Accepts a single client on a bound listener
pub struct TcpListenerConnector {
    listener: TcpListener,
}

impl TcpListenerConnector {
    pub fn bind(address: &str, port: u16) -> DeviceResult<Self> {
        let address = if address.is_empty() { "0.0.0.0" } else { address };
        let listener = TcpListener::bind((address, port))
            .map_err(|e| DeviceError::Communication(format!("{}:{}: {}", address, port, e)))?;
        listener.set_nonblocking(true)?;
        info!("Listening on {}:{}", address, port);
        Ok(TcpListenerConnector { listener })
    }

    pub fn local_addr(&self) -> DeviceResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl Connector for TcpListenerConnector {
    fn connect(&mut self, env: &dyn OperationEnvironment) -> DeviceResult<Box<dyn RawStream>> {
        let deadline = Instant::now() + WAIT_CONNECTED_TIMEOUT;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {}", peer);
                    stream.set_nonblocking(false)?;
                    return Ok(Box::new(TcpSocketStream::new(stream)?));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(DeviceError::Timeout);
                    }
                    env.sleep(PORT_POLL_INTERVAL)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Datagram transport. Replies go to the sender of the most recent
/// datagram; writes before anything was received are dropped.
pub struct UdpStream {
    socket: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
}

impl UdpStream {
    pub fn bind(address: &str, port: u16) -> DeviceResult<Self> {
        let address = if address.is_empty() { "0.0.0.0" } else { address };
        let socket = UdpSocket::bind((address, port))
            .map_err(|e| DeviceError::Communication(format!("{}:{}: {}", address, port, e)))?;
        socket.set_read_timeout(Some(PORT_POLL_INTERVAL))?;
        info!("Receiving datagrams on {}:{}", address, port);
        Ok(UdpStream {
            socket,
            peer: Arc::new(Mutex::new(None)),
        })
    }
}

impl RawStream for UdpStream {
    fn read_some(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.socket.recv_from(buffer) {
            Ok((n, from)) => {
                *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(from);
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        let peer = *self.peer.lock().unwrap_or_else(PoisonError::into_inner);
        match peer {
            Some(peer) => self.socket.send_to(data, peer),
            None => {
                trace!("No UDP peer yet, dropping {} bytes", data.len());
                Ok(data.len())
            }
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let socket = &self.socket;
        discard_pending(|on| socket.set_nonblocking(on), |buf| socket.recv(buf))
    }

    fn try_clone(&self) -> io::Result<Box<dyn RawStream>> {
        Ok(Box::new(UdpStream {
            socket: self.socket.try_clone()?,
            peer: self.peer.clone(),
        }))
    }
}
