//! The byte stream a channel runs over.
//!
//! [`Socket`] is the minimum a channel needs from its transport: non-blocking
//! `Read`/`Write` that report `WouldBlock`, registration with a mio registry,
//! a way to finish a pending connect, and shutdown. It is implemented for [`mio::net::TcpStream`]; tests use an
//! in-memory implementation.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::event::Source;
use mio::net::TcpStream;

/// A non-blocking, connection-oriented byte stream.
pub trait Socket: Read + Write + Source {
    /// Completes a connect started in non-blocking mode.
    ///
    /// Returns `Ok(false)` if the connect is still in progress.
    fn finish_connect(&mut self) -> io::Result<bool>;

    /// Shuts down both directions. Errors are not interesting after close.
    fn shutdown(&mut self);

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Socket for TcpStream {
    fn finish_connect(&mut self) -> io::Result<bool> {
        // mio signals connect completion as writability; the connect failed if
        // SO_ERROR is set, and is still pending while there is no peer address
        if let Some(err) = self.take_error()? {
            return Err(err);
        }
        match TcpStream::peer_addr(self) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::NotConnected | ErrorKind::WouldBlock) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}
