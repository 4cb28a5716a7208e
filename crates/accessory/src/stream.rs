//! Accessory-side stream transport
//!
//! On the accessory end the platform has already negotiated the mode switch
//! and hands over an open duplex file descriptor. This wraps it in the
//! transport interface: writes go straight through, reads are bounded with
//! `poll` so the receiver worker can observe stop requests.

use common::{Connector, Error, Result, StateSink, Transport};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use protocol::ConnectionState;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Per-read buffer size
const READ_CHUNK: usize = 64;

/// Duplex transport over the platform-delivered accessory descriptor
pub struct AccessoryStream {
    file: File,
    closed: AtomicBool,
}

impl AccessoryStream {
    /// Wrap an already-open descriptor
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            closed: AtomicBool::new(false),
        }
    }

    /// Open an accessory character device by path
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Transport(format!("failed to open {}: {e}", path.display())))?;
        debug!(path = %path.display(), "accessory stream opened");
        Ok(Self {
            file,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Transport("transport closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Wait for the descriptor to become readable; false on timeout
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let poll_timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        match poll(&mut fds, poll_timeout) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(Error::Transport(format!("poll failed: {e}"))),
        }
    }
}

impl Transport for AccessoryStream {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let mut file = &self.file;
        file.write_all(data)
            .and_then(|()| file.flush())
            .map_err(|e| Error::Transport(format!("stream write failed: {e}")))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        let mut buf = [0u8; READ_CHUNK];
        match (&self.file).read(&mut buf) {
            // Readable with zero bytes is EOF; the host end is gone
            Ok(0) => Err(Error::Transport("stream closed by peer".to_string())),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(Error::Transport(format!("stream read failed: {e}"))),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Where the accessory stream comes from
enum StreamSource {
    /// A descriptor handed over by the platform, consumable once
    Fd(Option<OwnedFd>),
    Path(PathBuf),
}

/// Connector for the accessory role
///
/// Does not reconnect on loss: after a detach the platform renegotiates and
/// delivers a fresh descriptor, which means a fresh connect request.
pub struct AccessoryConnector {
    source: StreamSource,
}

impl AccessoryConnector {
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            source: StreamSource::Fd(Some(fd)),
        }
    }

    pub fn from_path(path: PathBuf) -> Self {
        Self {
            source: StreamSource::Path(path),
        }
    }
}

impl Connector for AccessoryConnector {
    fn connect(&mut self, sink: StateSink<'_>) -> Result<Box<dyn Transport>> {
        sink(ConnectionState::Searching);
        let stream = match &mut self.source {
            StreamSource::Fd(fd) => {
                let fd = fd.take().ok_or(Error::NotFound)?;
                AccessoryStream::from_fd(fd)
            }
            StreamSource::Path(path) => AccessoryStream::open(path)?,
        };
        info!("accessory stream connected");
        Ok(Box::new(stream))
    }

    fn reconnects(&self) -> bool {
        false
    }
}
