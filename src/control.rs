use std::fmt;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// Event codes exchanged on the control channel between the manager and a
/// worker.
///
/// The codes are small disjoint bits. [`EXITING_ERROR`] and [`EXITING_MAX`]
/// share the [`EXITING`] mask so the manager can test "any exit" in one
/// step while still telling the causes apart.
///
/// [`EXITING_ERROR`]: ChildEvent::EXITING_ERROR
/// [`EXITING_MAX`]: ChildEvent::EXITING_MAX
/// [`EXITING`]: ChildEvent::EXITING
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChildEvent(u8);

impl ChildEvent {
    /// Worker to manager: idle and ready to accept. Payload: requests
    /// handled so far.
    pub const WAITING: ChildEvent = ChildEvent(1);

    /// Worker to manager: servicing a request. Payload: requests handled
    /// before this one.
    pub const BUSY: ChildEvent = ChildEvent(2);

    /// Worker to manager: terminating because a hook failed. Payload: the
    /// error description.
    pub const EXITING_ERROR: ChildEvent = ChildEvent(4);

    /// Worker to manager: terminating after reaching the per-worker request
    /// cap.
    pub const EXITING_MAX: ChildEvent = ChildEvent(8);

    /// Mask covering both exit causes.
    pub const EXITING: ChildEvent = ChildEvent(4 | 8);

    /// Manager to worker: finish the request in flight, if any, then shut
    /// down.
    pub const CLOSE: ChildEvent = ChildEvent(16);

    /// Returns true for either exit cause.
    pub const fn is_exiting(self) -> bool {
        self.0 & Self::EXITING.0 != 0
    }

    pub(crate) fn from_wire(byte: u8) -> Option<ChildEvent> {
        match byte {
            1 => Some(Self::WAITING),
            2 => Some(Self::BUSY),
            4 => Some(Self::EXITING_ERROR),
            8 => Some(Self::EXITING_MAX),
            16 => Some(Self::CLOSE),
            _ => None,
        }
    }

    pub(crate) fn as_wire(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ChildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            ChildEvent::WAITING => "WAITING",
            ChildEvent::BUSY => "BUSY",
            ChildEvent::EXITING_ERROR => "EXITING_ERROR",
            ChildEvent::EXITING_MAX => "EXITING_MAX",
            ChildEvent::EXITING => "EXITING",
            ChildEvent::CLOSE => "CLOSE",
            _ => return f.debug_tuple("ChildEvent").field(&self.0).finish(),
        };
        f.write_str(name)
    }
}

/// One end of the framed message pipe between the manager and a worker.
///
/// Frames are `[code: u8][len: u32 BE][payload]` over a Unix stream socket
/// pair. Both ends read only after their poller reports readability, so the
/// descriptors stay blocking; frames are small enough that a started write
/// completes promptly.
pub(crate) struct ControlChannel {
    sock: UnixStream,
}

impl ControlChannel {
    /// Creates a connected channel pair: `(parent end, child end)`.
    pub(crate) fn pair() -> io::Result<(ControlChannel, ControlChannel)> {
        let (parent, child) = UnixStream::pair()?;
        Ok((ControlChannel { sock: parent }, ControlChannel { sock: child }))
    }

    /// Sends one `(event, payload)` frame.
    pub(crate) fn send(&self, event: ChildEvent, payload: &str) -> io::Result<()> {
        let bytes = payload.as_bytes();
        let mut frame = Vec::with_capacity(5 + bytes.len());
        frame.push(event.as_wire());
        frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(bytes);
        (&self.sock).write_all(&frame)
    }

    /// Receives one frame. `Ok(None)` means the peer closed the channel at a
    /// frame boundary; a torn frame or unknown code is an error.
    pub(crate) fn recv(&self) -> io::Result<Option<(ChildEvent, String)>> {
        let mut header = [0; 5];
        if !read_exact_or_eof(&self.sock, &mut header)? {
            return Ok(None);
        }
        let event = ChildEvent::from_wire(header[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown control event code: {}", header[0]),
            )
        })?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0; len];
        (&self.sock).read_exact(&mut payload)?;
        Ok(Some((event, String::from_utf8_lossy(&payload).into_owned())))
    }
}

/// Like `read_exact`, except a clean EOF before the first byte returns
/// `Ok(false)`.
fn read_exact_or_eof(mut sock: &UnixStream, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match sock.read(&mut buf[read..]) {
            Ok(0) if read == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => read += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

impl AsRawFd for ControlChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}
