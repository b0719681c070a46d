//! Length-prefixed framing over a blocking byte stream.
//!
//! Every frame is `[u32 big-endian length][payload]`. Payloads are opaque
//! bytes; in practice they are short UTF-8 words and numerals.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::{debug, trace};

use super::types::HEADER_SIZE;
use crate::error::{AppError, Result};

/// Outcome of waiting for a confirmation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Responder reported completion with this text.
    Confirmed(String),
    /// Stream closed before any confirmation arrived.
    Failed(String),
}

impl Confirmation {
    /// Turn a missing confirmation into an error.
    pub fn into_result(self) -> Result<String> {
        match self {
            Confirmation::Confirmed(text) => Ok(text),
            Confirmation::Failed(reason) => Err(AppError::EndOfStream(reason)),
        }
    }
}

/// Build a complete frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| AppError::protocol(format!("Payload too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one frame and flush.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends before the header or the declared
/// body is complete. A partial payload is never returned.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_SIZE];
    if !fill(reader, &mut header)? {
        return Ok(None);
    }
    let length = u32::from_be_bytes(header) as u64;

    // Grow with the data actually received instead of trusting the header
    let mut payload = Vec::with_capacity(length.min(64 * 1024) as usize);
    match Read::take(&mut *reader, length).read_to_end(&mut payload) {
        Ok(_) => {}
        Err(e) if is_disconnect(&e) => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    if (payload.len() as u64) < length {
        debug!("Stream closed mid-frame: got {} of {length} bytes", payload.len());
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Fill `buf` completely. Returns false on a clean or mid-buffer end of stream.
fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Errors that mean the peer went away rather than a local fault.
pub(crate) fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

/// Frame-level view of a stream, shared by both endpoints.
pub struct FrameChannel<S> {
    stream: S,
}

impl<S: Read + Write> FrameChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Send an opaque payload.
    pub fn send(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        let payload = payload.as_ref();
        trace!("TX frame ({} bytes)", payload.len());
        write_frame(&mut self.stream, payload)
    }

    /// Send a text payload.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        debug!("TX {text:?}");
        write_frame(&mut self.stream, text.as_bytes())
    }

    /// Receive an opaque payload; `None` at end of stream.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let frame = read_frame(&mut self.stream)?;
        if let Some(ref payload) = frame {
            trace!("RX frame ({} bytes)", payload.len());
        }
        Ok(frame)
    }

    /// Receive a UTF-8 payload; `None` at end of stream.
    pub fn recv_text(&mut self) -> Result<Option<String>> {
        match self.recv()? {
            Some(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| AppError::protocol(format!("Frame is not UTF-8: {e}")))?;
                debug!("RX {text:?}");
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Receive a text frame that the script requires.
    pub fn expect_text(&mut self, what: &str) -> Result<String> {
        self.recv_text()?.ok_or_else(|| AppError::end_of_stream(what))
    }

    /// Wait for a confirmation frame.
    pub fn confirmation(&mut self, what: &str) -> Result<Confirmation> {
        Ok(match self.recv_text()? {
            Some(text) => Confirmation::Confirmed(text),
            None => Confirmation::Failed(format!("no confirmation for {what}")),
        })
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl FrameChannel<TcpStream> {
    /// Shut down both directions. Errors are irrelevant once closing.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
