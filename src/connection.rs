// ABOUTME: Byte-stream transport between the command channel and the modem's serial port
// ABOUTME: Buffers writes per AT command and turns raw reads into UTF-8 text chunks

use crate::error::ModemResult;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Carriage return terminating every AT command line.
pub const CR: u8 = b'\r';
/// Ctrl-Z (SUB) terminating a PDU payload after the `>` prompt.
pub const SUB: u8 = 0x1A;

/// Opens the modem's serial device.
pub fn open_serial(path: &str, baud_rate: u32) -> ModemResult<SerialStream> {
    let port = tokio_serial::new(path, baud_rate).open_native_async()?;
    Ok(port)
}

/// Write side of the modem connection
///
/// Each write is flushed immediately; the modem reacts to a command as soon
/// as the terminator arrives.
#[derive(Debug)]
pub struct CommandWriter<W> {
    stream: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> CommandWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: BufWriter::new(stream),
        }
    }

    /// Writes `command` followed by CR.
    pub async fn write_command(&mut self, command: &str) -> io::Result<()> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_u8(CR).await?;
        self.stream.flush().await
    }

    /// Writes a PDU payload followed by SUB.
    pub async fn write_payload(&mut self, payload: &str) -> io::Result<()> {
        self.stream.write_all(payload.as_bytes()).await?;
        self.stream.write_u8(SUB).await?;
        self.stream.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Read side of the modem connection
///
/// Serial reads can split a multi-byte UTF-8 sequence; the incomplete tail
/// stays buffered until the next read completes it.
#[derive(Debug)]
pub struct ChunkReader<R> {
    stream: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Waits for the next chunk of text from the modem.
    ///
    /// Returns `None` once the stream has ended and everything buffered has
    /// been handed out.
    pub async fn read_chunk(&mut self) -> ModemResult<Option<String>> {
        loop {
            if let Some(text) = self.take_text() {
                return Ok(Some(text));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = self.buffer.split();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
        }
    }

    fn take_text(&mut self) -> Option<String> {
        let end = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(e) => match e.error_len() {
                // Invalid bytes are replaced, not waited on.
                Some(len) => e.valid_up_to() + len,
                None => e.valid_up_to(),
            },
        };
        if end == 0 {
            return None;
        }
        let bytes = self.buffer.split_to(end);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}
