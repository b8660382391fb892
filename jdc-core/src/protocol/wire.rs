//! Framing codec — buffered reader/writer primitives for the command
//! protocol.
//!
//! The codec knows how to move commands, lines, integers, booleans, flag
//! bytes, and raw blocks across the stream; it never interprets what they
//! mean. Writers buffer internally, so a driver must call
//! [`FrameWriter::flush`] before awaiting the peer's reply.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::TransferError;
use crate::protocol::{Command, MAX_LINE_LEN};

/// Reading half of a framed connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a raw stream with the given buffer capacity.
    pub fn new(inner: R, buffer_size: usize) -> Self {
        Self { inner: BufReader::with_capacity(buffer_size.max(4096), inner) }
    }

    /// Read the next command byte.
    pub async fn read_command(&mut self) -> Result<Command, TransferError> {
        let byte = self.read_byte().await?;
        Command::try_from(byte)
    }

    /// Read one raw byte (compression flags, resume flags).
    pub async fn read_byte(&mut self) -> Result<u8, TransferError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).await.map_err(map_eof)?;
        Ok(buf[0])
    }

    /// Read a `\n`-terminated UTF-8 line, without the terminator.
    ///
    /// Lines longer than [`MAX_LINE_LEN`] fail the frame rather than
    /// buffering without bound.
    pub async fn read_line(&mut self) -> Result<String, TransferError> {
        use tokio::io::AsyncBufReadExt;

        let mut raw = Vec::new();
        let mut limited = (&mut self.inner).take(MAX_LINE_LEN as u64 + 1);
        let n = limited.read_until(b'\n', &mut raw).await.map_err(map_eof)?;
        if n == 0 {
            return Err(TransferError::ConnectionClosed);
        }
        match raw.pop() {
            Some(b'\n') => {}
            // Hit the length cap or EOF before the terminator.
            _ => {
                if raw.len() >= MAX_LINE_LEN {
                    return Err(TransferError::MalformedField("line exceeds maximum length"));
                }
                return Err(TransferError::ConnectionClosed);
            }
        }
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        String::from_utf8(raw).map_err(|_| TransferError::MalformedField("line is not utf-8"))
    }

    /// Read a line and parse it as a decimal int64.
    pub async fn read_i64(&mut self) -> Result<i64, TransferError> {
        let line = self.read_line().await?;
        line.trim()
            .parse::<i64>()
            .map_err(|_| TransferError::MalformedField("expected decimal integer"))
    }

    /// Read a line and parse it as `true` / `false`.
    pub async fn read_bool(&mut self) -> Result<bool, TransferError> {
        let line = self.read_line().await?;
        match line.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(TransferError::MalformedField("expected boolean")),
        }
    }

    /// Read exactly `len` raw bytes (chunk bodies).
    pub async fn read_block(&mut self, len: usize) -> Result<Bytes, TransferError> {
        let mut buf = BytesMut::zeroed(len);
        self.inner.read_exact(&mut buf).await.map_err(map_eof)?;
        Ok(buf.freeze())
    }
}

/// Writing half of a framed connection.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a raw stream with the given buffer capacity.
    pub fn new(inner: W, buffer_size: usize) -> Self {
        Self { inner: BufWriter::with_capacity(buffer_size.max(4096), inner) }
    }

    /// Write a command byte.
    pub async fn write_command(&mut self, command: Command) -> Result<(), TransferError> {
        self.inner.write_u8(command as u8).await.map_err(map_eof)
    }

    /// Write one raw byte.
    pub async fn write_byte(&mut self, byte: u8) -> Result<(), TransferError> {
        self.inner.write_u8(byte).await.map_err(map_eof)
    }

    /// Write a payload line plus terminator. The text must not itself
    /// contain a newline.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransferError> {
        debug_assert!(!line.contains('\n'));
        self.inner.write_all(line.as_bytes()).await.map_err(map_eof)?;
        self.inner.write_u8(b'\n').await.map_err(map_eof)
    }

    /// Write an int64 as its decimal line.
    pub async fn write_i64(&mut self, value: i64) -> Result<(), TransferError> {
        let mut buf = value.to_string();
        buf.push('\n');
        self.inner.write_all(buf.as_bytes()).await.map_err(map_eof)
    }

    /// Write a boolean as its `true` / `false` line.
    pub async fn write_bool(&mut self, value: bool) -> Result<(), TransferError> {
        self.write_line(if value { "true" } else { "false" }).await
    }

    /// Write a raw block (chunk bodies).
    pub async fn write_block(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.inner.write_all(data).await.map_err(map_eof)
    }

    /// Flush buffered frames to the socket. Required before awaiting a
    /// reply.
    pub async fn flush(&mut self) -> Result<(), TransferError> {
        self.inner.flush().await.map_err(map_eof)
    }
}

fn map_eof(e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::ConnectionClosed
    } else {
        TransferError::Network(e)
    }
}
