//! Resume negotiation payload.
//!
//! The server offers a [`ResumeInfo`] right after reading the transfer
//! metadata; the client answers with a one-byte acknowledgement. The
//! `resume_offset` field is advisory only — `completed_chunks` is the
//! authoritative record of what the receiver already has.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;
use crate::protocol::Command;
use crate::protocol::wire::{FrameReader, FrameWriter};

/// Resume offer sent server→client inside a `Resume` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub can_resume: bool,
    /// Byte offset of the first missing chunk. Advisory.
    pub resume_offset: i64,
    pub total_chunks: i64,
    /// Indices of chunks already written to disk.
    pub completed_chunks: Vec<i64>,
}

impl ResumeInfo {
    /// Offer for a transfer with no prior state.
    pub fn fresh() -> Self {
        Self { can_resume: false, resume_offset: 0, total_chunks: 0, completed_chunks: Vec::new() }
    }

    /// Build an offer from the receiver's chunk bitmap. Degenerates to a
    /// fresh offer when nothing has been received yet.
    pub fn from_bitmap(chunks_received: &[bool], chunk_size: u64) -> Self {
        let completed: Vec<i64> = chunks_received
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(i, _)| i as i64)
            .collect();
        if completed.is_empty() {
            return Self::fresh();
        }
        let first_missing = chunks_received
            .iter()
            .position(|done| !done)
            .unwrap_or(chunks_received.len());
        Self {
            can_resume: true,
            resume_offset: first_missing as i64 * chunk_size as i64,
            total_chunks: chunks_received.len() as i64,
            completed_chunks: completed,
        }
    }

    /// Encode as a `Resume` frame. Does not flush.
    pub async fn write_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), TransferError> {
        writer.write_command(Command::Resume).await?;
        writer.write_byte(self.can_resume as u8).await?;
        if self.can_resume {
            writer.write_i64(self.resume_offset).await?;
            writer.write_i64(self.total_chunks).await?;
            let indices = self
                .completed_chunks
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            writer.write_line(&indices).await?;
        }
        Ok(())
    }

    /// Decode the payload that follows a `Resume` command byte.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
    ) -> Result<Self, TransferError> {
        let flag = reader.read_byte().await?;
        if flag == 0 {
            return Ok(Self::fresh());
        }
        let resume_offset = reader.read_i64().await?;
        let total_chunks = reader.read_i64().await?;
        let line = reader.read_line().await?;
        let mut completed = Vec::new();
        for part in line.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let index: i64 = part
                .parse()
                .map_err(|_| TransferError::MalformedField("completed chunk index"))?;
            completed.push(index);
        }
        Ok(Self {
            can_resume: true,
            resume_offset,
            total_chunks,
            completed_chunks: completed,
        })
    }
}
