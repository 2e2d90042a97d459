// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful reframing of the inbound byte stream.
//!
//! TCP gives us arbitrary chunks; devices occasionally prepend garbage
//! after a modem reset. The reader scans for the 0xDA header, checks the
//! declared length and the 0xDD footer, and emits candidate frames. CRC
//! validation is left to [`super::parse`] so a corrupted candidate is
//! dropped without desynchronizing the stream.

use super::{FRAME_FOOTER, FRAME_HEADER};

/// Accumulates socket bytes and extracts complete frame candidates.
pub struct FrameReader {
    buf: Vec<u8>,
    max_frame_len: usize,
    max_buffered: usize,
}

impl FrameReader {
    /// `max_frame_len` caps a single frame's declared length;
    /// `max_buffered` is the hard ceiling on retained bytes, beyond which
    /// the connection is considered abusive.
    pub fn new(max_frame_len: usize, max_buffered: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            max_frame_len,
            max_buffered,
        }
    }

    /// Feed one chunk of socket bytes; returns every complete candidate
    /// frame now available, in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, BufferOverflow> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.max_buffered {
            return Err(BufferOverflow {
                buffered: self.buf.len(),
                limit: self.max_buffered,
            });
        }

        let mut frames = Vec::new();
        let mut scan = 0;
        let mut consumed = 0;

        loop {
            let Some(rel) = self.buf[scan..].iter().position(|&b| b == FRAME_HEADER) else {
                break;
            };
            let start = scan + rel;

            // Need header through the length field before we can decide.
            if self.buf.len() < start + 4 {
                break;
            }

            let declared = self.buf[start + 2] as usize | (self.buf[start + 3] as usize) << 8;
            if declared < super::MIN_FRAME_LEN || declared > self.max_frame_len {
                // Implausible length: this 0xDA was not a frame start.
                scan = start + 1;
                continue;
            }

            if self.buf.len() < start + declared {
                // Frame not fully arrived yet.
                break;
            }

            if self.buf[start + declared - 1] != FRAME_FOOTER {
                scan = start + 1;
                continue;
            }

            frames.push(self.buf[start..start + declared].to_vec());
            scan = start + declared;
            consumed = scan;
        }

        if consumed > 0 {
            self.buf.drain(..consumed);
        }
        Ok(frames)
    }

    /// Bytes currently retained while waiting for more data.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// The retained-byte ceiling was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOverflow {
    pub buffered: usize,
    pub limit: usize,
}

impl std::fmt::Display for BufferOverflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Receive buffer overflow: {} bytes buffered, limit {}",
            self.buffered, self.limit
        )
    }
}

impl std::error::Error for BufferOverflow {}
