//! Frame delimiter repair.
//!
//! Some camera encoders emit `--<boundary>` without the CRLF that multipart
//! framing requires in front of it, and several browser decoders refuse such
//! streams. The rewriter inserts the missing CRLF, remembering the last two
//! bytes of the previous chunk so markers at offset 0 or 1 are judged against
//! the real preceding bytes.
//!
//! Every marker in a chunk is corrected. A marker split across two chunks is
//! not detected and passes through unchanged.

use bytes::{Bytes, BytesMut};

use crate::relay::boundary::{find_marker, frame_marker};

const CRLF: &[u8] = b"\r\n";

/// Stateful CRLF-before-boundary fixer for one upstream episode.
#[derive(Debug, Clone)]
pub struct FrameRewriter {
    marker: Vec<u8>,
    /// Last two bytes seen so far, oldest first.
    tail: [Option<u8>; 2],
}

impl FrameRewriter {
    /// Create a rewriter for the given boundary token.
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: frame_marker(boundary),
            tail: [None, None],
        }
    }

    /// Return `chunk` with CRLF inserted before every marker that lacks one.
    ///
    /// Chunks that need no repair are returned without copying.
    pub fn rewrite(&mut self, chunk: Bytes) -> Bytes {
        let repairs = self.repair_offsets(&chunk);
        let output = if repairs.is_empty() {
            chunk.clone()
        } else {
            let mut out = BytesMut::with_capacity(chunk.len() + repairs.len() * CRLF.len());
            let mut copied = 0;
            for &offset in &repairs {
                out.extend_from_slice(&chunk[copied..offset]);
                out.extend_from_slice(CRLF);
                copied = offset;
            }
            out.extend_from_slice(&chunk[copied..]);
            out.freeze()
        };

        self.remember_tail(&chunk);
        output
    }

    fn repair_offsets(&self, chunk: &[u8]) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut from = 0;
        while let Some(offset) = find_marker(chunk, &self.marker, from) {
            if self.needs_crlf(chunk, offset) {
                offsets.push(offset);
            }
            from = offset + self.marker.len();
        }
        offsets
    }

    fn needs_crlf(&self, chunk: &[u8], offset: usize) -> bool {
        let preceding = match offset {
            0 => self.tail,
            1 => [self.tail[1], Some(chunk[0])],
            _ => [Some(chunk[offset - 2]), Some(chunk[offset - 1])],
        };
        // Nothing before the marker at all: start of the body.
        if preceding[1].is_none() {
            return false;
        }
        preceding != [Some(b'\r'), Some(b'\n')]
    }

    fn remember_tail(&mut self, chunk: &[u8]) {
        match chunk {
            [] => {}
            [only] => self.tail = [self.tail[1], Some(*only)],
            [.., a, b] => self.tail = [Some(*a), Some(*b)],
        }
    }
}
