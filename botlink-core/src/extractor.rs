//! JPEG frame extraction from an unframed MJPEG byte stream.
//!
//! The upstream camera sends JPEG images back to back with no length
//! prefix. Frames are cut at the SOI (`FF D8`) / EOI (`FF D9`) markers:
//!
//! ```text
//!  garbage │ FF D8 ........ FF D9 │ garbage │ FF D8 ... FF D9 │ FF D8 ..
//!  dropped │     frame n          │ dropped │   frame n+1     │ pending
//! ```
//!
//! Bytes before a start marker are discarded together with the frame
//! that follows them. Corrupt bytes between frames are therefore lost
//! silently instead of stalling the stream.
//!
//! [`FrameExtractor`] owns the unconsumed tail of the stream and a
//! resumable marker scan: `feed` a chunk, iterate the frames.

use bytes::{Bytes, BytesMut};

use crate::frame::{EOI, Frame, SOI};

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

// ── Scanner ──────────────────────────────────────────────────────

/// Stateful SOI/EOI scanner.
///
/// Remembers how far the current buffer has already been searched so a
/// large frame arriving in many small reads is scanned once, not once per
/// read.
#[derive(Debug, Default)]
pub(crate) struct JpegScanner {
    next_sequence: u64,
    /// Offset of the SOI marker of the frame being assembled.
    start: Option<usize>,
    /// Next offset to search from; always one byte short of the end so a
    /// marker split across reads is still found.
    resume: usize,
}

impl JpegScanner {
    /// Sequence number the next emitted frame will carry.
    fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Forget any partial scan. Call after clearing the buffer.
    fn reset_scan(&mut self) {
        self.start = None;
        self.resume = 0;
    }

    fn extract(&mut self, src: &mut BytesMut) -> Option<Frame> {
        let start = match self.start {
            Some(start) => start,
            None => match find_marker(src, SOI, self.resume) {
                Some(start) => {
                    self.start = Some(start);
                    self.resume = start + 2;
                    start
                }
                None => {
                    self.resume = src.len().saturating_sub(1);
                    return None;
                }
            },
        };

        let from = self.resume.max(start + 2);
        let Some(end) = find_marker(src, EOI, from) else {
            self.resume = src.len().saturating_sub(1).max(start + 2);
            return None;
        };

        // Everything up to and including EOI leaves the buffer; only the
        // [start, end + 2) range becomes the frame.
        let mut consumed = src.split_to(end + 2);
        let data: Bytes = consumed.split_off(start).freeze();
        self.reset_scan();

        let frame = Frame::new(self.next_sequence, data);
        self.next_sequence += 1;
        Some(frame)
    }
}

// ── FrameExtractor ───────────────────────────────────────────────

/// Push-style extractor owning the unconsumed tail of the stream.
///
/// ```
/// use botlink_core::FrameExtractor;
///
/// let mut ex = FrameExtractor::new();
/// assert_eq!(ex.feed(b"\x00\xff\xd8AA\xff").count(), 0);
/// let frames: Vec<_> = ex.feed(b"\xd9").collect();
/// assert_eq!(frames[0].data().as_ref(), b"\xff\xd8AA\xff\xd9");
/// ```
#[derive(Debug, Default)]
pub struct FrameExtractor {
    scanner: JpegScanner,
    cursor: BytesMut,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return an iterator over every frame now complete.
    ///
    /// The iterator is lazy: frames not pulled before it is dropped stay
    /// buffered and come out of the next `feed` call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.cursor.extend_from_slice(chunk);
        Frames { extractor: self }
    }

    /// Bytes buffered without forming a complete frame yet.
    pub fn pending(&self) -> usize {
        self.cursor.len()
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.scanner.next_sequence()
    }

    /// Drop all buffered bytes. Sequence numbering continues.
    pub fn clear(&mut self) {
        self.cursor.clear();
        self.scanner.reset_scan();
    }
}

/// Frames produced by one [`FrameExtractor::feed`] call.
pub struct Frames<'a> {
    extractor: &'a mut FrameExtractor,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let FrameExtractor { scanner, cursor } = &mut *self.extractor;
        scanner.extract(cursor)
    }
}

// ── Tests ────────────────────────────────────────────────────────
