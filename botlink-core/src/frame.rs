//! The unit of video that flows from the extractor to every viewer.

use std::time::SystemTime;

use bytes::Bytes;

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete encoded image cut out of the upstream byte stream.
///
/// The payload is a reference-counted [`Bytes`], so cloning a frame for
/// each subscriber never copies image data. Frames are immutable once
/// built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sequence: u64,
    captured_at: SystemTime,
    data: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self {
            sequence,
            captured_at: SystemTime::now(),
            data,
        }
    }

    /// Monotonically increasing per extractor, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Raw JPEG bytes, SOI and EOI included.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cheap structural check standing in for a full decode.
    ///
    /// A real JPEG has a segment marker (`FF xx`) straight after SOI and
    /// ends with EOI. Anything else is treated as a corrupt frame.
    pub fn is_well_formed(&self) -> bool {
        let d = &self.data[..];
        d.len() >= 6 && d[..2] == SOI && d[2] == 0xFF && d[d.len() - 2..] == EOI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_requires_segment_marker() {
        let ok = Frame::new(0, Bytes::from_static(b"\xff\xd8\xff\xe0\x00\xff\xd9"));
        assert!(ok.is_well_formed());

        let bare = Frame::new(1, Bytes::from_static(b"\xff\xd8AAA\xff\xd9"));
        assert!(!bare.is_well_formed());

        let tiny = Frame::new(2, Bytes::from_static(b"\xff\xd8\xff\xd9"));
        assert!(!tiny.is_well_formed());
    }
}
