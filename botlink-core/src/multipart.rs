//! MJPEG-over-HTTP push format for re-publishing frames.
//!
//! Each frame becomes one part of a `multipart/x-mixed-replace` body:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::frame::Frame;

/// Boundary string separating parts.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the whole response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Encodes frames as multipart parts.
#[derive(Debug, Default, Clone, Copy)]
pub struct MjpegPartEncoder;

impl Encoder<Frame> for MjpegPartEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(PART_HEADER.len() + item.len() + 2);
        dst.put_slice(PART_HEADER);
        dst.put_slice(item.data());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Encode a single frame into a standalone part.
pub fn encode_part(frame: &Frame) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(PART_HEADER.len() + frame.len() + 2);
    MjpegPartEncoder.encode(frame.clone(), &mut buf)?;
    Ok(buf.freeze())
}
