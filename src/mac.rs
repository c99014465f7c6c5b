//! MAC frame encapsulation and decapsulation
//!
//! Ranging messages travel in a compact IEEE 802.15.4 data frame: a
//! fixed 9-byte header, the payload, and a 2-byte checksum slot. The
//! frame control field is pinned to "data frame, 16-bit addressing,
//! PAN ID compression", so a single PAN id field is shared by source
//! and destination.
//!
//! Both codec operations work in place in a caller-supplied buffer.
//! [`encapsulate`] moves the payload up to make room for the header,
//! [`decapsulate`] compacts the payload back down to the buffer start.
//! Header fields are little-endian on the wire; timestamps inside
//! payloads are big-endian (see [`crate::time`]).

use byte::{check_len, ctx::LE, BytesExt, TryRead, TryWrite};

pub use ieee802154::mac::{PanId, ShortAddress};

/// Length of the MAC header, in bytes
pub const HEADER_LEN: usize = 9;

/// Length of the checksum slot at the end of each frame, in bytes
pub const FCS_LEN: usize = 2;

/// The 16-bit short address reserved for broadcast frames
pub const BROADCAST_ADDRESS: ShortAddress = ShortAddress(0xffff);

/// Frame control bytes: data frame, 16-bit addresses, PAN ID compression
const FRAME_CONTROL: [u8; 2] = [0x41, 0x88];

/// Total length of a frame wrapping a payload of the given length
pub const fn frame_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len + FCS_LEN
}

/// The decoded fields of a MAC frame header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// The sequence number assigned by the frame's originator
    pub seq: u8,

    /// The PAN id shared by source and destination
    pub pan_id: PanId,

    /// The destination short address
    pub destination: ShortAddress,

    /// The source short address
    pub source: ShortAddress,
}

impl TryWrite for Header {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        check_len(bytes, HEADER_LEN)?;

        let offset = &mut 0;
        bytes.write_with(offset, FRAME_CONTROL[0], LE)?;
        bytes.write_with(offset, FRAME_CONTROL[1], LE)?;
        bytes.write_with(offset, self.seq, LE)?;
        bytes.write_with(offset, self.pan_id.0, LE)?;
        bytes.write_with(offset, self.destination.0, LE)?;
        bytes.write_with(offset, self.source.0, LE)?;

        Ok(*offset)
    }
}

impl<'a> TryRead<'a> for Header {
    fn try_read(bytes: &'a [u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        check_len(bytes, HEADER_LEN)?;

        let offset = &mut 0;
        let frame_control = [
            bytes.read_with::<u8>(offset, LE)?,
            bytes.read_with::<u8>(offset, LE)?,
        ];
        if frame_control != FRAME_CONTROL {
            return Err(byte::Error::BadInput {
                err: "unsupported frame control",
            });
        }

        let header = Header {
            seq: bytes.read_with(offset, LE)?,
            pan_id: PanId(bytes.read_with(offset, LE)?),
            destination: ShortAddress(bytes.read_with(offset, LE)?),
            source: ShortAddress(bytes.read_with(offset, LE)?),
        };

        Ok((header, *offset))
    }
}

/// An error that can occur while encoding a frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// Buffer too small
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },
}

/// An error that can occur while decoding a frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The frame is too short to contain a header and checksum slot
    NotEnoughBytes,

    /// The frame control bytes don't match this codec's fixed mode
    InvalidFrameControl,
}

/// Wraps a payload in a MAC frame, in place
///
/// On entry, the first `payload_len` bytes of `buffer` hold the payload.
/// The payload is moved up to make room for the header, the header is
/// written in front of it, and the checksum slot is zero-filled. Returns
/// the total frame length.
///
/// Errors if `buffer` cannot hold header, payload and checksum slot.
pub fn encapsulate(
    header: &Header,
    buffer: &mut [u8],
    payload_len: usize,
) -> Result<usize, EncodeError> {
    encapsulate_with_fcs(header, buffer, payload_len, |_| [0x00, 0x00])
}

/// Wraps a payload in a MAC frame, computing the checksum slot
///
/// Like [`encapsulate`], but the two trailing bytes are produced by
/// `fcs`, called with the assembled header and payload bytes.
pub fn encapsulate_with_fcs<F>(
    header: &Header,
    buffer: &mut [u8],
    payload_len: usize,
    fcs: F,
) -> Result<usize, EncodeError>
where
    F: FnOnce(&[u8]) -> [u8; FCS_LEN],
{
    let required_len = frame_len(payload_len);
    if buffer.len() < required_len {
        return Err(EncodeError::BufferTooSmall { required_len });
    }

    buffer.copy_within(..payload_len, HEADER_LEN);

    // The length check above guarantees the header fits.
    buffer
        .write(&mut 0, *header)
        .map_err(|_| EncodeError::BufferTooSmall { required_len })?;

    let fcs_offset = HEADER_LEN + payload_len;
    let checksum = fcs(&buffer[..fcs_offset]);
    buffer[fcs_offset..required_len].copy_from_slice(&checksum);

    Ok(required_len)
}

/// Unwraps a MAC frame, in place
///
/// Reads the header fields, then compacts the payload down to the start
/// of `buffer`, discarding header and checksum slot. Returns the decoded
/// header and the payload length. Never reads past `frame_len`.
pub fn decapsulate(buffer: &mut [u8], frame_len: usize) -> Result<(Header, usize), DecodeError> {
    if buffer.len() < frame_len || frame_len < HEADER_LEN + FCS_LEN {
        return Err(DecodeError::NotEnoughBytes);
    }

    let header = buffer[..frame_len]
        .read::<Header>(&mut 0)
        .map_err(|err| match err {
            byte::Error::BadInput { .. } => DecodeError::InvalidFrameControl,
            _ => DecodeError::NotEnoughBytes,
        })?;

    let payload_len = frame_len - HEADER_LEN - FCS_LEN;
    buffer.copy_within(HEADER_LEN..HEADER_LEN + payload_len, 0);

    Ok((header, payload_len))
}
