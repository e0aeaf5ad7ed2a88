//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], rejecting
//!   malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! Encoding is deterministic: the same packet always produces the same bytes,
//! so retransmissions are byte-identical and checksums reproducible.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                           Packet ID                           +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |        Payload Length         |   Checksum    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               +
//! |    (cont.)    |                Payload ...                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 13 bytes.
//! id(8) + kind(1) + payload_len(2) + checksum(2)
//!
//! # Corruption handling
//!
//! [`Packet::decode`] performs two independent checks and both must pass:
//! structural validity (header present, known kind byte, length field
//! consistent, ACKs payload-free) and checksum validity (RFC 1071 Internet
//! checksum recomputed over the datagram with the checksum field zeroed).
//! Callers on the receive path treat any failure as loss: discard silently
//! and let the sender's timeout recover the data.  There is no NAK.

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 13;

/// Largest payload one packet can carry: the 65,507-byte UDP maximum minus
/// the header.  Also keeps the 16-bit `payload_len` field representable, so
/// encoding never wraps.
pub const MAX_PAYLOAD: usize = 65_507 - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_ID: usize = 0;
const OFF_KIND: usize = 8;
const OFF_PAYLOAD_LEN: usize = 9;
const OFF_CHECKSUM: usize = 11;

/// Discriminates the two packet roles on the wire.
///
/// The numeric values are the on-wire encoding of the kind byte; any other
/// byte value fails structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Carries application payload; acknowledged individually by id.
    Data = 0,
    /// Acknowledges the DATA packet with the same id.  Never carries payload.
    Ack = 1,
}

impl PacketKind {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PacketKind::Data),
            1 => Some(PacketKind::Ack),
            _ => None,
        }
    }
}

/// A complete protocol datagram.
///
/// `id` is assigned monotonically by the sender, one per submitted message,
/// and is never reused within a session — a late ack therefore always
/// unambiguously names the packet it acknowledges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u64,
    pub kind: PacketKind,
    /// Application bytes; empty for ACK packets.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a DATA packet carrying `payload`.
    pub fn data(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            kind: PacketKind::Data,
            payload,
        }
    }

    /// Build the ACK for the DATA packet with the given `id`.
    pub fn ack(id: u64) -> Self {
        Self {
            id,
            kind: PacketKind::Ack,
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The checksum field is computed here over the finished datagram; a
    /// caller-visible `Packet` never stores it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_ID..OFF_ID + 8].copy_from_slice(&self.id.to_be_bytes());
        buf[OFF_KIND] = self.kind as u8;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        // Checksum field stays zero while the checksum is computed.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the kind byte is not a known [`PacketKind`],
    /// - the `payload_len` field disagrees with `buf.len()`,
    /// - an ACK claims a non-empty payload, or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        // ── Check 1: structural validity ──
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated);
        }

        let id = u64::from_be_bytes(buf[OFF_ID..OFF_ID + 8].try_into().unwrap());
        let kind =
            PacketKind::from_wire(buf[OFF_KIND]).ok_or(PacketError::UnknownKind(buf[OFF_KIND]))?;
        let payload_len = u16::from_be_bytes(
            buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2].try_into().unwrap(),
        );
        let checksum =
            u16::from_be_bytes(buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].try_into().unwrap());

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }
        if kind == PacketKind::Ack && payload_len != 0 {
            return Err(PacketError::AckWithPayload);
        }

        // ── Check 2: checksum validity ──
        // Zero the stored field, recompute, compare.
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumMismatch);
        }

        Ok(Packet {
            id,
            kind,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
///
/// The first four variants are structural failures;
/// [`ChecksumMismatch`](PacketError::ChecksumMismatch) means the datagram
/// parsed but its bits were damaged in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    Truncated,
    /// The kind byte does not name a known [`PacketKind`].
    UnknownKind(u8),
    /// `payload_len` field does not match the actual remaining bytes.
    LengthMismatch,
    /// An ACK packet declared a non-empty payload.
    AckWithPayload,
    /// Checksum did not match the recomputed value.
    ChecksumMismatch,
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::Truncated => write!(f, "datagram too short to contain a header"),
            PacketError::UnknownKind(b) => write!(f, "unknown packet kind byte {b:#04x}"),
            PacketError::LengthMismatch => {
                write!(f, "payload_len field does not match remaining bytes")
            }
            PacketError::AckWithPayload => write!(f, "ACK packet carries a payload"),
            PacketError::ChecksumMismatch => write!(f, "checksum verification failed"),
        }
    }
}

impl std::error::Error for PacketError {}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carries, return the
/// one's-complement.  Any checksum field within `data` must already be zero.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    // Odd trailing byte is padded with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold the 32-bit sum into 16 bits.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
