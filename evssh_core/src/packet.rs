//! Binary packet layout ([RFC 4253 section 6]).
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload; n1 = packet_length - padding_length - 1
//! byte[n2]  random padding; n2 = padding_length
//! byte[m]   mac
//! ```
//!
//! [RFC 4253 section 6]: https://datatracker.ietf.org/doc/html/rfc4253#section-6

use rand::{CryptoRng, RngCore};

/// Padding is never shorter than this.
pub const MIN_PADDING_LEN: usize = 4;
/// Smallest total packet size, length field included.
pub const MIN_PACKET_LEN: usize = 16;

pub struct Packet<'a> {
    data: &'a mut [u8],
}

impl<'a> Packet<'a> {
    pub fn packet_len(&self) -> usize {
        read_u32(self.data) as usize
    }

    pub fn padding_len(&self) -> usize {
        self.data[4].into()
    }

    pub fn payload_len(&self) -> usize {
        self.packet_len() - self.padding_len() - 1
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[5..5 + self.payload_len()]
    }

    pub fn padding(&self) -> &[u8] {
        &self.data[5 + self.payload_len()..4 + self.packet_len()]
    }

    /// The packet as it is fed to the MAC and the cipher, i.e. without the MAC itself.
    pub fn as_raw(&self) -> &[u8] {
        &self.data[..4 + self.packet_len()]
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        let l = self.packet_len();
        &mut self.data[..4 + l]
    }

    pub fn into_raw(self, with_extra: usize) -> &'a mut [u8] {
        let l = self.packet_len();
        &mut self.data[..4 + l + with_extra]
    }

    /// Validate a fully decrypted packet.
    pub fn wrap_raw(data: &'a mut [u8], block_size: BlockSize) -> Result<Self, WrapRawError> {
        if data.len() < 5 {
            return Err(WrapRawError::Truncated);
        }
        let slf = Self { data };
        if slf.data.len() < 4 + slf.packet_len() {
            Err(WrapRawError::Truncated)
        } else if (slf.packet_len() + 4) % block_size.to_usize() != 0 {
            Err(WrapRawError::BadAlignment)
        } else if slf.padding_len() >= slf.packet_len() {
            Err(WrapRawError::PaddingTooLarge)
        } else if slf.payload_len() == 0 {
            Err(WrapRawError::EmptyPayload)
        } else {
            Ok(slf)
        }
    }

    /// Frame a payload written by `make_payload` in place.
    ///
    /// # Panics
    ///
    /// If `buf` is shorter than [`Packet::max_len`] for the produced payload.
    pub fn wrap<R, F>(buf: &'a mut [u8], block_size: BlockSize, make_payload: F, mut rng: R) -> Self
    where
        F: FnOnce(&mut [u8]) -> usize,
        R: CryptoRng + RngCore,
    {
        let payload_len = make_payload(&mut buf[4 + 1..]);
        let padding_len = Self::padding_for(payload_len, block_size);
        let packet_len = payload_len + padding_len + 1;
        buf[..4].copy_from_slice(&(packet_len as u32).to_be_bytes());
        // padding_len <= 64 + 3
        buf[4] = padding_len as u8;
        rng.fill_bytes(&mut buf[4 + 1 + payload_len..][..padding_len]);
        Self { data: buf }
    }

    /// The padding length for a payload of `payload_len` bytes.
    ///
    /// Always in `MIN_PADDING_LEN..=block_size + 3`.
    pub fn padding_for(payload_len: usize, block_size: BlockSize) -> usize {
        let block_size = block_size.to_usize();
        let unpadded = 4 + 1 + payload_len;
        let mut padding_len = block_size - unpadded % block_size;
        if padding_len < MIN_PADDING_LEN {
            padding_len += block_size;
        }
        if unpadded + padding_len < MIN_PACKET_LEN {
            padding_len += block_size;
        }
        padding_len
    }

    /// Total size of the framed packet, without MAC.
    pub fn max_len(payload_len: usize, block_size: BlockSize) -> usize {
        4 + 1 + payload_len + Self::padding_for(payload_len, block_size)
    }
}

fn read_u32(data: &[u8]) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&data[..4]);
    u32::from_be_bytes(b)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSize {
    B8,
    B16,
    B32,
    B64,
}

impl BlockSize {
    pub fn to_usize(self) -> usize {
        match self {
            BlockSize::B8 => 8,
            BlockSize::B16 => 16,
            BlockSize::B32 => 32,
            BlockSize::B64 => 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapRawError {
    Truncated,
    BadAlignment,
    PaddingTooLarge,
    EmptyPayload,
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const SIZES: [BlockSize; 4] = [BlockSize::B8, BlockSize::B16, BlockSize::B32, BlockSize::B64];

    #[test]
    fn padding_invariants() {
        for bs in SIZES {
            let b = bs.to_usize();
            for p in 1..600 {
                let pad = Packet::padding_for(p, bs);
                assert!((4..=b + 3).contains(&pad), "payload {} block {}", p, b);
                assert_eq!((4 + 1 + p + pad) % b, 0, "payload {} block {}", p, b);
                assert!(4 + 1 + p + pad >= MIN_PACKET_LEN);
            }
        }
    }

    #[test]
    fn two_byte_payload() {
        let mut buf = [0; 64];
        let pkt = Packet::wrap(
            &mut buf,
            BlockSize::B8,
            |b| {
                b[..2].copy_from_slice(&[21, 0]);
                2
            },
            StdRng::seed_from_u64(0),
        );
        assert_eq!(pkt.padding_len(), 9);
        assert_eq!(pkt.packet_len(), 12);
        assert!(pkt.packet_len() >= 11);
        assert_eq!(pkt.payload(), &[21, 0]);
        assert_eq!(pkt.as_raw().len(), 16);
    }

    #[test]
    fn wrap_then_validate() {
        let mut buf = [0; 128];
        let l = Packet::wrap(
            &mut buf,
            BlockSize::B16,
            |b| {
                b[..5].copy_from_slice(b"hello");
                5
            },
            StdRng::seed_from_u64(1),
        )
        .as_raw()
        .len();
        let pkt = Packet::wrap_raw(&mut buf[..l], BlockSize::B16).unwrap();
        assert_eq!(pkt.payload(), b"hello");
        assert_eq!(pkt.padding().len(), pkt.padding_len());
    }

    #[test]
    fn reject_misaligned() {
        let mut buf = [0, 0, 0, 11, 4, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(
            Packet::wrap_raw(&mut buf, BlockSize::B8).err(),
            Some(WrapRawError::BadAlignment)
        );
    }

    #[test]
    fn reject_padding_too_large() {
        let mut buf = [0; 16];
        buf[3] = 12;
        buf[4] = 12;
        assert_eq!(
            Packet::wrap_raw(&mut buf, BlockSize::B8).err(),
            Some(WrapRawError::PaddingTooLarge)
        );
    }

    #[test]
    fn reject_empty_payload() {
        let mut buf = [0; 16];
        buf[3] = 12;
        buf[4] = 11;
        assert_eq!(
            Packet::wrap_raw(&mut buf, BlockSize::B8).err(),
            Some(WrapRawError::EmptyPayload)
        );
    }

    #[test]
    fn reject_truncated() {
        let mut buf = [0, 0, 0, 12, 4, 1];
        assert_eq!(
            Packet::wrap_raw(&mut buf, BlockSize::B8).err(),
            Some(WrapRawError::Truncated)
        );
    }
}
