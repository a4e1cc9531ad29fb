//! Per-direction protocol state: the active algorithms, the sequence number and the
//! counters that decide when to rekey.

use crate::error::{Error, FramingError, Result};
use bytes::{Bytes, BytesMut};
use core::fmt;
use evssh_core::{
    cipher::{self, Cipher},
    compression::{self, Compression},
    mac::{self, Hmac},
    packet::{BlockSize, Packet},
};
use rand::{CryptoRng, RngCore};
use std::borrow::Cow;
use subtle::ConstantTimeEq;

/// The algorithms protecting one direction.
pub struct Algorithms {
    pub cipher: Box<dyn Cipher>,
    pub hmac: Box<dyn Hmac>,
    pub compression: Box<dyn Compression>,
}

impl Algorithms {
    pub fn new(
        cipher: impl Cipher + 'static,
        hmac: impl Hmac + 'static,
        compression: impl Compression + 'static,
    ) -> Self {
        Self { cipher: Box::new(cipher), hmac: Box::new(hmac), compression: Box::new(compression) }
    }

    /// What a connection starts with: no encryption, no MAC, no compression.
    pub fn none() -> Self {
        Self::new(cipher::Identity, mac::Identity, compression::Identity)
    }
}

impl Default for Algorithms {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Algorithms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Algorithms")
            .field("cipher", &self.cipher.name())
            .field("hmac", &self.hmac.name())
            .field("compression", &self.compression.name())
            .finish()
    }
}

/// Rekey once either limit is exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RekeyLimits {
    pub bytes: u64,
    pub packets: u64,
}

impl Default for RekeyLimits {
    fn default() -> Self {
        Self { bytes: 1 << 30, packets: 1 << 31 }
    }
}

/// Traffic since the last key exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub blocks: u64,
    pub bytes: u64,
}

pub struct DirectionState {
    algorithms: Algorithms,
    sequence_number: u32,
    counters: Counters,
    limits: RekeyLimits,
    authenticated: bool,
    /// `packet_length` of a packet whose first block is already decrypted.
    partial: Option<usize>,
}

impl DirectionState {
    pub fn new(limits: RekeyLimits) -> Self {
        Self {
            algorithms: Algorithms::none(),
            sequence_number: 0,
            counters: Counters::default(),
            limits,
            authenticated: false,
            partial: None,
        }
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn algorithms(&self) -> &Algorithms {
        &self.algorithms
    }

    pub fn block_size(&self) -> BlockSize {
        self.algorithms.cipher.block_size()
    }

    pub fn mac_len(&self) -> usize {
        self.algorithms.hmac.mac_len()
    }

    pub fn needs_rekey(&self) -> bool {
        self.counters.bytes > self.limits.bytes || self.counters.packets > self.limits.packets
    }

    /// Replace all algorithms and reset the counters.
    ///
    /// The sequence number carries on.
    pub fn install(&mut self, algorithms: Algorithms) {
        self.algorithms = algorithms;
        self.counters = Counters::default();
    }

    /// Drop the key material.
    pub fn cleanup(&mut self) {
        self.algorithms = Algorithms::none();
        self.partial = None;
    }

    /// Lets delayed compression kick in.
    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    fn compression_active(&self) -> bool {
        self.authenticated || !self.algorithms.compression.is_delayed()
    }

    fn count(&mut self, packet_len: usize, block_size: usize) {
        let total = 4 + packet_len + self.mac_len();
        self.counters.packets += 1;
        self.counters.blocks += ((4 + packet_len) / block_size) as u64;
        self.counters.bytes += total as u64;
        self.sequence_number = self.sequence_number.wrapping_add(1);
    }

    /// Frame, authenticate and encrypt a payload.
    pub fn encode<R>(&mut self, payload: &[u8], rng: R) -> Result<Vec<u8>>
    where
        R: CryptoRng + RngCore,
    {
        let payload = if self.compression_active() {
            self.algorithms.compression.compress(payload)
        } else {
            Cow::Borrowed(payload)
        };
        let bs = self.block_size();
        let mac_len = self.mac_len();
        let len = Packet::max_len(payload.len(), bs);
        if u32::try_from(len - 4).is_err() {
            return Err(FramingError::PayloadTooLarge(payload.len()).into());
        }

        let mut buf = vec![0; len + mac_len];
        let pkt = Packet::wrap(
            &mut buf,
            bs,
            |b| {
                b[..payload.len()].copy_from_slice(&payload);
                payload.len()
            },
            rng,
        );
        let packet_len = pkt.packet_len();
        let (data, mac) = pkt.into_raw(mac_len).split_at_mut(len);
        self.algorithms.hmac.sign(self.sequence_number, data, mac);
        self.algorithms.cipher.encrypt(data);
        self.count(packet_len, bs.to_usize());
        Ok(buf)
    }

    /// Take one packet off the front of `input`.
    ///
    /// Returns `None` if `input` does not hold a complete packet yet. Decrypted bytes stay
    /// in `input` until the rest of the packet arrives, so the same buffer must be passed
    /// on the next call.
    pub fn decode(&mut self, input: &mut BytesMut, max_packet_length: usize) -> Result<Option<Bytes>> {
        let bs = self.block_size().to_usize();
        let first = bs.max(4);
        let packet_len = match self.partial {
            Some(l) => l,
            None => {
                if input.len() < first {
                    return Ok(None);
                }
                self.algorithms.cipher.decrypt(&mut input[..first]);
                let mut l = [0; 4];
                l.copy_from_slice(&input[..4]);
                let l = u32::from_be_bytes(l) as usize;
                self.partial = Some(l);
                l
            }
        };

        if packet_len > max_packet_length {
            return Err(FramingError::TooLarge(packet_len).into());
        }
        let need = packet_len as i64 + 4 - first as i64;
        if need < 0 || need % bs as i64 != 0 {
            return Err(FramingError::Padding { need, block_size: bs }.into());
        }
        let mac_len = self.mac_len();
        let total = first + need as usize + mac_len;
        if input.len() < total {
            return Ok(None);
        }

        let mut raw = input.split_to(total);
        self.partial = None;
        let (data, mac) = raw.split_at_mut(4 + packet_len);
        self.algorithms.cipher.decrypt(&mut data[first..]);

        let mut expected = vec![0; mac_len];
        self.algorithms.hmac.sign(self.sequence_number, data, &mut expected);
        if !bool::from(expected[..].ct_eq(mac)) {
            return Err(Error::Integrity);
        }

        let pkt = Packet::wrap_raw(data, self.block_size()).map_err(FramingError::Invalid)?;
        let payload = if self.compression_active() {
            self.algorithms
                .compression
                .decompress(pkt.payload())
                .map_err(|_| Error::Compression)?
        } else {
            Cow::Borrowed(pkt.payload())
        };
        let payload = Bytes::copy_from_slice(&payload);
        self.count(packet_len, bs);
        Ok(Some(payload))
    }
}

impl fmt::Debug for DirectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionState")
            .field("algorithms", &self.algorithms)
            .field("sequence_number", &self.sequence_number)
            .field("counters", &self.counters)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use evssh_core::{cipher::Aes128Ctr, mac::HmacSha256};
    use rand::{rngs::StdRng, SeedableRng};

    fn aes() -> Algorithms {
        Algorithms::new(
            Aes128Ctr::new(&[1; 16], &[2; 16]),
            HmacSha256::new(&[3; 32]).unwrap(),
            compression::Identity,
        )
    }

    fn pair(algorithms: fn() -> Algorithms) -> (DirectionState, DirectionState) {
        let mut tx = DirectionState::new(RekeyLimits::default());
        let mut rx = DirectionState::new(RekeyLimits::default());
        tx.install(algorithms());
        rx.install(algorithms());
        (tx, rx)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn roundtrip() {
        for algorithms in [Algorithms::none as fn() -> Algorithms, aes] {
            let (mut tx, mut rx) = pair(algorithms);
            let mut input = BytesMut::new();
            for payload in [&b"\x05abc"[..], &[94; 300][..], &[2][..]] {
                input.extend_from_slice(&tx.encode(payload, rng()).unwrap());
            }
            assert_eq!(tx.sequence_number(), 3);
            assert_eq!(rx.decode(&mut input, 1 << 16).unwrap().unwrap(), &b"\x05abc"[..]);
            assert_eq!(rx.decode(&mut input, 1 << 16).unwrap().unwrap(), &[94; 300][..]);
            assert_eq!(rx.decode(&mut input, 1 << 16).unwrap().unwrap(), &[2][..]);
            assert!(rx.decode(&mut input, 1 << 16).unwrap().is_none());
            assert_eq!(rx.sequence_number(), 3);
            assert_eq!(rx.counters(), tx.counters());
        }
    }

    #[test]
    fn byte_by_byte() {
        let (mut tx, mut rx) = pair(aes);
        let frame = tx.encode(b"\x5ehello world", rng()).unwrap();
        let mut input = BytesMut::new();
        for (i, b) in frame.iter().enumerate() {
            input.extend_from_slice(&[*b]);
            let r = rx.decode(&mut input, 1 << 16).unwrap();
            assert_eq!(r.is_some(), i == frame.len() - 1);
            if let Some(p) = r {
                assert_eq!(p, &b"\x5ehello world"[..]);
            }
        }
        assert!(input.is_empty());
    }

    #[test]
    fn tampered_payload() {
        let (mut tx, mut rx) = pair(aes);
        let mut frame = tx.encode(b"\x5e some data to protect", rng()).unwrap();
        frame[10] ^= 1;
        let mut input = BytesMut::from(&frame[..]);
        assert!(matches!(rx.decode(&mut input, 1 << 16), Err(Error::Integrity)));
    }

    #[test]
    fn padding_error() {
        let mut rx = DirectionState::new(RekeyLimits::default());
        let mut input = BytesMut::from(&[0, 0, 0, 13, 4, 5, 6, 7][..]);
        let e = rx.decode(&mut input, 1 << 16).unwrap_err();
        assert!(matches!(e, Error::Framing(FramingError::Padding { need: 9, block_size: 8 })));
    }

    #[test]
    fn too_large() {
        let mut rx = DirectionState::new(RekeyLimits::default());
        let mut input = BytesMut::from(&[0, 0, 1, 4, 4, 5, 6, 7][..]);
        let e = rx.decode(&mut input, 256).unwrap_err();
        assert!(matches!(e, Error::Framing(FramingError::TooLarge(260))));
    }

    #[test]
    fn rekey_threshold() {
        let mut tx = DirectionState::new(RekeyLimits { bytes: 1 << 20, packets: 2 });
        for _ in 0..2 {
            tx.encode(&[94], rng()).unwrap();
        }
        assert!(!tx.needs_rekey());
        tx.encode(&[94], rng()).unwrap();
        assert!(tx.needs_rekey());
        // 16 bytes each, i.e. two 8 byte blocks.
        assert_eq!(tx.counters(), Counters { packets: 3, blocks: 6, bytes: 48 });
        tx.install(Algorithms::none());
        assert!(!tx.needs_rekey());
        assert_eq!(tx.counters(), Counters::default());
        assert_eq!(tx.sequence_number(), 3);
    }

    #[test]
    fn sequence_wraps() {
        let (mut tx, mut rx) = pair(aes);
        tx.sequence_number = u32::MAX;
        rx.sequence_number = u32::MAX;
        let mut input = BytesMut::from(&tx.encode(&[94], rng()).unwrap()[..]);
        assert!(rx.decode(&mut input, 1 << 16).unwrap().is_some());
        assert_eq!(tx.sequence_number(), 0);
        assert_eq!(rx.sequence_number(), 0);
    }
}
