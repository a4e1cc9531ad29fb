//! Message authentication ([RFC 4253 section 6.4], [RFC 6668]).
//!
//! [RFC 4253 section 6.4]: https://datatracker.ietf.org/doc/html/rfc4253#section-6.4
//! [RFC 6668]: https://datatracker.ietf.org/doc/html/rfc6668

use digest::{InvalidLength, Mac};
use hmac::Hmac as HmacCore;
use sha2::{Sha256, Sha512};

/// The names of all supported MAC algorithms.
pub const MAC_NAMES: &'static [&'static str] =
    &[HmacSha256::NAME, HmacSha512::NAME, Identity::NAME];

/// A MAC for one direction.
pub trait Hmac {
    fn name(&self) -> &'static str;

    fn mac_len(&self) -> usize;

    /// Compute `MAC(key, sequence_number || packet)` into `out[..mac_len]`.
    fn sign(&self, sequence_number: u32, packet: &[u8], out: &mut [u8]);
}

/// No MAC at all, used before the first key exchange completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Identity {
    pub const NAME: &'static str = "none";
}

impl Hmac for Identity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn mac_len(&self) -> usize {
        0
    }

    fn sign(&self, _: u32, _: &[u8], _: &mut [u8]) {}
}

macro_rules! hmac_sha2 {
    ($name:ident, $digest:ty, $len:literal, $ssh:literal) => {
        pub struct $name(HmacCore<$digest>);

        impl $name {
            pub const NAME: &'static str = $ssh;

            pub fn new(key: &[u8]) -> Result<Self, InvalidLength> {
                HmacCore::<$digest>::new_from_slice(key).map(Self)
            }
        }

        impl Hmac for $name {
            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn mac_len(&self) -> usize {
                $len
            }

            fn sign(&self, sequence_number: u32, packet: &[u8], out: &mut [u8]) {
                let mut mac = self.0.clone();
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                out[..$len].copy_from_slice(&mac.finalize().into_bytes());
            }
        }
    };
}

hmac_sha2!(HmacSha256, Sha256, 32, "hmac-sha2-256");
hmac_sha2!(HmacSha512, Sha512, 64, "hmac-sha2-512");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequence_number_is_covered() {
        let mac = HmacSha256::new(b"key").unwrap();
        let (mut a, mut b) = ([0; 32], [0; 32]);
        mac.sign(0, b"packet", &mut a);
        mac.sign(1, b"packet", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn rfc4231_case_2() {
        // HMAC-SHA-256 with key "Jefe" over "what do ya want for nothing?"; the first four
        // bytes of the message double as the sequence number.
        let mac = HmacSha256::new(b"Jefe").unwrap();
        let mut out = [0; 32];
        mac.sign(
            u32::from_be_bytes(*b"what"),
            b" do ya want for nothing?",
            &mut out,
        );
        assert_eq!(
            out[..8],
            [0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e]
        );
    }

    #[test]
    fn identity_is_empty() {
        assert_eq!(Identity.mac_len(), 0);
    }
}
