//! `aes128-ctr` and `aes256-ctr` as described in [RFC 4344 section 4].
//!
//! [RFC 4344 section 4]: https://datatracker.ietf.org/doc/html/rfc4344#section-4

use super::{BlockSize, Cipher};
use aes::{
    cipher::{KeyIvInit, StreamCipher},
    Aes128, Aes256,
};

type Ctr<C> = ctr::Ctr128BE<C>;

macro_rules! aes_ctr {
    ($name:ident, $aes:ty, $key:literal, $ssh:literal) => {
        pub struct $name(Ctr<$aes>);

        impl $name {
            pub const NAME: &'static str = $ssh;

            pub fn new(key: &[u8; $key], iv: &[u8; 16]) -> Self {
                Self(Ctr::<$aes>::new(key.into(), iv.into()))
            }
        }

        impl Cipher for $name {
            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn encrypt(&mut self, data: &mut [u8]) {
                self.0.apply_keystream(data);
            }

            fn decrypt(&mut self, data: &mut [u8]) {
                self.0.apply_keystream(data);
            }

            fn block_size(&self) -> BlockSize {
                BlockSize::B16
            }
        }
    };
}

aes_ctr!(Aes128Ctr, Aes128, 16, "aes128-ctr");
aes_ctr!(Aes256Ctr, Aes256, 32, "aes256-ctr");
