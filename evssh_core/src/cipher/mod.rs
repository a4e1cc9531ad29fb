mod aes_ctr;

use crate::packet::BlockSize;
pub use aes_ctr::{Aes128Ctr, Aes256Ctr};

/// The names of all supported ciphers.
pub const CIPHER_NAMES: &'static [&'static str] = &[Aes128Ctr::NAME, Aes256Ctr::NAME, Identity::NAME];

/// A stateful cipher for one direction.
///
/// Data is always handed over in multiples of [`Cipher::block_size`] and in stream order:
/// the first block of a packet is decrypted on its own to learn the length, the rest later.
pub trait Cipher {
	fn name(&self) -> &'static str;

	fn encrypt(&mut self, data: &mut [u8]);

	fn decrypt(&mut self, data: &mut [u8]);

	fn block_size(&self) -> BlockSize;
}

/// The identity cipher used before the first key exchange completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Identity {
	pub const NAME: &'static str = "none";
}

impl Cipher for Identity {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn encrypt(&mut self, _: &mut [u8]) {}

	fn decrypt(&mut self, _: &mut [u8]) {}

	fn block_size(&self) -> BlockSize {
		BlockSize::B8
	}
}
