//! Payload compression ([RFC 4253 section 6.2]).
//!
//! [RFC 4253 section 6.2]: https://datatracker.ietf.org/doc/html/rfc4253#section-6.2

use alloc::borrow::Cow;

/// The names of all supported compression algorithms.
pub const COMPRESSION_NAMES: &'static [&'static str] = &[Identity::NAME];

pub trait Compression {
    fn name(&self) -> &'static str;

    fn compress<'a>(&mut self, payload: &'a [u8]) -> Cow<'a, [u8]>;

    fn decompress<'a>(&mut self, payload: &'a [u8]) -> Result<Cow<'a, [u8]>, Error>;

    /// Delayed algorithms (e.g. `zlib@openssh.com`) stay inactive until the user has
    /// authenticated.
    fn is_delayed(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Identity {
    pub const NAME: &'static str = "none";
}

impl Compression for Identity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compress<'a>(&mut self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(payload)
    }

    fn decompress<'a>(&mut self, payload: &'a [u8]) -> Result<Cow<'a, [u8]>, Error> {
        Ok(Cow::Borrowed(payload))
    }
}

/// The stream could not be decompressed.
#[derive(Debug)]
pub struct Error;
