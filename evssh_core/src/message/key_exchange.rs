//! Algorithm negotiation ([RFC 4253 section 7]).
//!
//! [RFC 4253 section 7]: https://datatracker.ietf.org/doc/html/rfc4253#section-7

use super::MessageParseError;
use crate::data::{NameList, Reader, Writer};

/// `SSH_MSG_KEXINIT`. Directional lists are indexed client to server first.
pub struct KeyExchangeInit<'a> {
    pub cookie: &'a [u8; 16],
    pub kex: NameList<'a>,
    pub host_key: NameList<'a>,
    pub encryption: [NameList<'a>; 2],
    pub mac: [NameList<'a>; 2],
    pub compression: [NameList<'a>; 2],
    pub languages: [NameList<'a>; 2],
    pub first_kex_packet_follows: bool,
}

impl<'a> KeyExchangeInit<'a> {
    pub(super) fn read(r: &mut Reader<'a>) -> Result<Self, MessageParseError> {
        let ty = super::Message::KEXINIT;
        let cookie = r.array().ok_or(MessageParseError::Truncated(ty))?;
        let mut list = || -> Result<NameList<'a>, MessageParseError> {
            r.name_list()
                .ok_or(MessageParseError::Truncated(ty))?
                .map_err(MessageParseError::InvalidNameList)
        };
        let kex = list()?;
        let host_key = list()?;
        let encryption = [list()?, list()?];
        let mac = [list()?, list()?];
        let compression = [list()?, list()?];
        let languages = [list()?, list()?];
        let first_kex_packet_follows = r.bool().ok_or(MessageParseError::Truncated(ty))?;
        if r.u32().ok_or(MessageParseError::Truncated(ty))? != 0 {
            return Err(MessageParseError::Reserved);
        }
        Ok(Self {
            cookie,
            kex,
            host_key,
            encryption,
            mac,
            compression,
            languages,
            first_kex_packet_follows,
        })
    }

    pub(super) fn write(&self, w: &mut Writer<'_>) -> Option<()> {
        w.bytes(self.cookie)?;
        w.string(self.kex.as_str().as_bytes())?;
        w.string(self.host_key.as_str().as_bytes())?;
        for l in [&self.encryption, &self.mac, &self.compression, &self.languages] {
            w.string(l[0].as_str().as_bytes())?;
            w.string(l[1].as_str().as_bytes())?;
        }
        w.bool(self.first_kex_packet_follows)?;
        // reserved
        w.u32(0)
    }
}

/// `SSH_MSG_NEWKEYS`, which has no body.
pub struct NewKeys;

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Message;

    #[test]
    fn kexinit_keeps_reserved_field() {
        let mut buf = [0; 512];
        let cookie = [0x42; 16];
        let aes = b"aes128-ctr".try_into().unwrap();
        let sha = b"hmac-sha2-256".try_into().unwrap();
        let none = b"none".try_into().unwrap();
        let msg = Message::KeyExchangeInit(KeyExchangeInit {
            cookie: &cookie,
            kex: b"curve25519-sha256".try_into().unwrap(),
            host_key: b"ssh-ed25519".try_into().unwrap(),
            encryption: [aes, aes],
            mac: [sha, sha],
            compression: [none, none],
            languages: Default::default(),
            first_kex_packet_follows: false,
        });
        let l = msg.serialize(&mut buf).unwrap().0.len();
        assert_eq!(&buf[l - 5..l], &[0; 5]);
        let kex = Message::parse(&buf[..l]).unwrap().into_kex_init().unwrap();
        assert_eq!(kex.cookie, &cookie);
        assert_eq!(kex.kex.iter().next(), Some("curve25519-sha256"));
        assert_eq!(kex.mac[1].as_str(), "hmac-sha2-256");
        assert_eq!(kex.languages[1].iter().next(), None);
    }

    #[test]
    fn kexinit_reserved_must_be_zero() {
        let mut data = vec![Message::KEXINIT];
        data.extend_from_slice(&[0; 16]);
        data.extend_from_slice(&[0; 4 * 10]);
        data.extend_from_slice(&[0, 0, 0, 0, 1]);
        assert!(matches!(Message::parse(&data), Err(MessageParseError::Reserved)));
        let l = data.len();
        data[l - 1] = 0;
        assert!(Message::parse(&data).is_ok());
    }

    #[test]
    fn new_keys_has_no_body() {
        assert!(Message::parse(&[Message::NEWKEYS]).unwrap().into_new_keys().is_some());
        assert!(matches!(
            Message::parse(&[Message::NEWKEYS, 0]),
            Err(MessageParseError::Unread(Message::NEWKEYS))
        ));
    }
}
