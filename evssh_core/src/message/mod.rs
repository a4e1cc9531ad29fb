//! Transport layer messages ([RFC 4253 section 11], [RFC 4250 section 4.1]).
//!
//! Only the messages the transport itself acts upon are parsed here. Everything else is
//! handed to higher layers as an opaque payload.
//!
//! [RFC 4253 section 11]: https://datatracker.ietf.org/doc/html/rfc4253#section-11
//! [RFC 4250 section 4.1]: https://datatracker.ietf.org/doc/html/rfc4250#section-4.1

pub mod key_exchange;
mod service;

pub use key_exchange::{KeyExchangeInit, NewKeys};
pub use service::{ServiceAccept, ServiceRequest};

use crate::data::{InvalidNameList, Reader, Writer};
use core::ops::RangeInclusive;

pub enum Message<'a> {
    Disconnect(Disconnect<'a>),
    Ignore(Ignore<'a>),
    Unimplemented(Unimplemented),
    Debug(Debug<'a>),
    ServiceRequest(ServiceRequest<'a>),
    ServiceAccept(ServiceAccept<'a>),
    KeyExchangeInit(KeyExchangeInit<'a>),
    NewKeys(NewKeys),
}

impl<'a> Message<'a> {
    pub const DISCONNECT: u8 = 1;
    pub const IGNORE: u8 = 2;
    pub const UNIMPLEMENTED: u8 = 3;
    pub const DEBUG: u8 = 4;
    pub const SERVICE_REQUEST: u8 = 5;
    pub const SERVICE_ACCEPT: u8 = 6;

    pub const KEXINIT: u8 = 20;
    pub const NEWKEYS: u8 = 21;

    /// Transport layer generic messages.
    pub const TRANSPORT: RangeInclusive<u8> = 1..=19;
    /// Algorithm negotiation.
    pub const ALGORITHM_NEGOTIATION: RangeInclusive<u8> = 20..=29;
    /// Key exchange method specific, e.g. `SSH_MSG_KEX_ECDH_INIT`.
    pub const KEY_EXCHANGE_METHOD: RangeInclusive<u8> = 30..=49;

    /// Parse a whole payload, message type included.
    pub fn parse(data: &'a [u8]) -> Result<Self, MessageParseError> {
        let mut r = Reader::new(data);
        let ty = r.u8().ok_or(MessageParseError::Empty)?;
        let truncated = MessageParseError::Truncated(ty);
        let msg = match ty {
            Self::DISCONNECT => Self::Disconnect(Disconnect::read(&mut r).ok_or(truncated)?),
            Self::IGNORE => Self::Ignore(Ignore { data: r.string().ok_or(truncated)? }),
            Self::UNIMPLEMENTED => {
                Self::Unimplemented(Unimplemented { sequence_number: r.u32().ok_or(truncated)? })
            }
            Self::DEBUG => Self::Debug(Debug::read(&mut r)?),
            Self::SERVICE_REQUEST => {
                Self::ServiceRequest(ServiceRequest::read(&mut r).ok_or(truncated)?)
            }
            Self::SERVICE_ACCEPT => {
                Self::ServiceAccept(ServiceAccept::read(&mut r).ok_or(truncated)?)
            }
            Self::KEXINIT => Self::KeyExchangeInit(KeyExchangeInit::read(&mut r)?),
            Self::NEWKEYS => Self::NewKeys(NewKeys),
            ty => return Err(MessageParseError::Unknown(ty)),
        };
        if !r.is_empty() {
            return Err(MessageParseError::Unread(ty));
        }
        Ok(msg)
    }

    pub fn ty(&self) -> u8 {
        match self {
            Self::Disconnect(_) => Self::DISCONNECT,
            Self::Ignore(_) => Self::IGNORE,
            Self::Unimplemented(_) => Self::UNIMPLEMENTED,
            Self::Debug(_) => Self::DEBUG,
            Self::ServiceRequest(_) => Self::SERVICE_REQUEST,
            Self::ServiceAccept(_) => Self::SERVICE_ACCEPT,
            Self::KeyExchangeInit(_) => Self::KEXINIT,
            Self::NewKeys(_) => Self::NEWKEYS,
        }
    }

    /// Write the message to the start of `buf`, returning the written part and the rest.
    pub fn serialize<'s>(&self, buf: &'s mut [u8]) -> Option<(&'s mut [u8], &'s mut [u8])> {
        let mut w = Writer::new(buf);
        w.u8(self.ty())?;
        match self {
            Self::Disconnect(m) => m.write(&mut w)?,
            Self::Ignore(m) => w.string(m.data)?,
            Self::Unimplemented(m) => w.u32(m.sequence_number)?,
            Self::Debug(m) => m.write(&mut w)?,
            Self::ServiceRequest(m) => m.write(&mut w)?,
            Self::ServiceAccept(m) => m.write(&mut w)?,
            Self::KeyExchangeInit(m) => m.write(&mut w)?,
            Self::NewKeys(_) => {}
        }
        let n = w.len();
        Some(buf.split_at_mut(n))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageParseError {
    Empty,
    Unknown(u8),
    Truncated(u8),
    /// Bytes left after the message of the given type.
    Unread(u8),
    InvalidNameList(InvalidNameList),
    InvalidUtf8,
    /// The reserved field of `KEXINIT` is not zero.
    Reserved,
}

macro_rules! into {
    ($($v:ident $(<$l:lifetime>)? => $f:ident,)*) => {
        impl<'a> Message<'a> {
            $(
                pub fn $f(self) -> Option<$v $(<$l>)?> {
                    match self {
                        Self::$v(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

into! {
    Disconnect<'a> => into_disconnect,
    Ignore<'a> => into_ignore,
    Unimplemented => into_unimplemented,
    Debug<'a> => into_debug,
    ServiceRequest<'a> => into_service_request,
    ServiceAccept<'a> => into_service_accept,
    KeyExchangeInit<'a> => into_kex_init,
    NewKeys => into_new_keys,
}

pub struct Disconnect<'a> {
    pub reason: u32,
    pub description: &'a [u8],
    pub language: &'a [u8],
}

impl<'a> Disconnect<'a> {
    pub const PROTOCOL_ERROR: u32 = 2;
    pub const KEY_EXCHANGE_FAILED: u32 = 3;
    pub const MAC_ERROR: u32 = 5;
    pub const HOST_KEY_NOT_VERIFIABLE: u32 = 9;
    pub const BY_APPLICATION: u32 = 11;

    fn read(r: &mut Reader<'a>) -> Option<Self> {
        Some(Self { reason: r.u32()?, description: r.string()?, language: r.string()? })
    }

    fn write(&self, w: &mut Writer<'_>) -> Option<()> {
        w.u32(self.reason)?;
        w.string(self.description)?;
        w.string(self.language)
    }
}

pub struct Ignore<'a> {
    pub data: &'a [u8],
}

pub struct Unimplemented {
    pub sequence_number: u32,
}

pub struct Debug<'a> {
    pub always_display: bool,
    pub message: &'a str,
    pub language: &'a [u8],
}

impl<'a> Debug<'a> {
    fn read(r: &mut Reader<'a>) -> Result<Self, MessageParseError> {
        let truncated = MessageParseError::Truncated(Message::DEBUG);
        let always_display = r.bool().ok_or(truncated)?;
        let message = r.string().ok_or(truncated)?;
        let language = r.string().ok_or(truncated)?;
        let message = core::str::from_utf8(message).map_err(|_| MessageParseError::InvalidUtf8)?;
        Ok(Self { always_display, message, language })
    }

    fn write(&self, w: &mut Writer<'_>) -> Option<()> {
        w.bool(self.always_display)?;
        w.string(self.message.as_bytes())?;
        w.string(self.language)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write(msg: Message<'_>, buf: &mut [u8]) -> usize {
        msg.serialize(buf).unwrap().0.len()
    }

    #[test]
    fn disconnect() {
        let mut buf = [0; 64];
        let l = write(
            Message::Disconnect(Disconnect {
                reason: Disconnect::BY_APPLICATION,
                description: b"bye",
                language: b"",
            }),
            &mut buf,
        );
        assert_eq!(l, 1 + 4 + 4 + 3 + 4);
        let d = Message::parse(&buf[..l]).unwrap().into_disconnect().unwrap();
        assert_eq!(d.reason, 11);
        assert_eq!(d.description, b"bye");
    }

    #[test]
    fn debug_message() {
        let mut buf = [0; 64];
        let l = write(
            Message::Debug(Debug { always_display: true, message: "hi", language: b"en" }),
            &mut buf,
        );
        let d = Message::parse(&buf[..l]).unwrap().into_debug().unwrap();
        assert!(d.always_display);
        assert_eq!(d.message, "hi");
        assert!(matches!(
            Message::parse(&[Message::DEBUG, 0, 0, 0, 0, 1, 0xff, 0, 0, 0, 0]),
            Err(MessageParseError::InvalidUtf8)
        ));
    }

    #[test]
    fn buffer_too_small() {
        let mut buf = [0; 4];
        assert!(Message::Unimplemented(Unimplemented { sequence_number: 7 })
            .serialize(&mut buf)
            .is_none());
    }

    #[test]
    fn trailing_garbage() {
        assert_eq!(
            Message::parse(&[Message::UNIMPLEMENTED, 0, 0, 0, 1, 9]).err(),
            Some(MessageParseError::Unread(Message::UNIMPLEMENTED))
        );
        assert_eq!(
            Message::parse(&[Message::IGNORE, 0, 0, 0, 9]).err(),
            Some(MessageParseError::Truncated(Message::IGNORE))
        );
    }

    #[test]
    fn unknown() {
        assert_eq!(Message::parse(&[94, 0]).err(), Some(MessageParseError::Unknown(94)));
        assert_eq!(Message::parse(&[]).err(), Some(MessageParseError::Empty));
    }
}
