//! Service requests ([RFC 4253 section 10]).
//!
//! [RFC 4253 section 10]: https://datatracker.ietf.org/doc/html/rfc4253#section-10

use crate::data::{Reader, Writer};

macro_rules! service {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<'a> {
            service_name: &'a [u8],
        }

        impl<'a> $name<'a> {
            pub fn new(service_name: &'a [u8]) -> Self {
                Self { service_name }
            }

            pub fn service_name(&self) -> &'a [u8] {
                self.service_name
            }

            pub(super) fn read(r: &mut Reader<'a>) -> Option<Self> {
                r.string().map(Self::new)
            }

            pub(super) fn write(&self, w: &mut Writer<'_>) -> Option<()> {
                w.string(self.service_name)
            }
        }

        impl<'a> From<&'a str> for $name<'a> {
            fn from(service_name: &'a str) -> Self {
                Self::new(service_name.as_bytes())
            }
        }
    };
}

service!(
    /// `SSH_MSG_SERVICE_REQUEST`.
    ServiceRequest
);
service!(
    /// `SSH_MSG_SERVICE_ACCEPT`.
    ServiceAccept
);

#[cfg(test)]
mod test {
    use crate::message::{Message, MessageParseError};

    #[test]
    fn request_userauth() {
        let mut buf = [0; 32];
        let (msg, _) = Message::ServiceRequest("ssh-userauth".into())
            .serialize(&mut buf)
            .unwrap();
        assert_eq!(&msg[..5], &[Message::SERVICE_REQUEST, 0, 0, 0, 12]);
        let req = Message::parse(msg).unwrap().into_service_request().unwrap();
        assert_eq!(req.service_name(), b"ssh-userauth");
    }

    #[test]
    fn trailing_bytes() {
        let data = [Message::SERVICE_ACCEPT, 0, 0, 0, 1, b'x', 0];
        assert!(matches!(
            Message::parse(&data),
            Err(MessageParseError::Unread(Message::SERVICE_ACCEPT))
        ));
        assert!(Message::parse(&data[..6]).is_ok());
    }
}
