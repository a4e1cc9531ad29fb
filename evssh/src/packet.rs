use bytes::Bytes;
use core::fmt;
use evssh_core::message::{Message, MessageParseError};

/// A deframed payload: a message type byte followed by the message body.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
	payload: Bytes,
}

impl Packet {
	/// `None` if the payload is empty, i.e. has no message type.
	pub fn new(payload: impl Into<Bytes>) -> Option<Self> {
		let payload = payload.into();
		(!payload.is_empty()).then(|| Self { payload })
	}

	pub fn ty(&self) -> u8 {
		self.payload[0]
	}

	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	/// The payload without the message type.
	pub fn body(&self) -> &[u8] {
		&self.payload[1..]
	}

	pub fn message(&self) -> Result<Message<'_>, MessageParseError> {
		Message::parse(&self.payload)
	}

	pub fn into_payload(self) -> Bytes {
		self.payload
	}
}

impl fmt::Debug for Packet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Packet")
			.field("type", &self.ty())
			.field("length", &self.payload.len())
			.finish()
	}
}
