//! # Evented SSH transport
//!
//! The SSH binary packet protocol ([RFC 4253]) on top of a single-threaded executor.
//! Reading from the peer never blocks: bytes are deframed as they arrive and handed to
//! whichever task is waiting for the next packet, while key (re-)exchanges proceed in the
//! background.
//!
//! ```no_run
//! # use evssh::{Config, Reactor, Session, AcceptAny, KeyExchange};
//! # async fn f(reactor: Reactor, kex: impl KeyExchange + 'static) -> evssh::Result<()> {
//! let tcp = async_std::net::TcpStream::connect("example.org:22").await?;
//! let (read, write) = futures::AsyncReadExt::split(tcp);
//! let ssh = Session::connect(&reactor, read, write, kex, AcceptAny, Config::new("example.org")).await?;
//! ssh.send_message(&Session::service_request("ssh-userauth")).await?;
//! let reply = ssh.next_message().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [RFC 4253]: https://datatracker.ietf.org/doc/html/rfc4253

mod config;
pub mod deferred;
mod error;
mod host_key;
mod identifier;
mod negotiator;
mod packet;
mod reactor;
mod session;
mod state;
mod stream;
mod sync;
#[cfg(test)]
mod testing;

pub use config::Config;
pub use deferred::Deferred;
pub use error::{Error, FramingError, Result};
pub use evssh_core::{cipher, compression, mac, message};
pub use host_key::{AcceptAny, Fingerprint, HostKey, HostKeyVerifier};
pub use identifier::PeerVersion;
pub use negotiator::{allowed_while_pending, Exchange, KeyExchange, NewKeys, Proposal};
pub use packet::Packet;
pub use reactor::Reactor;
pub use session::Session;
pub use state::{Algorithms, Counters, DirectionState, RekeyLimits};
pub use stream::HINT_AUTHENTICATED;
