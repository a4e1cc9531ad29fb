use crate::{
    config::Config,
    deferred::Deferred,
    error::{Error, Result},
    host_key::HostKeyVerifier,
    identifier::{self, PeerVersion},
    negotiator::KeyExchange,
    packet::Packet,
    reactor::Reactor,
    stream::PacketStream,
};
use bytes::Bytes;
use evssh_core::{
    identifier::Identifier,
    message::{Message, ServiceRequest},
};
use futures::{
    future::{abortable, AbortHandle},
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite},
};
use std::rc::Rc;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// An SSH transport over one duplex byte stream.
///
/// Dropping the session stops reading from the peer.
pub struct Session {
    stream: Rc<PacketStream>,
    reactor: Reactor,
    reader: AbortHandle,
}

impl Session {
    /// Send our identification and start reading from the peer.
    ///
    /// This returns before the first key exchange has completed, see [`Session::ready`].
    pub async fn start<R, W>(
        reactor: &Reactor,
        read: R,
        mut write: W,
        kex: impl KeyExchange + 'static,
        verifier: impl HostKeyVerifier + 'static,
        config: Config,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        let ident = Identifier::new(config.identifier.as_bytes())
            .ok_or_else(|| Error::Version(format!("invalid identifier {:?}", config.identifier)))?;
        identifier::send(ident, &mut write).await?;

        let stream = PacketStream::new(
            reactor,
            Box::new(write),
            Rc::new(kex),
            Rc::new(verifier),
            config,
        );
        let (task, reader) = abortable(pump(stream.clone(), read));
        reactor.spawn(async move {
            let _ = task.await;
        });
        Ok(Self { stream, reactor: reactor.clone(), reader })
    }

    /// [`Session::start`] and wait for the first key exchange.
    pub async fn connect<R, W>(
        reactor: &Reactor,
        read: R,
        write: W,
        kex: impl KeyExchange + 'static,
        verifier: impl HostKeyVerifier + 'static,
        config: Config,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        let session = Self::start(reactor, read, write, kex, verifier, config).await?;
        session.ready().value().await?;
        Ok(session)
    }

    /// Frame and write a message, returning once it is written.
    pub async fn send_message(&self, payload: &[u8]) -> Result<()> {
        self.stream.send(payload).await
    }

    /// Send a message in the background.
    pub fn enqueue_message(&self, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let stream = self.stream.clone();
        self.reactor.spawn(async move {
            if let Err(e) = stream.send(&payload).await {
                warn!("dropped outgoing message: {}", e);
            }
        });
    }

    /// Wait for the next message from the peer.
    pub async fn next_message(&self) -> Result<Packet> {
        self.stream.next_packet().value().await
    }

    /// The next message from the peer, if one has arrived.
    pub fn poll_message(&self) -> Result<Option<Packet>> {
        self.stream.poll_packet()
    }

    /// Put a message back so it is returned by the next call to
    /// [`next_message`](Self::next_message) or [`poll_message`](Self::poll_message) that
    /// finds no earlier message.
    pub fn push(&self, packet: Packet) {
        self.stream.push(packet)
    }

    /// Exchange keys again, or wait for the exchange in flight.
    pub async fn rekey(&self) -> Result<()> {
        self.stream.negotiator.rekey().value().await
    }

    /// Rekey if enough traffic has passed since the last exchange.
    pub async fn rekey_as_needed(&self) -> Result<()> {
        if self.stream.negotiator.is_pending() || !self.stream.needs_rekey() {
            return Ok(());
        }
        debug!(host = %self.stream.config().host, "rekey threshold reached");
        self.rekey().await
    }

    pub fn hint(&self, name: &str, value: bool) {
        self.stream.hint(name, value)
    }

    /// Tell the peer we are leaving, close our half of the connection and release all
    /// resources.
    pub async fn close(&self) -> Result<()> {
        self.reader.abort();
        self.stream.close().await
    }

    /// Like [`close`](Self::close), without waiting for the writer to close.
    pub fn shutdown(&self) {
        self.reader.abort();
        self.stream.reject(Error::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// The peer's identification, once received.
    pub fn peer_version(&self) -> Option<PeerVersion> {
        self.stream.peer_version()
    }

    /// The exchange hash of the first key exchange.
    pub fn session_id(&self) -> Option<Bytes> {
        self.stream.negotiator.session_id()
    }

    /// The key exchange in flight, if any.
    pub fn pending(&self) -> Option<Deferred<()>> {
        self.stream.negotiator.pending()
    }

    /// Settles once the first key exchange completed. Wait for it before sending anything
    /// but transport messages.
    pub fn ready(&self) -> Deferred<()> {
        self.stream.negotiator.ready()
    }

    /// A `SERVICE_REQUEST` payload for `name`, e.g. `ssh-userauth`.
    pub fn service_request(name: &str) -> Bytes {
        let mut buf = vec![0; 1 + 4 + name.len()];
        let n = Message::ServiceRequest(ServiceRequest::from(name))
            .serialize(&mut buf)
            .map_or(0, |(msg, _)| msg.len());
        buf.truncate(n);
        buf.into()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Feed everything the peer sends into the stream until either side closes.
async fn pump<R>(stream: Rc<PacketStream>, mut read: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0; READ_BUFFER_SIZE];
    while !stream.is_closed() {
        match read.read(&mut buf).await {
            Ok(0) => stream.reject(Error::Closed),
            Ok(n) => stream.receive(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => stream.reject(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_request_payload() {
        let p = Session::service_request("ssh-userauth");
        assert_eq!(&p[..], b"\x05\0\0\0\x0cssh-userauth");
    }
}
