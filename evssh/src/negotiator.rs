//! Key exchange sequencing ([RFC 4253 section 7]).
//!
//! The negotiator decides *when* keys are exchanged and which packets may pass in the
//! meantime. The exchange itself, i.e. Diffie-Hellman and host key signatures, is left to
//! a [`KeyExchange`] implementation.
//!
//! [RFC 4253 section 7]: https://datatracker.ietf.org/doc/html/rfc4253#section-7

use crate::{
    deferred::Deferred,
    error::{Error, Result},
    host_key::{HostKey, HostKeyVerifier},
    packet::Packet,
    reactor::Reactor,
    state::Algorithms,
    stream::PacketStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use core::{cell::RefCell, mem};
use evssh_core::{
    cipher::CIPHER_NAMES,
    compression::COMPRESSION_NAMES,
    data::NameList,
    mac::MAC_NAMES,
    message::{KeyExchangeInit, Message},
};
use rand::RngCore;
use std::{collections::VecDeque, rc::{Rc, Weak}};
use tracing::{debug, info};

/// Whether a message of type `ty` may pass while keys are being exchanged
/// ([RFC 4253 section 7.1]). Everything else is held until the exchange completes.
///
/// [RFC 4253 section 7.1]: https://datatracker.ietf.org/doc/html/rfc4253#section-7.1
pub fn allowed_while_pending(ty: u8) -> bool {
    // Transport generic except the service messages, and the key exchange itself.
    matches!(ty, 1..=4 | 7..=19 | 21..=49)
}

/// The algorithms we offer, most preferred first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub kex: String,
    pub host_key: String,
    pub encryption: [String; 2],
    pub mac: [String; 2],
    pub compression: [String; 2],
    pub languages: [String; 2],
}

impl Proposal {
    /// Offer the stock ciphers, MACs and compression algorithms in both directions.
    pub fn new(kex: &str, host_key: &str) -> Self {
        let both = |names: &[&str]| [names.join(","), names.join(",")];
        Self {
            kex: kex.into(),
            host_key: host_key.into(),
            encryption: both(CIPHER_NAMES),
            mac: both(MAC_NAMES),
            compression: both(COMPRESSION_NAMES),
            languages: Default::default(),
        }
    }

    /// Serialize as a `KEXINIT` payload.
    pub fn kexinit(&self, cookie: &[u8; 16]) -> Result<Bytes> {
        fn list(s: &str) -> Result<NameList<'_>> {
            NameList::try_from(s.as_bytes())
                .map_err(|e| Error::KeyExchange(format!("{:?} in {:?}", e, s)))
        }
        fn pair(l: &[String; 2]) -> Result<[NameList<'_>; 2]> {
            Ok([list(&l[0])?, list(&l[1])?])
        }
        let init = KeyExchangeInit {
            cookie,
            kex: list(&self.kex)?,
            host_key: list(&self.host_key)?,
            encryption: pair(&self.encryption)?,
            mac: pair(&self.mac)?,
            compression: pair(&self.compression)?,
            languages: pair(&self.languages)?,
            first_kex_packet_follows: false,
        };
        let lists = [&self.encryption, &self.mac, &self.compression, &self.languages];
        let names = self.kex.len()
            + self.host_key.len()
            + lists.iter().flat_map(|l| l.iter()).map(String::len).sum::<usize>();
        let len = 1 + 16 + 10 * 4 + names + 1 + 4;
        let mut buf = vec![0; len];
        let n = Message::KeyExchangeInit(init)
            .serialize(&mut buf)
            .map(|(msg, _)| msg.len())
            .ok_or_else(|| Error::KeyExchange("KEXINIT does not fit".into()))?;
        buf.truncate(n);
        Ok(buf.into())
    }
}

/// What a completed key exchange produced.
pub struct NewKeys {
    pub send: Algorithms,
    pub receive: Algorithms,
    pub exchange_hash: Bytes,
}

/// Performs the method-specific part of a key exchange.
///
/// The implementation knows which side of the connection it is on.
#[async_trait(?Send)]
pub trait KeyExchange {
    fn proposal(&self) -> Proposal;

    /// Called once both `KEXINIT` messages have been exchanged. `NEWKEYS` is handled by
    /// the caller.
    async fn exchange(&self, exchange: &mut Exchange<'_>) -> Result<NewKeys>;
}

/// Context handed to [`KeyExchange::exchange`].
pub struct Exchange<'a> {
    stream: &'a PacketStream,
    verifier: &'a dyn HostKeyVerifier,
    local_kexinit: Bytes,
    remote_kexinit: Bytes,
    remote_version: String,
    session_id: Option<Bytes>,
}

impl Exchange<'_> {
    pub fn local_kexinit(&self) -> &[u8] {
        &self.local_kexinit
    }

    pub fn remote_kexinit(&self) -> &[u8] {
        &self.remote_kexinit
    }

    pub fn local_version(&self) -> &str {
        &self.stream.config().identifier
    }

    pub fn remote_version(&self) -> &str {
        &self.remote_version
    }

    /// The exchange hash of the first key exchange, `None` during the first one.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.stream.config().host
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.stream.send(payload).await
    }

    /// The next key exchange method packet (message types 30 to 49) from the peer.
    pub async fn next_packet(&self) -> Result<Packet> {
        self.stream.negotiator.next_inbox().await
    }

    pub fn verify_host_key(&self, key: &HostKey<'_>) -> Result<()> {
        if self.verifier.verify(self.host(), key) {
            Ok(())
        } else {
            Err(Error::HostKeyMismatch(self.host().into()))
        }
    }
}

enum Phase {
    Idle,
    Negotiating {
        pending: Deferred<()>,
        local: Option<Bytes>,
        remote: Option<Bytes>,
        started: bool,
    },
}

#[derive(Default)]
struct Inbox {
    packets: VecDeque<Packet>,
    waiter: Option<Deferred<Packet>>,
}

pub(crate) struct Negotiator {
    stream: Weak<PacketStream>,
    reactor: Reactor,
    kex: Rc<dyn KeyExchange>,
    verifier: Rc<dyn HostKeyVerifier>,
    phase: RefCell<Phase>,
    ready: Deferred<()>,
    inbox: RefCell<Inbox>,
    session_id: RefCell<Option<Bytes>>,
}

impl Negotiator {
    pub fn new(
        stream: Weak<PacketStream>,
        reactor: &Reactor,
        kex: Rc<dyn KeyExchange>,
        verifier: Rc<dyn HostKeyVerifier>,
    ) -> Self {
        Self {
            stream,
            reactor: reactor.clone(),
            kex,
            verifier,
            phase: RefCell::new(Phase::Idle),
            ready: Deferred::new(reactor),
            inbox: Default::default(),
            session_id: Default::default(),
        }
    }

    /// Settles when the first key exchange has completed.
    pub fn ready(&self) -> Deferred<()> {
        self.ready.clone()
    }

    /// The exchange in flight, if any.
    pub fn pending(&self) -> Option<Deferred<()>> {
        match &*self.phase.borrow() {
            Phase::Idle => None,
            Phase::Negotiating { pending, .. } => Some(pending.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.phase.borrow(), Phase::Negotiating { .. })
    }

    pub fn session_id(&self) -> Option<Bytes> {
        self.session_id.borrow().clone()
    }

    /// Whether a packet of this type must wait for the exchange in flight.
    pub fn holds(&self, ty: u8) -> bool {
        self.is_pending() && !allowed_while_pending(ty)
    }

    /// Whether a packet of this type belongs to the exchange in flight.
    pub fn consumes(&self, ty: u8) -> bool {
        self.is_pending() && (ty == Message::NEWKEYS || Message::KEY_EXCHANGE_METHOD.contains(&ty))
    }

    pub fn deliver(&self, packet: Packet) {
        let mut inbox = self.inbox.borrow_mut();
        match inbox.waiter.take() {
            Some(w) if !w.is_abandoned() => {
                w.resolve(packet);
            }
            _ => inbox.packets.push_back(packet),
        }
    }

    async fn next_inbox(&self) -> Result<Packet> {
        let waiter = {
            let mut inbox = self.inbox.borrow_mut();
            if let Some(p) = inbox.packets.pop_front() {
                return Ok(p);
            }
            let d = Deferred::new(&self.reactor);
            inbox.waiter = Some(d.clone());
            d
        };
        waiter.value().await
    }

    /// Kick off the initial exchange once the peer's version is known.
    pub fn start(&self) {
        self.rekey();
    }

    /// Start an exchange unless one is in flight.
    pub fn rekey(&self) -> Deferred<()> {
        if let Some(pending) = self.pending() {
            return pending;
        }
        let pending = Deferred::new(&self.reactor);
        let stream = match self.stream.upgrade() {
            Some(s) => s,
            None => {
                pending.reject(Error::Closed);
                return pending;
            }
        };
        if let Some(e) = stream.close_error() {
            pending.reject(e);
            return pending;
        }
        *self.phase.borrow_mut() = Phase::Negotiating {
            pending: pending.clone(),
            local: None,
            remote: None,
            started: false,
        };
        debug!(host = %stream.config().host, "starting key exchange");

        let proposal = self.kex.proposal();
        self.reactor.spawn(async move {
            let r = async {
                let mut cookie = [0; 16];
                rand::thread_rng().fill_bytes(&mut cookie);
                let payload = proposal.kexinit(&cookie)?;
                stream.send(&payload).await?;
                Ok::<_, Error>(payload)
            }
            .await;
            match r {
                Ok(payload) => {
                    if let Phase::Negotiating { local, .. } = &mut *stream.negotiator.phase.borrow_mut() {
                        *local = Some(payload);
                    }
                    stream.negotiator.try_begin();
                }
                Err(e) => stream.reject(e),
            }
        });
        pending
    }

    /// Handle the peer's `KEXINIT`, starting an exchange if we did not.
    pub fn accept_kexinit(&self, packet: Packet) -> Result<()> {
        if let Err(e) = packet.message() {
            debug!("bad KEXINIT: {:?}", e);
            return Err(Error::Message("KEXINIT"));
        }
        self.rekey();
        match &mut *self.phase.borrow_mut() {
            Phase::Negotiating { remote: remote @ None, .. } => *remote = Some(packet.into_payload()),
            Phase::Negotiating { .. } => {
                return Err(Error::KeyExchange("KEXINIT received twice".into()))
            }
            Phase::Idle => return Err(Error::Closed),
        }
        self.try_begin();
        Ok(())
    }

    fn try_begin(&self) {
        let (local, remote) = match &mut *self.phase.borrow_mut() {
            Phase::Negotiating { local: Some(l), remote: Some(r), started, .. } if !*started => {
                *started = true;
                (l.clone(), r.clone())
            }
            _ => return,
        };
        let stream = match self.stream.upgrade() {
            Some(s) => s,
            None => return,
        };
        self.reactor.spawn(async move {
            if let Err(e) = stream.negotiator.run(&stream, local, remote).await {
                stream.reject(e);
            }
        });
    }

    async fn run(&self, stream: &PacketStream, local: Bytes, remote: Bytes) -> Result<()> {
        let remote_version = stream
            .peer_version()
            .map(|v| v.version)
            .ok_or_else(|| Error::KeyExchange("peer version unknown".into()))?;
        let mut exchange = Exchange {
            stream,
            verifier: &*self.verifier,
            local_kexinit: local,
            remote_kexinit: remote,
            remote_version,
            session_id: self.session_id(),
        };
        let keys = self.kex.exchange(&mut exchange).await?;

        // Nothing else may be framed between our NEWKEYS and the switch to the new keys.
        let mut writer = stream.lock_writer().await;
        stream.write_packet(&mut writer, &[Message::NEWKEYS]).await?;
        let reply = self.next_inbox().await?;
        if reply.ty() != Message::NEWKEYS {
            return Err(Error::KeyExchange(format!("expected NEWKEYS, got {}", reply.ty())));
        }
        info!(
            host = %stream.config().host,
            send = ?keys.send,
            receive = ?keys.receive,
            "new keys installed"
        );
        stream.install(keys.send, keys.receive);
        drop(writer);

        self.session_id.borrow_mut().get_or_insert(keys.exchange_hash);
        let pending = match mem::replace(&mut *self.phase.borrow_mut(), Phase::Idle) {
            Phase::Negotiating { pending, .. } => Some(pending),
            Phase::Idle => None,
        };
        stream.release_held();
        if let Some(pending) = pending {
            pending.resolve(());
        }
        self.ready.resolve(());
        Ok(())
    }

    /// Give up on any exchange in flight. The returned deferreds must still be rejected.
    pub fn abandon(&self) -> Abandoned {
        let pending = match mem::replace(&mut *self.phase.borrow_mut(), Phase::Idle) {
            Phase::Negotiating { pending, .. } => Some(pending),
            Phase::Idle => None,
        };
        let mut inbox = self.inbox.borrow_mut();
        inbox.packets.clear();
        Abandoned { pending, ready: self.ready.clone(), inbox: inbox.waiter.take() }
    }
}

pub(crate) struct Abandoned {
    pending: Option<Deferred<()>>,
    ready: Deferred<()>,
    inbox: Option<Deferred<Packet>>,
}

impl Abandoned {
    pub fn reject(self, error: Error) {
        if let Some(p) = self.pending {
            p.reject(error.clone());
        }
        if let Some(w) = self.inbox {
            w.reject(error.clone());
        }
        self.ready.reject(error);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proposal_kexinit() {
        let p = Proposal::new("curve25519-sha256", "ssh-ed25519");
        let payload = p.kexinit(&[7; 16]).unwrap();
        let msg = Message::parse(&payload).unwrap();
        let init = msg.into_kex_init().unwrap();
        assert_eq!(init.cookie, &[7; 16]);
        assert_eq!(init.kex.as_str(), "curve25519-sha256");
        assert_eq!(init.encryption[0].as_str(), CIPHER_NAMES.join(","));
        assert_eq!(init.languages[1].as_str(), "");
        assert!(!init.first_kex_packet_follows);
    }

    #[test]
    fn bad_name_list() {
        let p = Proposal::new("a,,b", "ssh-ed25519");
        assert!(matches!(p.kexinit(&[0; 16]), Err(Error::KeyExchange(_))));
    }

    #[test]
    fn allow_list() {
        assert!(allowed_while_pending(Message::DISCONNECT));
        assert!(allowed_while_pending(Message::DEBUG));
        assert!(!allowed_while_pending(Message::SERVICE_REQUEST));
        assert!(!allowed_while_pending(Message::SERVICE_ACCEPT));
        assert!(allowed_while_pending(Message::NEWKEYS));
        assert!(allowed_while_pending(30));
        assert!(allowed_while_pending(49));
        assert!(!allowed_while_pending(50));
        assert!(!allowed_while_pending(94));
    }
}
