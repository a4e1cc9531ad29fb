//! The packet stream: turns bytes from the peer into packets for whoever is waiting, and
//! packets from us into bytes for the peer.

use crate::{
    config::Config,
    deferred::Deferred,
    error::{Error, FramingError, Result},
    host_key::HostKeyVerifier,
    identifier::PeerVersion,
    negotiator::{KeyExchange, Negotiator},
    packet::Packet,
    reactor::Reactor,
    state::{Algorithms, DirectionState},
    sync::{LocalMutex, LocalMutexGuard},
};
use bytes::{Buf, BytesMut};
use core::{cell::RefCell, mem};
use evssh_core::{
    message::{Disconnect, Message},
    packet::WrapRawError,
};
use futures::io::{AsyncWrite, AsyncWriteExt};
use std::{
    collections::{HashMap, VecDeque},
    rc::{Rc, Weak},
};
use tracing::{debug, error, info, trace, warn};

/// Set once the user has authenticated. Enables delayed compression.
pub const HINT_AUTHENTICATED: &str = "authenticated";

pub(crate) type Writer = Box<dyn AsyncWrite + Unpin>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Waiting for the peer's identification line.
    Version,
    Framed,
    /// A `NEWKEYS` was deframed and the new receive keys are not installed yet.
    Paused,
}

struct Input {
    buf: BytesMut,
    mode: Mode,
    state: DirectionState,
    peer: Option<PeerVersion>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Packet>,
    /// Arrived while keys were being exchanged and not allowed through yet.
    held: VecDeque<Packet>,
    waiters: VecDeque<Deferred<Packet>>,
}

pub(crate) struct PacketStream {
    this: Weak<PacketStream>,
    pub(crate) negotiator: Negotiator,
    reactor: Reactor,
    config: Config,
    input: RefCell<Input>,
    /// Only touched with the writer locked.
    send: RefCell<DirectionState>,
    /// `None` once our half of the connection is closed.
    writer: LocalMutex<Option<Writer>>,
    queue: RefCell<Queue>,
    hints: RefCell<HashMap<String, bool>>,
    closed: RefCell<Option<Error>>,
}

impl PacketStream {
    pub fn new(
        reactor: &Reactor,
        writer: Writer,
        kex: Rc<dyn KeyExchange>,
        verifier: Rc<dyn HostKeyVerifier>,
        config: Config,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            negotiator: Negotiator::new(this.clone(), reactor, kex, verifier),
            reactor: reactor.clone(),
            input: RefCell::new(Input {
                buf: BytesMut::new(),
                mode: Mode::Version,
                state: DirectionState::new(config.rekey_limits),
                peer: None,
            }),
            send: RefCell::new(DirectionState::new(config.rekey_limits)),
            writer: LocalMutex::new(Some(writer)),
            queue: Default::default(),
            hints: Default::default(),
            closed: RefCell::new(None),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peer_version(&self) -> Option<PeerVersion> {
        self.input.borrow().peer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    /// The error the stream was closed with.
    pub fn close_error(&self) -> Option<Error> {
        self.closed.borrow().clone()
    }

    fn check_open(&self) -> Result<()> {
        self.close_error().map_or(Ok(()), Err)
    }

    /// Whether either direction has carried enough traffic to warrant new keys.
    pub fn needs_rekey(&self) -> bool {
        self.send.borrow().needs_rekey() || self.input.borrow().state.needs_rekey()
    }

    /// Feed bytes read from the peer.
    pub fn receive(&self, data: &[u8]) {
        if self.is_closed() {
            return;
        }
        self.input.borrow_mut().buf.extend_from_slice(data);
        self.resume();
    }

    fn resume(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.process() {
            self.reject(e);
        }
    }

    fn process(&self) -> Result<()> {
        if self.input.borrow().mode == Mode::Version {
            if !self.detect_version()? {
                return Ok(());
            }
            self.negotiator.start();
        }
        for packet in self.deframe()? {
            self.dispatch(packet)?;
        }
        Ok(())
    }

    fn detect_version(&self) -> Result<bool> {
        let mut input = self.input.borrow_mut();
        let (version, consumed) = match PeerVersion::detect(&input.buf)? {
            Some(v) => v,
            None => return Ok(false),
        };
        input.buf.advance(consumed);
        for line in &version.header {
            debug!(host = %self.config.host, "banner: {}", line);
        }
        info!(host = %self.config.host, "peer version {}", version.version);
        input.peer = Some(version);
        input.mode = Mode::Framed;
        Ok(true)
    }

    /// Extract every complete packet, stopping early after `NEWKEYS`.
    fn deframe(&self) -> Result<Vec<Packet>> {
        let mut input = self.input.borrow_mut();
        let Input { buf, mode, state, .. } = &mut *input;
        let mut packets = Vec::new();
        while *mode == Mode::Framed {
            let payload = match state.decode(buf, self.config.max_packet_length)? {
                Some(p) => p,
                None => break,
            };
            let packet =
                Packet::new(payload).ok_or(FramingError::Invalid(WrapRawError::EmptyPayload))?;
            trace!(
                seq = state.sequence_number().wrapping_sub(1),
                ty = packet.ty(),
                len = packet.payload().len(),
                "received packet"
            );
            if packet.ty() == Message::NEWKEYS {
                *mode = Mode::Paused;
            }
            packets.push(packet);
        }
        Ok(packets)
    }

    fn dispatch(&self, packet: Packet) -> Result<()> {
        match packet.ty() {
            Message::DISCONNECT => match packet.message() {
                Ok(Message::Disconnect(d)) => Err(Error::Disconnect {
                    reason: d.reason,
                    description: String::from_utf8_lossy(d.description).into_owned(),
                }),
                _ => Err(Error::Message("DISCONNECT")),
            },
            Message::IGNORE => {
                debug!(host = %self.config.host, "ignored {} bytes", packet.body().len());
                Ok(())
            }
            Message::UNIMPLEMENTED => {
                match packet.message() {
                    Ok(Message::Unimplemented(u)) => warn!(
                        host = %self.config.host,
                        "peer did not understand packet {}", u.sequence_number
                    ),
                    _ => warn!(host = %self.config.host, "malformed UNIMPLEMENTED"),
                }
                Ok(())
            }
            Message::DEBUG => {
                match packet.message() {
                    Ok(Message::Debug(d)) if d.always_display => {
                        info!(host = %self.config.host, "peer: {}", d.message)
                    }
                    Ok(Message::Debug(d)) => debug!(host = %self.config.host, "peer: {}", d.message),
                    _ => debug!(host = %self.config.host, "malformed DEBUG"),
                }
                Ok(())
            }
            Message::KEXINIT => self.negotiator.accept_kexinit(packet),
            ty if self.negotiator.consumes(ty) => {
                self.negotiator.deliver(packet);
                Ok(())
            }
            Message::NEWKEYS => Err(Error::KeyExchange("NEWKEYS outside key exchange".into())),
            _ => {
                self.enqueue(packet);
                Ok(())
            }
        }
    }

    fn enqueue(&self, packet: Packet) {
        {
            let mut q = self.queue.borrow_mut();
            if self.negotiator.holds(packet.ty()) {
                trace!(ty = packet.ty(), "holding packet until new keys are in place");
                q.held.push_back(packet);
                return;
            }
            q.ready.push_back(packet);
        }
        self.serve();
    }

    fn serve(&self) {
        let mut q = self.queue.borrow_mut();
        while !q.ready.is_empty() {
            let waiter = match q.waiters.pop_front() {
                Some(w) => w,
                None => break,
            };
            if waiter.is_abandoned() {
                continue;
            }
            if let Some(packet) = q.ready.pop_front() {
                waiter.resolve(packet);
            }
        }
    }

    /// Let packets held during a key exchange through, after the ones already waiting.
    pub fn release_held(&self) {
        {
            let mut q = self.queue.borrow_mut();
            let held = mem::take(&mut q.held);
            q.ready.extend(held);
        }
        self.serve();
    }

    /// Re-inject a packet as if it had just arrived.
    pub fn push(&self, packet: Packet) {
        if !self.is_closed() {
            self.enqueue(packet);
        }
    }

    /// The next packet if one is ready.
    pub fn poll_packet(&self) -> Result<Option<Packet>> {
        self.check_open()?;
        Ok(self.queue.borrow_mut().ready.pop_front())
    }

    /// The next packet, now or once it arrives.
    pub fn next_packet(&self) -> Deferred<Packet> {
        let waiter = Deferred::new(&self.reactor);
        if let Some(e) = self.close_error() {
            waiter.reject(e);
            return waiter;
        }
        let mut q = self.queue.borrow_mut();
        match q.ready.pop_front() {
            Some(packet) => {
                waiter.resolve(packet);
            }
            None => {
                q.waiters.retain(|w| !w.is_abandoned());
                q.waiters.push_back(waiter.clone());
            }
        }
        waiter
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut writer = self.lock_writer().await;
        self.write_packet(&mut writer, payload).await
    }

    pub(crate) async fn lock_writer(&self) -> LocalMutexGuard<'_, Option<Writer>> {
        self.writer.lock().await
    }

    /// Frame and write one packet. Packets are framed in the order they are written.
    pub(crate) async fn write_packet(
        &self,
        writer: &mut LocalMutexGuard<'_, Option<Writer>>,
        payload: &[u8],
    ) -> Result<()> {
        self.check_open()?;
        let writer = writer.as_mut().ok_or(Error::Closed)?;
        self.write_frame(writer, payload).await.map_err(|e| {
            self.reject(e.clone());
            e
        })
    }

    async fn write_frame(&self, writer: &mut Writer, payload: &[u8]) -> Result<()> {
        let ty = *payload.first().ok_or(Error::Message("empty"))?;
        let frame = {
            let mut send = self.send.borrow_mut();
            let frame = send.encode(payload, rand::thread_rng())?;
            trace!(
                seq = send.sequence_number().wrapping_sub(1),
                ty,
                len = payload.len(),
                "sent packet"
            );
            frame
        };
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Switch both directions to new keys and resume deframing.
    pub(crate) fn install(&self, send: Algorithms, receive: Algorithms) {
        self.send.borrow_mut().install(send);
        let paused = {
            let mut input = self.input.borrow_mut();
            input.state.install(receive);
            mem::replace(&mut input.mode, Mode::Framed) == Mode::Paused
        };
        if paused {
            let this = self.this.clone();
            self.reactor.next_tick(move || {
                if let Some(s) = this.upgrade() {
                    s.resume();
                }
            });
        }
    }

    pub fn hint(&self, name: &str, value: bool) {
        if name == HINT_AUTHENTICATED {
            self.send.borrow_mut().set_authenticated(value);
            self.input.borrow_mut().state.set_authenticated(value);
        }
        self.hints.borrow_mut().insert(name.into(), value);
    }

    pub fn hinted(&self, name: &str) -> bool {
        self.hints.borrow().get(name).copied().unwrap_or(false)
    }

    /// Close our half of the connection and release the writer. Does nothing if it is
    /// already closed.
    pub async fn close_writer(&self) -> Result<()> {
        self.shut_down(None).await
    }

    async fn shut_down(&self, disconnect: Option<Vec<u8>>) -> Result<()> {
        let mut guard = self.lock_writer().await;
        let mut writer = match guard.take() {
            Some(w) => w,
            None => return Ok(()),
        };
        if let Some(payload) = disconnect {
            if let Err(e) = self.write_frame(&mut writer, &payload).await {
                debug!(host = %self.config.host, "sending DISCONNECT: {}", e);
            }
        }
        self.send.borrow_mut().cleanup();
        writer.close().await.map_err(Error::from)
    }

    /// Tear the stream down. Every waiter is rejected with `error` on the next tick. In the
    /// background the peer is told why with a `DISCONNECT` and our half of the connection is
    /// closed.
    ///
    /// Only the first call has any effect.
    pub fn reject(&self, error: Error) {
        let disconnect = disconnect_payload(&error);
        if !self.tear_down(error) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.reactor.spawn(async move {
                if let Err(e) = this.shut_down(disconnect).await {
                    debug!(host = %this.config.host, "closing writer: {}", e);
                }
            });
        }
    }

    /// Like [`reject`](Self::reject) with [`Error::Closed`], but waits until the writer is
    /// closed and released.
    pub async fn close(&self) -> Result<()> {
        let disconnect = disconnect_payload(&Error::Closed);
        if self.tear_down(Error::Closed) {
            self.shut_down(disconnect).await
        } else {
            self.close_writer().await
        }
    }

    /// Returns `false` if the stream was torn down already.
    fn tear_down(&self, error: Error) -> bool {
        {
            let mut closed = self.closed.borrow_mut();
            if closed.is_some() {
                return false;
            }
            *closed = Some(error.clone());
        }
        if error.is_closed() {
            info!(host = %self.config.host, "{}", error);
        } else {
            error!(host = %self.config.host, "{}", error);
        }

        {
            let mut input = self.input.borrow_mut();
            input.state.cleanup();
            input.buf.clear();
        }
        let waiters = {
            let mut q = self.queue.borrow_mut();
            q.ready.clear();
            q.held.clear();
            mem::take(&mut q.waiters)
        };
        let negotiator = self.negotiator.abandon();
        self.reactor.next_tick(move || {
            for w in waiters {
                w.reject(error.clone());
            }
            negotiator.reject(error);
        });
        true
    }
}

/// The reason code reported to the peer, if it should be told at all.
fn disconnect_reason(error: &Error) -> Option<u32> {
    match error {
        Error::Closed => Some(Disconnect::BY_APPLICATION),
        Error::Integrity => Some(Disconnect::MAC_ERROR),
        Error::KeyExchange(_) => Some(Disconnect::KEY_EXCHANGE_FAILED),
        Error::HostKeyMismatch(_) => Some(Disconnect::HOST_KEY_NOT_VERIFIABLE),
        Error::Framing(_) | Error::Compression | Error::Message(_) => {
            Some(Disconnect::PROTOCOL_ERROR)
        }
        // No framing was agreed on, or the connection is gone already.
        Error::Version(_) | Error::Disconnect { .. } | Error::Io(_) => None,
    }
}

fn disconnect_payload(error: &Error) -> Option<Vec<u8>> {
    let reason = disconnect_reason(error)?;
    let description = error.to_string();
    let mut buf = vec![0; 1 + 4 + 4 + description.len() + 4];
    let msg = Message::Disconnect(Disconnect {
        reason,
        description: description.as_bytes(),
        language: b"",
    });
    let n = msg.serialize(&mut buf)?.0.len();
    buf.truncate(n);
    Some(buf)
}
