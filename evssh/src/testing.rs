//! Helpers for driving a packet stream by hand.

use crate::{
    negotiator::{Exchange, KeyExchange, NewKeys, Proposal},
    state::{Algorithms, DirectionState, RekeyLimits},
    Result,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use core::{
    cell::RefCell,
    pin::Pin,
    task::{Context, Poll},
};
use futures::io::{self, AsyncWrite};
use rand::{rngs::StdRng, SeedableRng};
use std::rc::Rc;

/// Completes immediately without changing any algorithm.
pub struct Null;

#[async_trait(?Send)]
impl KeyExchange for Null {
    fn proposal(&self) -> Proposal {
        Proposal::new("null@evssh", "ssh-ed25519")
    }

    async fn exchange(&self, _: &mut Exchange<'_>) -> Result<NewKeys> {
        Ok(NewKeys {
            send: Algorithms::none(),
            receive: Algorithms::none(),
            exchange_hash: Bytes::from_static(b"null exchange"),
        })
    }
}

/// Collects everything written to it.
#[derive(Clone, Default)]
pub struct Sink(Rc<RefCell<Vec<u8>>>);

impl AsyncWrite for Sink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.borrow_mut().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// The remote end of a stream that never leaves the `none` algorithms.
pub struct Peer {
    tx: DirectionState,
    rx: DirectionState,
    sink: Sink,
    input: BytesMut,
    rng: StdRng,
}

impl Peer {
    pub fn new() -> Self {
        Self {
            tx: DirectionState::new(RekeyLimits::default()),
            rx: DirectionState::new(RekeyLimits::default()),
            sink: Sink::default(),
            input: BytesMut::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Where the stream under test should write.
    pub fn sink(&self) -> Sink {
        self.sink.clone()
    }

    pub fn frame(&mut self, payload: &[u8]) -> Vec<u8> {
        self.tx.encode(payload, &mut self.rng).unwrap()
    }

    pub fn kexinit(&mut self) -> Vec<u8> {
        let payload = Null.proposal().kexinit(&[1; 16]).unwrap();
        self.frame(&payload)
    }

    /// Whether the stream under test has dropped its writer.
    pub fn writer_released(&self) -> bool {
        Rc::strong_count(&self.sink.0) == 1
    }

    /// Payloads written by the stream since the last call.
    pub fn received(&mut self) -> Vec<Vec<u8>> {
        let written = core::mem::take(&mut *self.sink.0.borrow_mut());
        self.input.extend_from_slice(&written);
        let mut packets = Vec::new();
        while let Some(p) = self.rx.decode(&mut self.input, 1 << 20).unwrap() {
            packets.push(p.to_vec());
        }
        packets
    }
}
