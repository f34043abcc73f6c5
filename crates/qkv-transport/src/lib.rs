//! Transport: a capability-style `PeerSender` trait the engines
//! depend on, plus one concrete implementation — blocking TCP with
//! `postcard`-framed messages — so the service runs end to end.
//!
//! The RPC transport is kept deliberately thin: it carries no retry,
//! connection pooling, or multiplexing — a deadline-bounded blocking call
//! that returns `None` on any IO error, timeout, or serialization failure.

mod framing;
mod server;

pub use framing::FramingError;
pub use server::{serve, ServerHandle};

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use qkv_types::PeerDescriptor;

/// The capability the consensus engines depend on. An engine holds only a
/// `PeerSender` and a list of `PeerDescriptor`s — never a back-pointer to
/// the replica shell or the transport's own connection state.
pub trait PeerSender<Req, Rep>: Send + Sync {
    /// Sends `request` to `peer` and waits up to `deadline` for a reply.
    /// Returns `None` on any failure — unreachable peer, deadline exceeded,
    /// or a partition-filter rejection applied by the caller. A deadline
    /// expiry is indistinguishable from a lost reply and is not an
    /// error the caller needs to distinguish.
    fn send(&self, peer: &PeerDescriptor, request: &Req, deadline: Duration) -> Option<Rep>;
}

/// A `PeerSender` backed by a fresh blocking TCP connection per call: a
/// synchronous request/response model with no connection reuse, so a
/// wedged peer can never poison a future call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPeerSender;

impl<Req, Rep> PeerSender<Req, Rep> for TcpPeerSender
where
    Req: Serialize,
    Rep: DeserializeOwned,
{
    fn send(&self, peer: &PeerDescriptor, request: &Req, deadline: Duration) -> Option<Rep> {
        let addr = peer.addr().to_socket_addrs().ok()?.next()?;
        let stream = TcpStream::connect_timeout(&addr, deadline).ok()?;
        stream.set_read_timeout(Some(deadline)).ok()?;
        stream.set_write_timeout(Some(deadline)).ok()?;

        let mut stream = stream;
        let bytes = postcard::to_allocvec(request).ok()?;
        framing::write_frame(&mut stream, &bytes).ok()?;
        stream.flush().ok()?;

        let reply_bytes = framing::read_frame(&mut stream).ok()?;
        postcard::from_bytes(&reply_bytes).ok()
    }
}
