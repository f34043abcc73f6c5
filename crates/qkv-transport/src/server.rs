//! A minimal blocking TCP server: one thread per inbound connection, one
//! task per inbound RPC. Shutdown is cooperative — `ServerHandle::stop`
//! flips a shared flag and joins every in-flight handler thread before
//! returning.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::framing;

/// A handle to a running server. Dropping it does not stop the server —
/// call [`ServerHandle::stop`] explicitly for a cooperative shutdown.
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signals the accept loop to stop and waits for every in-flight
    /// handler thread to finish.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Starts serving `Req -> Rep` RPCs on `listener`. `handler` is called once
/// per accepted connection, on that connection's own thread, along with the
/// peer's IP address so the caller can apply a partition filter
/// before dispatching to the engine; it must not block indefinitely, since
/// `ServerHandle::stop` joins every such thread.
pub fn serve<Req, Rep, H>(listener: TcpListener, handler: H) -> ServerHandle
where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + 'static,
    H: Fn(Req, std::net::IpAddr) -> Rep + Send + Sync + 'static,
{
    listener
        .set_nonblocking(true)
        .expect("TCP listener must support non-blocking mode for cooperative shutdown");

    let running = Arc::new(AtomicBool::new(true));
    let handler = Arc::new(handler);
    let in_flight: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_running = Arc::clone(&running);
    let accept_in_flight = Arc::clone(&in_flight);
    let accept_thread = thread::spawn(move || {
        while accept_running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let handler = Arc::clone(&handler);
                    let join = thread::spawn(move || handle_connection(stream, addr.ip(), handler.as_ref()));
                    accept_in_flight.lock().expect("in-flight list poisoned").push(join);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "TCP accept failed");
                }
            }
        }

        for join in in_flight.lock().expect("in-flight list poisoned").drain(..) {
            let _ = join.join();
        }
    });

    ServerHandle {
        running,
        accept_thread: Some(accept_thread),
    }
}

fn handle_connection<Req, Rep, H>(mut stream: std::net::TcpStream, peer_ip: std::net::IpAddr, handler: &H)
where
    Req: DeserializeOwned,
    Rep: Serialize,
    H: Fn(Req, std::net::IpAddr) -> Rep,
{
    let bytes = match framing::read_frame(&mut stream) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "failed to read request frame");
            return;
        }
    };

    let request: Req = match postcard::from_bytes(&bytes) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "failed to decode request");
            return;
        }
    };

    let reply = handler(request, peer_ip);

    let Ok(reply_bytes) = postcard::to_allocvec(&reply) else {
        tracing::debug!("failed to encode reply");
        return;
    };

    if let Err(err) = framing::write_frame(&mut stream, &reply_bytes) {
        tracing::debug!(error = %err, "failed to write reply frame");
    }
}
