//! Background loops spawned once per replica: election timer, leader
//! heartbeat fan-out, and the apply loop. Each runs on its own OS thread and
//! polls the engine at a fixed cadence rather than waiting on a wakeup —
//! matching the synchronous, thread-per-concern model the rest of the
//! engine uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use qkv_transport::PeerSender;

use crate::message::{PeerReply, PeerRequest};
use crate::replica::{CftEngine, HEARTBEAT_INTERVAL};

const ELECTION_POLL_INTERVAL: Duration = Duration::from_millis(10);
const APPLY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handles to the three background loops. Dropping this does not stop
/// them — call [`EngineLoopHandles::stop`] for an orderly shutdown.
pub struct EngineLoopHandles {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl EngineLoopHandles {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Spawns the election, heartbeat, and apply loops for `engine`. The
/// engine must be wrapped in an `Arc` since all three loops outlive this
/// call.
pub fn spawn_background_loops<S>(engine: Arc<CftEngine<S>>) -> EngineLoopHandles
where
    S: PeerSender<PeerRequest, PeerReply> + Send + Sync + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));

    let election_shutdown = Arc::clone(&shutdown);
    let election_engine = Arc::clone(&engine);
    let election = thread::spawn(move || {
        while !election_shutdown.load(Ordering::SeqCst) {
            election_engine.election_tick();
            thread::sleep(ELECTION_POLL_INTERVAL);
        }
    });

    let heartbeat_shutdown = Arc::clone(&shutdown);
    let heartbeat_engine = Arc::clone(&engine);
    let heartbeat = thread::spawn(move || {
        while !heartbeat_shutdown.load(Ordering::SeqCst) {
            heartbeat_engine.heartbeat_tick();
            thread::sleep(HEARTBEAT_INTERVAL);
        }
    });

    let apply_shutdown = Arc::clone(&shutdown);
    let apply_engine = Arc::clone(&engine);
    let apply = thread::spawn(move || {
        while !apply_shutdown.load(Ordering::SeqCst) {
            apply_engine.apply_tick();
            thread::sleep(APPLY_POLL_INTERVAL);
        }
    });

    EngineLoopHandles {
        shutdown,
        handles: vec![election, heartbeat, apply],
    }
}
