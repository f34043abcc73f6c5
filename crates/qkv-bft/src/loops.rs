//! Background loop spawned once per BFT replica: the view-change
//! timer. Polls at a fixed cadence rather than waiting on a wakeup, the
//! same style `qkv_cft::loops` uses for its election timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use qkv_transport::PeerSender;

use crate::message::{PeerReply, PeerRequest};
use crate::replica::BftEngine;

const VIEW_CHANGE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the view-change timer loop. Dropping this does not stop it —
/// call [`EngineLoopHandle::stop`] for an orderly shutdown.
pub struct EngineLoopHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EngineLoopHandle {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns the view-change timer loop for `engine`.
pub fn spawn_background_loops<S>(engine: Arc<BftEngine<S>>) -> EngineLoopHandle
where
    S: PeerSender<PeerRequest, PeerReply> + Send + Sync + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_shutdown = Arc::clone(&shutdown);
    let handle = thread::spawn(move || {
        while !loop_shutdown.load(Ordering::SeqCst) {
            engine.view_change_tick();
            thread::sleep(VIEW_CHANGE_POLL_INTERVAL);
        }
    });

    EngineLoopHandle { shutdown, handle: Some(handle) }
}
