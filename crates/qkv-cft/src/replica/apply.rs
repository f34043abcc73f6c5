//! Apply loop: moves committed entries from the log into the kernel and
//! wakes any `submit` call waiting on the result.

use crate::replica::CftEngine;

impl<S> CftEngine<S> {
    /// Applies every entry between `last_applied` and `commit_index`,
    /// inclusive, one at a time, recording each reply for [`CftEngine::submit`]
    /// to collect.
    pub fn apply_tick(&self) {
        loop {
            let next = {
                let state = self.state.lock().expect("replica state mutex poisoned");
                if state.last_applied >= state.commit_index {
                    return;
                }
                state.last_applied.next()
            };

            let command = {
                let state = self.state.lock().expect("replica state mutex poisoned");
                match state.entry_at(next) {
                    Some(entry) => entry.command.clone(),
                    None => return,
                }
            };

            let reply = self.kernel.apply(&command);

            {
                let mut state = self.state.lock().expect("replica state mutex poisoned");
                state.last_applied = next;
            }

            self.applied.lock().expect("applied map mutex poisoned").insert(next, reply);
            self.applied_cv.notify_all();
        }
    }
}
