//! Readiness multiplexer (spec §4.2): one `mio::Poll` instance shared by
//! every task's active connection. A task's stable `TaskId` doubles as
//! its `mio::Token`, so no separate token↔task bookkeeping is needed.

use crate::core::signals::SignalFlags;
use crate::core::task::TaskId;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
        })
    }

    /// Registers (or re-registers) `source` for one-shot readability
    /// under `task_id`'s token. Spec §4.2: "after a task fires,
    /// re-registration is required to hear again" — callers re-invoke
    /// this every time a handler returns `WAIT_ON_SOCKET`, whether or
    /// not the underlying connection object changed since the last call.
    pub fn register(&mut self, task_id: TaskId, source: &mut dyn mio::event::Source) -> io::Result<()> {
        let token = Token(task_id);
        match self.poll.registry().reregister(source, token, Interest::READABLE) {
            Ok(()) => Ok(()),
            Err(_) => self.poll.registry().register(source, token, Interest::READABLE),
        }
    }

    /// Blocks until the soonest of `timeout`, a socket event, or a
    /// pending signal, and returns the tasks a socket event woke. An
    /// empty, non-erroring result means the call returned on a timeout
    /// or an observed signal; the caller re-checks `signals` either way.
    pub fn wait(&mut self, timeout: Option<Duration>, signals: &SignalFlags) -> io::Result<Vec<TaskId>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(self.events.iter().map(|e| e.token().0).collect()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if signals.any_pending() {
                        return Ok(Vec::new());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_poll_with_nothing_registered_returns_empty() {
        let mut mux = Multiplexer::new().unwrap();
        let signals = SignalFlags::detached();
        let ready = mux.wait(Some(Duration::ZERO), &signals).unwrap();
        assert!(ready.is_empty());
    }
}
