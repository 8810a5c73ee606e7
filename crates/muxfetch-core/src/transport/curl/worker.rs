//! Curl multi event loop on the transport's own thread: admit queued
//! operations up to the concurrency limit, perform, collect finished
//! transfers and deliver their completions.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use curl::multi::{Easy2Handle, Multi};
use tracing::{debug, trace, warn};

use crate::resource::Resource;
use crate::response::{classify_curl_error, classify_http_status, parse_headers, FetchError, FetchResult};
use crate::transport::{Completer, TransportHandle};

use super::easy::{add_to_multi, EasySettings};
use super::handler::Collector;

/// Upper bound on how long new commands wait while transfers are running.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(super) enum Command {
    Start {
        handle: TransportHandle,
        resource: Resource,
        completer: Completer,
    },
    Abort(TransportHandle),
    Shutdown,
}

struct Queued {
    handle: TransportHandle,
    resource: Resource,
    completer: Completer,
}

struct Active {
    easy: Easy2Handle<Collector>,
    handle: TransportHandle,
    completer: Completer,
}

pub(super) struct Worker {
    commands: Receiver<Command>,
    settings: EasySettings,
    max_active: usize,
    queued: VecDeque<Queued>,
    active: Vec<Active>,
}

enum Flow {
    Continue,
    Stop,
}

impl Worker {
    pub(super) fn new(commands: Receiver<Command>, settings: EasySettings, max_active: usize) -> Self {
        Self {
            commands,
            settings,
            max_active: max_active.max(1),
            queued: VecDeque::new(),
            active: Vec::new(),
        }
    }

    /// Runs until `Shutdown` or until every sender is gone. Outstanding
    /// completers are dropped on exit, so nothing is delivered for them.
    pub(super) fn run(mut self) {
        let multi = Multi::new();
        loop {
            if let Flow::Stop = self.drain_commands(&multi) {
                break;
            }
            self.admit(&multi);
            if self.active.is_empty() {
                continue;
            }
            if let Err(e) = self.step(&multi) {
                warn!("curl multi failure, failing {} operations: {}", self.active.len(), e);
                let err = FetchError::Transport(e.to_string());
                for a in self.active.drain(..) {
                    a.completer.complete(Err(err.clone()));
                }
            }
        }
        debug!(
            active = self.active.len(),
            queued = self.queued.len(),
            "curl transport stopped"
        );
    }

    /// Apply pending commands. Blocks for the first one when there is no work.
    fn drain_commands(&mut self, multi: &Multi) -> Flow {
        if self.active.is_empty() && self.queued.is_empty() {
            match self.commands.recv() {
                Ok(cmd) => {
                    if let Flow::Stop = self.apply(multi, cmd) {
                        return Flow::Stop;
                    }
                }
                Err(_) => return Flow::Stop,
            }
        }
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => {
                    if let Flow::Stop = self.apply(multi, cmd) {
                        return Flow::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    fn apply(&mut self, multi: &Multi, cmd: Command) -> Flow {
        match cmd {
            Command::Start {
                handle,
                resource,
                completer,
            } => {
                self.queued.push_back(Queued {
                    handle,
                    resource,
                    completer,
                });
                Flow::Continue
            }
            Command::Abort(handle) => {
                self.abort(multi, handle);
                Flow::Continue
            }
            Command::Shutdown => Flow::Stop,
        }
    }

    fn abort(&mut self, multi: &Multi, handle: TransportHandle) {
        if let Some(pos) = self.queued.iter().position(|q| q.handle == handle) {
            self.queued.remove(pos);
            trace!(op = %handle, "aborted before admission");
            return;
        }
        if let Some(pos) = self.active.iter().position(|a| a.handle == handle) {
            let a = self.active.remove(pos);
            if let Err(e) = multi.remove2(a.easy) {
                warn!(op = %handle, "curl multi remove on abort: {}", e);
            }
            trace!(op = %handle, "aborted in flight");
            return;
        }
        trace!(op = %handle, "abort of finished operation ignored");
    }

    /// Keep the active set full from the FIFO queue.
    fn admit(&mut self, multi: &Multi) {
        while self.active.len() < self.max_active {
            let Some(q) = self.queued.pop_front() else {
                break;
            };
            match add_to_multi(multi, &self.settings, &q.resource) {
                Ok(easy) => self.active.push(Active {
                    easy,
                    handle: q.handle,
                    completer: q.completer,
                }),
                Err(e) => {
                    warn!(op = %q.handle, url = %q.resource.url, "curl setup failed: {}", e);
                    q.completer.complete(Err(e));
                }
            }
        }
    }

    /// One perform / collect / wait round.
    fn step(&mut self, multi: &Multi) -> Result<(), curl::MultiError> {
        multi.perform()?;

        let mut finished: Vec<(usize, Result<(), curl::Error>)> = Vec::new();
        multi.messages(|msg| {
            for (i, a) in self.active.iter().enumerate() {
                if let Some(res) = msg.result_for2(&a.easy) {
                    finished.push((i, res));
                    break;
                }
            }
        });
        finished.sort_by(|a, b| b.0.cmp(&a.0));

        for (i, res) in finished {
            let a = self.active.remove(i);
            let handle = a.handle;
            let result = match multi.remove2(a.easy) {
                Ok(mut easy) => finish(&mut easy, res),
                Err(e) => Err(FetchError::Transport(format!("curl multi remove: {}", e))),
            };
            trace!(op = %handle, ok = result.is_ok(), "transfer finished");
            a.completer.complete(result);
        }

        if !self.active.is_empty() {
            multi.wait(&mut [], POLL_INTERVAL)?;
        }
        Ok(())
    }
}

/// Turn a finished transfer into the delivered result.
fn finish(easy: &mut curl::easy::Easy2<Collector>, res: Result<(), curl::Error>) -> FetchResult {
    if let Err(e) = res {
        return Err(classify_curl_error(&e));
    }
    let status = easy.response_code().map_err(|e| classify_curl_error(&e))?;
    let (lines, body) = easy.get_mut().take();
    classify_http_status(status, parse_headers(&lines), body)
}
