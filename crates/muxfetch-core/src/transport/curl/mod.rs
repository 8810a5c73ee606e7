//! HTTP transport backed by one `curl::multi` handle on a dedicated thread.
//!
//! `start` and `abort` only post commands to the worker thread and return at
//! once; completions are delivered from the worker thread. At most
//! `max_concurrent` transfers are active, later starts wait in FIFO order.

mod easy;
mod handler;
mod worker;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::config::TransportConfig;
use crate::resource::Resource;
use crate::response::FetchError;

use super::{Completer, Transport, TransportHandle};
use easy::EasySettings;
use worker::{Command, Worker};

pub struct CurlTransport {
    commands: Sender<Command>,
    next_id: AtomicU64,
}

impl CurlTransport {
    /// Spawn the worker thread.
    pub fn spawn(max_concurrent: usize, config: &TransportConfig) -> Result<Self> {
        let settings = EasySettings::from_config(config);
        let (tx, rx) = mpsc::channel();
        // Easy2 handles are not Send, so the worker is built on its own thread.
        thread::Builder::new()
            .name("muxfetch-curl".to_string())
            .spawn(move || Worker::new(rx, settings, max_concurrent).run())
            .context("spawn curl transport thread")?;
        tracing::debug!(max_concurrent, "curl transport started");
        Ok(Self {
            commands: tx,
            next_id: AtomicU64::new(0),
        })
    }
}

impl Transport for CurlTransport {
    fn start(&self, resource: &Resource, completer: Completer) -> TransportHandle {
        let handle = TransportHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let cmd = Command::Start {
            handle,
            resource: resource.clone(),
            completer,
        };
        if let Err(mpsc::SendError(cmd)) = self.commands.send(cmd) {
            if let Command::Start { completer, .. } = cmd {
                completer.complete(Err(FetchError::Transport(
                    "curl transport thread is not running".to_string(),
                )));
            }
        }
        handle
    }

    fn abort(&self, handle: TransportHandle) {
        let _ = self.commands.send(Command::Abort(handle));
    }
}

impl Drop for CurlTransport {
    fn drop(&mut self) {
        // Not joined: the last engine reference may be released on the worker
        // thread itself, from inside a completion.
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for CurlTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurlTransport")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
