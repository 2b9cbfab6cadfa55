// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Background monitoring of flow access for writer feedback.
//!
//! Readers never write to the flow header; instead they touch the flow's
//! `access` sentinel after each successful read. This watcher turns the
//! resulting inotify attribute events into `lastReadTime` updates, giving
//! writers read-activity feedback without putting reader-side stores on the
//! runtime block.
//!
//! Nothing in the reader or writer path depends on the watcher synchronously;
//! if it lags or fails, the only observable effect is a stale `lastReadTime`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::FlowHeader;
use crate::flow::layout::{FlowInfo, FLOW_INFO_SIZE};
use crate::flow::manager::{flow_access_file, flow_data_file, flow_directory};
use crate::shmem::{AccessMode, LockMode, SharedMemoryInstance};
use crate::time::current_tai_time;

struct WatchEntry {
    id: Uuid,
    wd: WatchDescriptor,
    header: FlowHeader,
}

struct WatcherShared {
    inotify: Inotify,
    shutdown: AtomicBool,
    watches: Mutex<Vec<WatchEntry>>,
}

/// Watches the `access` sentinels of registered flows and reflects reader
/// activity into each flow's `lastReadTime`.
///
/// Writers register their flow on creation and unregister on drop; the
/// watcher maps each flow header read-write *without* an advisory lock so it
/// never keeps a dead flow alive against garbage collection.
pub(crate) struct DomainWatcher {
    shared: Arc<WatcherShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DomainWatcher {
    pub(crate) fn new() -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK)
            .map_err(|e| Error::io("inotify_init", e.into()))?;
        let shared = Arc::new(WatcherShared {
            inotify,
            shutdown: AtomicBool::new(false),
            watches: Mutex::new(Vec::new()),
        });
        let thread = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("mxl-domain-watcher".into())
                .spawn(move || watch_loop(&shared))
                .map_err(|e| Error::io("spawn domain watcher", e))?
        };
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Starts watching a flow's `access` file. Idempotent per writer: each
    /// registration pairs with one [`Self::remove_flow`].
    pub(crate) fn add_flow(&self, domain: &Path, id: &Uuid) -> Result<()> {
        let flow_dir = flow_directory(domain, id);
        let access = flow_access_file(&flow_dir);
        let header = SharedMemoryInstance::<FlowInfo>::open(
            &flow_data_file(&flow_dir),
            AccessMode::ReadWrite,
            FLOW_INFO_SIZE - std::mem::size_of::<FlowInfo>(),
            LockMode::None,
        )?;
        let wd = self
            .shared
            .inotify
            .add_watch(&access, AddWatchFlags::IN_ATTRIB)
            .map_err(|e| Error::io(format!("watch {}", access.display()), e.into()))?;
        self.shared.watches.lock().unwrap().push(WatchEntry {
            id: *id,
            wd,
            header: FlowHeader::new(header, flow_data_file(&flow_dir)),
        });
        debug!("watching access file of flow {id}");
        Ok(())
    }

    /// Stops watching a flow. The kernel watch is only removed once the last
    /// registration for that access file is gone (inotify hands out one
    /// descriptor per path).
    pub(crate) fn remove_flow(&self, id: &Uuid) {
        let mut watches = self.shared.watches.lock().unwrap();
        let Some(position) = watches.iter().position(|entry| entry.id == *id) else {
            return;
        };
        let entry = watches.remove(position);
        let still_watched = watches.iter().any(|other| other.wd == entry.wd);
        if !still_watched {
            if let Err(e) = self.shared.inotify.rm_watch(entry.wd) {
                debug!("rm_watch for flow {id}: {e}");
            }
        }
    }

    /// Stops the background thread and drops all watches.
    pub(crate) fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DomainWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch_loop(shared: &WatcherShared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.inotify.read_events() {
            Ok(events) => {
                let now = current_tai_time();
                let watches = shared.watches.lock().unwrap();
                for event in events {
                    if !event.mask.contains(AddWatchFlags::IN_ATTRIB) {
                        continue;
                    }
                    for entry in watches.iter().filter(|entry| entry.wd == event.wd) {
                        entry.header.set_last_read_time(now);
                    }
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                warn!("inotify read failed: {e}");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
