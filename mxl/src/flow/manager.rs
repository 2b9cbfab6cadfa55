// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Flow lifecycle within a domain: create, open, enumerate, delete, collect.
//!
//! The domain is a directory (typically on tmpfs) with one subdirectory per
//! flow:
//!
//! ```text
//! <domain>/
//!   options.json                     optional, not interpreted here
//!   <flow-uuid>.mxl-flow/
//!     flow_def.json                  NMOS definition blob, stored verbatim
//!     data                           2048-byte flow header (mmap'd)
//!     access                         zero-byte sentinel touched by readers
//!     grains/data.0 .. data.N-1     discrete flows
//!     channels                       continuous flows
//! ```
//!
//! Garbage collection is conservative: a flow directory is removed only when
//! a non-blocking exclusive lock on its `data` file succeeds, which proves no
//! live reader or writer holds the flow open. Crashed processes lose their
//! locks automatically, so their flows become collectable.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::{ContinuousFlowData, DiscreteFlowData, FlowData, FlowHeader};
use crate::flow::layout::{
    self, FlowInfo, GrainInfo, FLOW_INFO_SIZE, FLOW_INFO_VERSION, GRAIN_INFO_SIZE,
    GRAIN_INFO_VERSION, GRAIN_PAYLOAD_OFFSET, MAX_PLANES_PER_GRAIN,
};
use crate::shmem::{AccessMode, LockMode, SharedMemoryInstance, SharedMemorySegment};
use crate::time::{Rational, UNDEFINED_INDEX};

pub(crate) const FLOW_DIRECTORY_SUFFIX: &str = ".mxl-flow";
pub(crate) const FLOW_DATA_FILE: &str = "data";
pub(crate) const FLOW_ACCESS_FILE: &str = "access";
pub(crate) const FLOW_DEF_FILE: &str = "flow_def.json";
pub(crate) const GRAINS_DIRECTORY: &str = "grains";
pub(crate) const CHANNELS_FILE: &str = "channels";

pub(crate) fn flow_directory(domain: &Path, id: &Uuid) -> PathBuf {
    domain.join(format!("{id}{FLOW_DIRECTORY_SUFFIX}"))
}

pub(crate) fn flow_data_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(FLOW_DATA_FILE)
}

pub(crate) fn flow_access_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(FLOW_ACCESS_FILE)
}

pub(crate) fn flow_def_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(FLOW_DEF_FILE)
}

pub(crate) fn grain_file(flow_dir: &Path, index: u32) -> PathBuf {
    flow_dir.join(GRAINS_DIRECTORY).join(format!("data.{index}"))
}

pub(crate) fn channels_file(flow_dir: &Path) -> PathBuf {
    flow_dir.join(CHANNELS_FILE)
}

/// Geometry and hints for creating a discrete flow.
pub(crate) struct DiscreteCreateParams {
    pub format: u32,
    pub grain_rate: Rational,
    pub grain_count: u32,
    pub grain_payload_size: usize,
    pub total_slices: u16,
    pub slice_sizes: [u32; MAX_PLANES_PER_GRAIN],
    pub max_commit_batch_size_hint: u32,
    pub max_sync_batch_size_hint: u32,
}

/// Geometry and hints for creating a continuous flow.
pub(crate) struct ContinuousCreateParams {
    pub sample_rate: Rational,
    pub channel_count: u32,
    pub sample_word_size: usize,
    pub buffer_length: u32,
    pub max_commit_batch_size_hint: u32,
    pub max_sync_batch_size_hint: u32,
}

/// Performs flow CRUD operations within one domain. One manager per
/// instance; stateless apart from the domain path, so all operations lean on
/// filesystem atomicity.
pub(crate) struct FlowManager {
    domain: PathBuf,
}

impl FlowManager {
    pub(crate) fn new(domain: &Path) -> Result<Self> {
        let meta = std::fs::metadata(domain)
            .map_err(|e| Error::io(format!("stat domain {}", domain.display()), e))?;
        if !meta.is_dir() {
            return Err(Error::InvalidArg(format!(
                "domain {} is not a directory",
                domain.display()
            )));
        }
        Ok(Self {
            domain: domain.to_path_buf(),
        })
    }

    pub(crate) fn domain(&self) -> &Path {
        &self.domain
    }

    /// Creates a discrete flow with its grain ring, or opens it read-write if
    /// the directory already exists. Returns whether this call created it.
    pub(crate) fn create_or_open_discrete(
        &self,
        id: &Uuid,
        flow_def: &str,
        params: &DiscreteCreateParams,
    ) -> Result<(bool, DiscreteFlowData)> {
        validate_batch_hints(
            params.max_commit_batch_size_hint,
            params.max_sync_batch_size_hint,
        )?;
        if params.grain_count == 0 {
            return Err(Error::InvalidArg("grain count must be non-zero".into()));
        }
        if params.total_slices == 0 {
            return Err(Error::InvalidArg("slice count must be non-zero".into()));
        }

        let flow_dir = flow_directory(&self.domain, id);
        match std::fs::create_dir(&flow_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let data = self.open_flow(id, AccessMode::ReadWrite)?;
                return match data {
                    FlowData::Discrete(data) => Ok((false, data)),
                    FlowData::Continuous(_) => Err(Error::Conflict),
                };
            }
            Err(e) => {
                return Err(Error::io(format!("create {}", flow_dir.display()), e));
            }
        }

        let result = self.populate_discrete(&flow_dir, id, flow_def, params);
        if result.is_err() {
            // Leave no half-built flow behind; a partially initialized
            // directory would shadow future creation attempts.
            let _ = std::fs::remove_dir_all(&flow_dir);
        }
        result.map(|data| (true, data))
    }

    fn populate_discrete(
        &self,
        flow_dir: &Path,
        id: &Uuid,
        flow_def: &str,
        params: &DiscreteCreateParams,
    ) -> Result<DiscreteFlowData> {
        write_flow_sidecars(flow_dir, flow_def)?;

        let data_path = flow_data_file(flow_dir);
        let mut flow = SharedMemoryInstance::<FlowInfo>::open(
            &data_path,
            AccessMode::CreateReadWrite,
            FLOW_INFO_SIZE - std::mem::size_of::<FlowInfo>(),
            LockMode::Exclusive,
        )?;
        let inode = flow.segment().inode()?;

        // Safety: freshly created zero-filled mapping, exclusively locked.
        unsafe {
            let info = &mut *flow.get();
            info.version = FLOW_INFO_VERSION;
            info.size = FLOW_INFO_SIZE as u32;
            info.config.common.id = *id.as_bytes();
            info.config.common.format = params.format;
            info.config.common.grain_rate = params.grain_rate;
            info.config.common.max_commit_batch_size_hint = params.max_commit_batch_size_hint;
            info.config.common.max_sync_batch_size_hint = params.max_sync_batch_size_hint;
            info.config.common.payload_location = layout::PAYLOAD_LOCATION_HOST;
            info.config.common.device_index = -1;
            info.config.details.discrete.slice_sizes = params.slice_sizes;
            info.config.details.discrete.grain_count = params.grain_count;
            info.runtime.inode = inode;
        }

        let grains_dir = flow_dir.join(GRAINS_DIRECTORY);
        std::fs::create_dir(&grains_dir)
            .map_err(|e| Error::io(format!("create {}", grains_dir.display()), e))?;

        let mut grains = Vec::with_capacity(params.grain_count as usize);
        for slot in 0..params.grain_count {
            let grain = SharedMemorySegment::open(
                &grain_file(flow_dir, slot),
                AccessMode::CreateReadWrite,
                GRAIN_PAYLOAD_OFFSET + params.grain_payload_size,
                LockMode::Shared,
            )?;
            // Safety: fresh zero-filled grain mapping; no readers can attach
            // before the flow header's lock drops to shared below.
            unsafe {
                let info = &mut *(grain.base() as *mut GrainInfo);
                info.version = GRAIN_INFO_VERSION;
                info.size = GRAIN_INFO_SIZE as u32;
                info.index = UNDEFINED_INDEX;
                info.grain_size = params.grain_payload_size as u32;
                info.total_slices = params.total_slices;
            }
            grains.push(grain);
        }

        flow.segment_mut().make_shared()?;
        DiscreteFlowData::new(FlowHeader::new(flow, data_path), grains)
    }

    /// Creates a continuous flow with its channel store, or opens it
    /// read-write if the directory already exists.
    pub(crate) fn create_or_open_continuous(
        &self,
        id: &Uuid,
        flow_def: &str,
        params: &ContinuousCreateParams,
    ) -> Result<(bool, ContinuousFlowData)> {
        validate_batch_hints(
            params.max_commit_batch_size_hint,
            params.max_sync_batch_size_hint,
        )?;
        if params.channel_count == 0 || params.buffer_length == 0 || params.sample_word_size == 0 {
            return Err(Error::InvalidArg(
                "channel count, buffer length and sample size must be non-zero".into(),
            ));
        }

        let flow_dir = flow_directory(&self.domain, id);
        match std::fs::create_dir(&flow_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let data = self.open_flow(id, AccessMode::ReadWrite)?;
                return match data {
                    FlowData::Continuous(data) => Ok((false, data)),
                    FlowData::Discrete(_) => Err(Error::Conflict),
                };
            }
            Err(e) => {
                return Err(Error::io(format!("create {}", flow_dir.display()), e));
            }
        }

        let result = self.populate_continuous(&flow_dir, id, flow_def, params);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&flow_dir);
        }
        result.map(|data| (true, data))
    }

    fn populate_continuous(
        &self,
        flow_dir: &Path,
        id: &Uuid,
        flow_def: &str,
        params: &ContinuousCreateParams,
    ) -> Result<ContinuousFlowData> {
        write_flow_sidecars(flow_dir, flow_def)?;

        let data_path = flow_data_file(flow_dir);
        let mut flow = SharedMemoryInstance::<FlowInfo>::open(
            &data_path,
            AccessMode::CreateReadWrite,
            FLOW_INFO_SIZE - std::mem::size_of::<FlowInfo>(),
            LockMode::Exclusive,
        )?;
        let inode = flow.segment().inode()?;

        // Safety: freshly created zero-filled mapping, exclusively locked.
        unsafe {
            let info = &mut *flow.get();
            info.version = FLOW_INFO_VERSION;
            info.size = FLOW_INFO_SIZE as u32;
            info.config.common.id = *id.as_bytes();
            info.config.common.format = layout::DATA_FORMAT_AUDIO;
            info.config.common.grain_rate = params.sample_rate;
            info.config.common.max_commit_batch_size_hint = params.max_commit_batch_size_hint;
            info.config.common.max_sync_batch_size_hint = params.max_sync_batch_size_hint;
            info.config.common.payload_location = layout::PAYLOAD_LOCATION_HOST;
            info.config.common.device_index = -1;
            info.config.details.continuous.channel_count = params.channel_count;
            info.config.details.continuous.buffer_length = params.buffer_length;
            info.runtime.inode = inode;
        }

        let channels = SharedMemorySegment::open(
            &channels_file(flow_dir),
            AccessMode::CreateReadWrite,
            params.channel_count as usize * params.buffer_length as usize * params.sample_word_size,
            LockMode::Shared,
        )?;

        flow.segment_mut().make_shared()?;
        ContinuousFlowData::new(FlowHeader::new(flow, data_path), channels)
    }

    /// Opens an existing flow, mapping read-only for readers or read-write
    /// for writers attaching to a shared flow.
    ///
    /// The stored inode stamp is checked against the current `data` file; a
    /// mismatch surfaces as [`Error::FlowInvalid`] so the caller re-resolves
    /// the flow instead of reading stale state.
    pub(crate) fn open_flow(&self, id: &Uuid, mode: AccessMode) -> Result<FlowData> {
        let flow_dir = flow_directory(&self.domain, id);
        if !flow_dir.is_dir() {
            return Err(Error::FlowNotFound);
        }
        let data_path = flow_data_file(&flow_dir);
        let flow = SharedMemoryInstance::<FlowInfo>::open(
            &data_path,
            mode,
            FLOW_INFO_SIZE - std::mem::size_of::<FlowInfo>(),
            LockMode::Shared,
        )?;

        // Safety: the mapping is at least FLOW_INFO_SIZE bytes.
        let info = unsafe { &*flow.get() };
        if info.version != FLOW_INFO_VERSION || info.size != FLOW_INFO_SIZE as u32 {
            return Err(Error::Unknown(format!(
                "unsupported flow header version {} (size {}), supported version is {}",
                info.version, info.size, FLOW_INFO_VERSION
            )));
        }

        let header = FlowHeader::new(flow, data_path);
        if header.is_stale() {
            return Err(Error::FlowInvalid);
        }

        let format = header.info().config.common.format;
        if layout::is_discrete_data_format(format) {
            // Safety: format tag selects the discrete union variant.
            let grain_count = unsafe { header.info().config.details.discrete.grain_count };
            let mut grains = Vec::with_capacity(grain_count as usize);
            for slot in 0..grain_count {
                let grain = SharedMemorySegment::open(
                    &grain_file(&flow_dir, slot),
                    mode,
                    GRAIN_PAYLOAD_OFFSET,
                    LockMode::Shared,
                )?;
                // Safety: grain mappings hold a GrainInfo at offset 0.
                let version = unsafe { (*(grain.base() as *const GrainInfo)).version };
                if version != GRAIN_INFO_VERSION {
                    return Err(Error::Unknown(format!(
                        "unsupported grain version {version}, supported version is {GRAIN_INFO_VERSION}"
                    )));
                }
                grains.push(grain);
            }
            Ok(FlowData::Discrete(DiscreteFlowData::new(header, grains)?))
        } else {
            let channels = SharedMemorySegment::open(
                &channels_file(&flow_dir),
                mode,
                0,
                LockMode::Shared,
            )?;
            Ok(FlowData::Continuous(ContinuousFlowData::new(
                header, channels,
            )?))
        }
    }

    /// Returns the stored JSON definition of a flow.
    pub(crate) fn flow_def(&self, id: &Uuid) -> Result<String> {
        let path = flow_def_file(&flow_directory(&self.domain, id));
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FlowNotFound,
            _ => Error::io(format!("read {}", path.display()), e),
        })
    }

    /// Enumerates the flows present in the domain.
    pub(crate) fn list_flows(&self) -> Result<Vec<Uuid>> {
        let entries = std::fs::read_dir(&self.domain)
            .map_err(|e| Error::io(format!("read domain {}", self.domain.display()), e))?;
        let mut flows = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read domain entry", e))?;
            if let Some(id) = flow_id_from_dir_name(&entry.file_name()) {
                flows.push(id);
            }
        }
        flows.sort();
        Ok(flows)
    }

    /// Removes a flow directory regardless of lock state. Deleting a flow in
    /// use leaves existing mappings functional but marks them stale via the
    /// inode check on the readers' side.
    pub(crate) fn delete_flow(&self, id: &Uuid) -> Result<()> {
        let flow_dir = flow_directory(&self.domain, id);
        match std::fs::remove_dir_all(&flow_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("remove {}", flow_dir.display()), e)),
        }
    }

    /// Removes every flow directory whose `data` file can be exclusively
    /// locked without blocking, i.e. flows with no live reader or writer.
    /// Returns the IDs of the collected flows.
    pub(crate) fn garbage_collect(&self) -> Result<Vec<Uuid>> {
        let entries = std::fs::read_dir(&self.domain)
            .map_err(|e| Error::io(format!("read domain {}", self.domain.display()), e))?;
        let mut collected = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read domain entry", e))?;
            let Some(id) = flow_id_from_dir_name(&entry.file_name()) else {
                continue;
            };
            let flow_dir = entry.path();
            if self.try_collect(&flow_dir) {
                debug!("garbage collected flow {id}");
                collected.push(id);
            }
        }
        Ok(collected)
    }

    fn try_collect(&self, flow_dir: &Path) -> bool {
        use std::os::fd::AsRawFd;

        let data_path = flow_data_file(flow_dir);
        let probe = match std::fs::File::options().read(true).open(&data_path) {
            Ok(file) => Some(file),
            // A flow directory without a data file is debris from an
            // interrupted creation; collect it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("cannot probe {}: {e}", data_path.display());
                return false;
            }
        };
        if let Some(file) = &probe {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                // Somebody holds the flow open; leave it alone.
                return false;
            }
        }
        drop(probe);
        match std::fs::remove_dir_all(flow_dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to remove {}: {e}", flow_dir.display());
                false
            }
        }
    }
}

fn write_flow_sidecars(flow_dir: &Path, flow_def: &str) -> Result<()> {
    let def_path = flow_def_file(flow_dir);
    std::fs::write(&def_path, flow_def)
        .map_err(|e| Error::io(format!("write {}", def_path.display()), e))?;
    let access_path = flow_access_file(flow_dir);
    std::fs::File::create(&access_path)
        .map_err(|e| Error::io(format!("create {}", access_path.display()), e))?;
    Ok(())
}

fn validate_batch_hints(commit: u32, sync: u32) -> Result<()> {
    if commit == 0 || sync == 0 {
        return Err(Error::InvalidArg("batch size hints must be non-zero".into()));
    }
    if sync % commit != 0 {
        return Err(Error::InvalidArg(format!(
            "sync batch size hint {sync} must be a multiple of commit batch size hint {commit}"
        )));
    }
    Ok(())
}

fn flow_id_from_dir_name(name: &std::ffi::OsStr) -> Option<Uuid> {
    let name = name.to_str()?;
    let stem = name.strip_suffix(FLOW_DIRECTORY_SUFFIX)?;
    Uuid::parse_str(stem).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_paths_use_fixed_names() {
        let id = Uuid::nil();
        let dir = flow_directory(Path::new("/dev/shm/dom"), &id);
        assert_eq!(
            dir,
            PathBuf::from("/dev/shm/dom/00000000-0000-0000-0000-000000000000.mxl-flow")
        );
        assert_eq!(flow_data_file(&dir).file_name().unwrap(), "data");
        assert_eq!(grain_file(&dir, 3).file_name().unwrap(), "data.3");
        assert!(grain_file(&dir, 3).parent().unwrap().ends_with("grains"));
        assert_eq!(channels_file(&dir).file_name().unwrap(), "channels");
    }

    #[test]
    fn batch_hint_validation() {
        assert!(validate_batch_hints(1, 1).is_ok());
        assert!(validate_batch_hints(480, 1920).is_ok());
        assert!(validate_batch_hints(0, 1).is_err());
        assert!(validate_batch_hints(480, 1000).is_err());
    }
}
