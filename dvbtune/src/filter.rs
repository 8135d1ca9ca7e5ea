//! PID and section filter table.
//!
//! Each installed filter is a demux descriptor; dropping it removes the
//! filter from the hardware. The PAT filter is kept in its own slot so a
//! channel change can drop every other filter while keeping PAT running.

use std::collections::BTreeMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use dvb_sys as sys;
use log::debug;
use parking_lot::{Mutex, MutexGuard};

/// PID of the Program Association Table.
pub const PAT_PID: u16 = 0x0000;
/// Highest valid packet identifier.
pub const MAX_PID: u16 = 0x1FFF;

/// Stream classification of a PES filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterType {
    #[default]
    Other,
    Audio,
    Video,
    Pcr,
}

impl FilterType {
    /// Map a caller tag (0 other, 1 audio, 2 video, 3 PCR). Unknown tags are
    /// treated as other.
    pub fn from_tag(tag: i32) -> Self {
        match tag {
            1 => FilterType::Audio,
            2 => FilterType::Video,
            3 => FilterType::Pcr,
            _ => FilterType::Other,
        }
    }

    fn pes_type(&self) -> u32 {
        match self {
            FilterType::Audio => sys::DMX_PES_AUDIO,
            FilterType::Video => sys::DMX_PES_VIDEO,
            FilterType::Pcr => sys::DMX_PES_PCR,
            FilterType::Other => sys::DMX_PES_OTHER,
        }
    }
}

/// PES filter tapping the given PID into the DVR stream.
pub(crate) fn pes_filter_params(pid: u16, filter_type: FilterType) -> sys::dmx_pes_filter_params {
    sys::dmx_pes_filter_params {
        pid,
        input: sys::DMX_IN_FRONTEND,
        output: sys::DMX_OUT_TS_TAP,
        pes_type: filter_type.pes_type(),
        flags: sys::DMX_CHECK_CRC | sys::DMX_IMMEDIATE_START,
    }
}

/// Section filter on `pid`, matching a single table id when `0 < tid < 0x100`.
pub(crate) fn section_filter_params(pid: u16, tid: i32) -> sys::dmx_sct_filter_params {
    let mut params = sys::dmx_sct_filter_params {
        pid,
        timeout: 0,
        flags: sys::DMX_IMMEDIATE_START | sys::DMX_CHECK_CRC,
        ..Default::default()
    };
    if tid > 0 && tid < 0x100 {
        params.filter.filter[0] = tid as u8;
        params.filter.mask[0] = 0xff;
    }
    params
}

/// The descriptors behind the installed filters.
#[derive(Debug, Default)]
pub struct FilterSlots {
    pids: BTreeMap<u16, OwnedFd>,
    pat: Option<OwnedFd>,
}

impl FilterSlots {
    /// Whether installing `pid` again would be a no-op.
    pub fn is_installed(&self, pid: u16) -> bool {
        self.pids.contains_key(&pid) || (pid == PAT_PID && self.pat.is_some())
    }

    /// Store a programmed filter, in the PAT slot or the general table.
    pub(crate) fn record(&mut self, pid: u16, fd: OwnedFd) {
        if pid == PAT_PID {
            self.pat = Some(fd);
        } else {
            self.pids.insert(pid, fd);
        }
    }

    /// Close every general filter. Returns how many were closed.
    pub(crate) fn close_pids(&mut self) -> usize {
        let count = self.pids.len();
        self.pids.clear();
        count
    }

    /// Close the PAT filter. Returns whether one was open.
    pub(crate) fn close_pat(&mut self) -> bool {
        self.pat.take().is_some()
    }

    /// Number of filters in the general table.
    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn has_pat(&self) -> bool {
        self.pat.is_some()
    }

    /// PIDs in the general table, ascending.
    pub fn pids(&self) -> Vec<u16> {
        self.pids.keys().copied().collect()
    }

    /// Raw descriptor of an installed filter, for diagnostics.
    pub fn descriptor(&self, pid: u16) -> Option<RawFd> {
        if pid == PAT_PID {
            if let Some(fd) = &self.pat {
                return Some(fd.as_raw_fd());
            }
        }
        self.pids.get(&pid).map(|fd| fd.as_raw_fd())
    }
}

/// Mutex-guarded [`FilterSlots`].
///
/// Every read and every read-modify-write of the table goes through
/// [`FilterTable::lock`].
#[derive(Debug, Default)]
pub struct FilterTable {
    slots: Mutex<FilterSlots>,
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, FilterSlots> {
        self.slots.lock()
    }

    /// Close the PAT filter only.
    pub(crate) fn close_pat(&self) -> bool {
        let closed = self.lock().close_pat();
        if closed {
            debug!("[Filter] Closed PAT filter");
        }
        closed
    }
}
