//! Test doubles for the driver and the descriptor provider.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::time::Duration;

use dvb_sys as sys;
use nix::unistd::pipe;
use parking_lot::Mutex;

use crate::device::{DescriptorProvider, DeviceKind};
use crate::driver::{
    DtvProperty, FrontendDriver, FrontendInfo, FrontendParameters, FrontendStatus, FrontendType,
};

#[derive(Debug)]
struct DriverState {
    script: VecDeque<bool>,
    default_lock: bool,
    stale_events: u32,
    armed: bool,
    samples: usize,
    caps: u32,
    info_calls: usize,
    fail_set_frontend: bool,
    fail_set_properties: bool,
    fail_pes: bool,
    fail_section: bool,
    frontend_params: Vec<FrontendParameters>,
    property_batches: Vec<Vec<DtvProperty>>,
    pes_filters: Vec<sys::dmx_pes_filter_params>,
    section_filters: Vec<sys::dmx_sct_filter_params>,
}

/// Scriptable [`FrontendDriver`].
///
/// Each `wait_event` arms one lock sample; the following `next_event`
/// consumes the next scripted value, or the default once the script runs
/// out. Stale events are returned before any sample.
#[derive(Debug)]
pub(crate) struct MockDriver {
    state: Mutex<DriverState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState {
                script: VecDeque::new(),
                default_lock: true,
                stale_events: 0,
                armed: false,
                samples: 0,
                caps: sys::FE_CAN_8VSB | sys::FE_CAN_QAM_256 | sys::FE_CAN_INVERSION_AUTO,
                info_calls: 0,
                fail_set_frontend: false,
                fail_set_properties: false,
                fail_pes: false,
                fail_section: false,
                frontend_params: Vec::new(),
                property_batches: Vec::new(),
                pes_filters: Vec::new(),
                section_filters: Vec::new(),
            }),
        }
    }

    pub fn script_locks<I: IntoIterator<Item = bool>>(&self, locks: I) {
        self.state.lock().script.extend(locks);
    }

    pub fn set_default_lock(&self, locked: bool) {
        self.state.lock().default_lock = locked;
    }

    pub fn queue_stale_events(&self, count: u32) {
        self.state.lock().stale_events += count;
    }

    pub fn stale_events(&self) -> u32 {
        self.state.lock().stale_events
    }

    pub fn samples_taken(&self) -> usize {
        self.state.lock().samples
    }

    pub fn set_caps(&self, caps: u32) {
        self.state.lock().caps = caps;
    }

    pub fn info_calls(&self) -> usize {
        self.state.lock().info_calls
    }

    pub fn fail_set_frontend(&self, fail: bool) {
        self.state.lock().fail_set_frontend = fail;
    }

    pub fn fail_set_properties(&self, fail: bool) {
        self.state.lock().fail_set_properties = fail;
    }

    pub fn fail_pes(&self, fail: bool) {
        self.state.lock().fail_pes = fail;
    }

    pub fn fail_section(&self, fail: bool) {
        self.state.lock().fail_section = fail;
    }

    pub fn frontend_params(&self) -> Vec<FrontendParameters> {
        self.state.lock().frontend_params.clone()
    }

    pub fn property_batches(&self) -> Vec<Vec<DtvProperty>> {
        self.state.lock().property_batches.clone()
    }

    pub fn pes_filters(&self) -> Vec<sys::dmx_pes_filter_params> {
        self.state.lock().pes_filters.clone()
    }

    pub fn section_filters(&self) -> Vec<sys::dmx_sct_filter_params> {
        self.state.lock().section_filters.clone()
    }
}

fn rejected() -> io::Error {
    io::Error::from_raw_os_error(nix::libc::EINVAL)
}

impl FrontendDriver for MockDriver {
    fn frontend_info(&self, _fe: BorrowedFd<'_>) -> io::Result<FrontendInfo> {
        let mut state = self.state.lock();
        state.info_calls += 1;
        Ok(FrontendInfo {
            name: "Mock Frontend".into(),
            kind: FrontendType::Atsc,
            caps: state.caps,
        })
    }

    fn set_frontend(&self, _fe: BorrowedFd<'_>, params: &FrontendParameters) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_set_frontend {
            return Err(rejected());
        }
        state.frontend_params.push(*params);
        Ok(())
    }

    fn set_properties(&self, _fe: BorrowedFd<'_>, props: &[DtvProperty]) -> io::Result<()> {
        let mut state = self.state.lock();
        state.property_batches.push(props.to_vec());
        // DTV_CLEAR always goes through so the batch itself is what fails.
        if state.fail_set_properties && props.len() > 1 {
            return Err(rejected());
        }
        Ok(())
    }

    fn wait_event(&self, _fe: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        self.state.lock().armed = true;
        Ok(true)
    }

    fn next_event(&self, _fe: BorrowedFd<'_>) -> io::Result<Option<FrontendStatus>> {
        let mut state = self.state.lock();
        if state.stale_events > 0 {
            state.stale_events -= 1;
            return Ok(Some(FrontendStatus(sys::FE_HAS_SIGNAL)));
        }
        if !state.armed {
            return Ok(None);
        }
        state.armed = false;
        state.samples += 1;
        let locked = match state.script.pop_front() {
            Some(locked) => locked,
            None => state.default_lock,
        };
        Ok(Some(if locked {
            FrontendStatus::LOCKED
        } else {
            FrontendStatus(sys::FE_HAS_SIGNAL | sys::FE_HAS_CARRIER)
        }))
    }

    fn set_pes_filter(
        &self,
        _demux: BorrowedFd<'_>,
        params: &sys::dmx_pes_filter_params,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_pes {
            return Err(rejected());
        }
        state.pes_filters.push(*params);
        Ok(())
    }

    fn set_section_filter(
        &self,
        _demux: BorrowedFd<'_>,
        params: &sys::dmx_sct_filter_params,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_section {
            return Err(rejected());
        }
        state.section_filters.push(*params);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    opens: [usize; 3],
    refuse: [bool; 3],
    dvr_queue: VecDeque<OwnedFd>,
}

fn index(kind: DeviceKind) -> usize {
    match kind {
        DeviceKind::Frontend => 0,
        DeviceKind::Demux => 1,
        DeviceKind::Dvr => 2,
    }
}

/// [`DescriptorProvider`] backed by `/dev/null` and pipes.
///
/// DVR opens hand out queued pipe read ends first, so tests can feed
/// transport stream bytes through the write end.
#[derive(Debug, Default)]
pub(crate) struct MockProvider {
    state: Mutex<ProviderState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self, kind: DeviceKind) -> usize {
        self.state.lock().opens[index(kind)]
    }

    pub fn refuse(&self, kind: DeviceKind, refuse: bool) {
        self.state.lock().refuse[index(kind)] = refuse;
    }

    /// Queue a pipe for the next DVR open and return its write end.
    pub fn queue_dvr_pipe(&self) -> OwnedFd {
        let (read, write) = pipe().expect("pipe");
        self.state.lock().dvr_queue.push_back(read);
        write
    }

    /// Queue a DVR whose poll reports `POLLERR`: the write end of a pipe
    /// with no reader.
    pub fn queue_broken_dvr(&self) {
        let (read, write) = pipe().expect("pipe");
        drop(read);
        self.state.lock().dvr_queue.push_back(write);
    }

    fn take(&self, kind: DeviceKind) -> io::Result<OwnedFd> {
        let mut state = self.state.lock();
        if state.refuse[index(kind)] {
            return Err(io::Error::new(io::ErrorKind::NotFound, "refused"));
        }
        state.opens[index(kind)] += 1;
        if kind == DeviceKind::Dvr {
            if let Some(fd) = state.dvr_queue.pop_front() {
                return Ok(fd);
            }
        }
        Ok(OwnedFd::from(File::open("/dev/null")?))
    }
}

impl DescriptorProvider for MockProvider {
    fn open_frontend(&self) -> io::Result<OwnedFd> {
        self.take(DeviceKind::Frontend)
    }

    fn open_demux(&self) -> io::Result<OwnedFd> {
        self.take(DeviceKind::Demux)
    }

    fn open_dvr(&self) -> io::Result<OwnedFd> {
        self.take(DeviceKind::Dvr)
    }
}
