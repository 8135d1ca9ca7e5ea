//! Frontend and demux ioctls.
//!
//! [`FrontendDriver`] is the narrow set of driver calls the tuner makes on
//! descriptors it owns. [`LinuxDvb`] issues the real DVB v5 ioctls.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use dvb_sys as sys;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Frontend family as reported by `FE_GET_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendType {
    Qpsk,
    Qam,
    Ofdm,
    Atsc,
    Unknown(u32),
}

impl FrontendType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            sys::FE_QPSK => FrontendType::Qpsk,
            sys::FE_QAM => FrontendType::Qam,
            sys::FE_OFDM => FrontendType::Ofdm,
            sys::FE_ATSC => FrontendType::Atsc,
            other => FrontendType::Unknown(other),
        }
    }

    /// Human-readable delivery family.
    pub fn label(&self) -> &'static str {
        match self {
            FrontendType::Qpsk => "DVB-S",
            FrontendType::Qam => "DVB-C",
            FrontendType::Ofdm => "DVB-T",
            FrontendType::Atsc => "ATSC",
            FrontendType::Unknown(_) => "Unknown",
        }
    }
}

/// Subset of `struct dvb_frontend_info` the tuner looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendInfo {
    pub name: String,
    pub kind: FrontendType,
    pub caps: u32,
}

impl FrontendInfo {
    pub fn can_inversion_auto(&self) -> bool {
        self.caps & sys::FE_CAN_INVERSION_AUTO != 0
    }
}

/// `fe_status` bits carried by a frontend event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontendStatus(pub u32);

impl FrontendStatus {
    pub const LOCKED: FrontendStatus = FrontendStatus(
        sys::FE_HAS_SIGNAL
            | sys::FE_HAS_CARRIER
            | sys::FE_HAS_VITERBI
            | sys::FE_HAS_SYNC
            | sys::FE_HAS_LOCK,
    );

    pub fn has_lock(&self) -> bool {
        self.0 & sys::FE_HAS_LOCK != 0
    }
}

/// Legacy (`FE_SET_FRONTEND`) parameter block for VSB/QAM receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontendParameters {
    pub frequency: u32,
    pub inversion: u32,
    pub modulation: u32,
}

/// One `DTV_*` command and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtvProperty {
    pub cmd: u32,
    pub data: u32,
}

impl DtvProperty {
    pub const fn new(cmd: u32, data: u32) -> Self {
        Self { cmd, data }
    }

    pub const fn command(cmd: u32) -> Self {
        Self { cmd, data: 0 }
    }
}

/// Driver calls issued on tuner-owned descriptors.
pub trait FrontendDriver: Send + Sync {
    /// `FE_GET_INFO`.
    fn frontend_info(&self, fe: BorrowedFd<'_>) -> io::Result<FrontendInfo>;

    /// `FE_SET_FRONTEND`.
    fn set_frontend(&self, fe: BorrowedFd<'_>, params: &FrontendParameters) -> io::Result<()>;

    /// `FE_SET_PROPERTY` with the whole batch in one call.
    fn set_properties(&self, fe: BorrowedFd<'_>, props: &[DtvProperty]) -> io::Result<()>;

    /// Wait up to `timeout` for a frontend event to become available.
    fn wait_event(&self, fe: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool>;

    /// `FE_GET_EVENT` without blocking. `None` when the queue is empty.
    fn next_event(&self, fe: BorrowedFd<'_>) -> io::Result<Option<FrontendStatus>>;

    /// `DMX_SET_PES_FILTER`.
    fn set_pes_filter(
        &self,
        demux: BorrowedFd<'_>,
        params: &sys::dmx_pes_filter_params,
    ) -> io::Result<()>;

    /// `DMX_SET_FILTER`.
    fn set_section_filter(
        &self,
        demux: BorrowedFd<'_>,
        params: &sys::dmx_sct_filter_params,
    ) -> io::Result<()>;
}

/// Convert a wait into a poll(2) timeout, saturating at `i32::MAX` ms.
pub(crate) fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)
}

/// The Linux DVB v5 driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxDvb;

impl FrontendDriver for LinuxDvb {
    fn frontend_info(&self, fe: BorrowedFd<'_>) -> io::Result<FrontendInfo> {
        // SAFETY: dvb_frontend_info is plain data; the kernel fills it in.
        let mut info: sys::dvb_frontend_info = unsafe { std::mem::zeroed() };
        unsafe { sys::fe_get_info(fe.as_raw_fd(), &mut info) }?;

        let name: Vec<u8> = info
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        Ok(FrontendInfo {
            name: String::from_utf8_lossy(&name).into_owned(),
            kind: FrontendType::from_raw(info.type_),
            caps: info.caps,
        })
    }

    fn set_frontend(&self, fe: BorrowedFd<'_>, params: &FrontendParameters) -> io::Result<()> {
        let raw = sys::dvb_frontend_parameters {
            frequency: params.frequency,
            inversion: params.inversion,
            u: sys::dvb_frontend_parameters_u {
                vsb: sys::dvb_vsb_parameters {
                    modulation: params.modulation,
                },
            },
        };
        unsafe { sys::fe_set_frontend(fe.as_raw_fd(), &raw) }?;
        Ok(())
    }

    fn set_properties(&self, fe: BorrowedFd<'_>, props: &[DtvProperty]) -> io::Result<()> {
        if props.is_empty() || props.len() > sys::DTV_IOCTL_MAX_MSGS {
            return Err(io::Error::from(Errno::EINVAL));
        }
        let mut raw: Vec<sys::dtv_property> = props
            .iter()
            .map(|p| sys::dtv_property::with_data(p.cmd, p.data))
            .collect();
        let cmdseq = sys::dtv_properties {
            num: raw.len() as u32,
            props: raw.as_mut_ptr(),
        };
        // SAFETY: cmdseq points into `raw`, which outlives the call.
        unsafe { sys::fe_set_property(fe.as_raw_fd(), &cmdseq) }?;
        Ok(())
    }

    fn wait_event(&self, fe: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
        let mut fds = [PollFd::new(fe, PollFlags::POLLIN)];
        let ready = poll(&mut fds, poll_timeout(timeout))?;
        Ok(ready > 0
            && fds[0]
                .revents()
                .map_or(false, |r| r.contains(PollFlags::POLLIN)))
    }

    fn next_event(&self, fe: BorrowedFd<'_>) -> io::Result<Option<FrontendStatus>> {
        // SAFETY: dvb_frontend_event is plain data; the kernel fills it in.
        let mut event: sys::dvb_frontend_event = unsafe { std::mem::zeroed() };
        match unsafe { sys::fe_get_event(fe.as_raw_fd(), &mut event) } {
            Ok(_) => Ok(Some(FrontendStatus(event.status))),
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_pes_filter(
        &self,
        demux: BorrowedFd<'_>,
        params: &sys::dmx_pes_filter_params,
    ) -> io::Result<()> {
        unsafe { sys::dmx_set_pes_filter(demux.as_raw_fd(), params) }?;
        Ok(())
    }

    fn set_section_filter(
        &self,
        demux: BorrowedFd<'_>,
        params: &sys::dmx_sct_filter_params,
    ) -> io::Result<()> {
        unsafe { sys::dmx_set_filter(demux.as_raw_fd(), params) }?;
        Ok(())
    }
}
