//! Device descriptors: where they come from and who owns them.
//!
//! The tuner never opens `/dev/dvb/...` on its own account. It asks a
//! [`DescriptorProvider`] for each of the three devices and keeps the
//! returned descriptor in a [`DeviceSlot`] until it is closed again.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use log::debug;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::{Result, TunerError};

/// The three character devices of a DVB adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Frontend,
    Demux,
    Dvr,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Frontend => "frontend",
            DeviceKind::Demux => "demux",
            DeviceKind::Dvr => "dvr",
        };
        f.write_str(name)
    }
}

/// Source of device descriptors.
///
/// Implementations may reach out to a privileged broker; the tuner only
/// relies on getting an owned descriptor back.
pub trait DescriptorProvider: Send + Sync {
    fn open_frontend(&self) -> io::Result<OwnedFd>;
    fn open_demux(&self) -> io::Result<OwnedFd>;
    fn open_dvr(&self) -> io::Result<OwnedFd>;

    /// Dispatch on the device kind.
    fn open(&self, kind: DeviceKind) -> io::Result<OwnedFd> {
        match kind {
            DeviceKind::Frontend => self.open_frontend(),
            DeviceKind::Demux => self.open_demux(),
            DeviceKind::Dvr => self.open_dvr(),
        }
    }
}

/// Opens the devices of `/dev/dvb/adapterN` directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProvider {
    pub adapter: u32,
    pub frontend: u32,
}

impl AdapterProvider {
    pub fn new(adapter: u32, frontend: u32) -> Self {
        Self { adapter, frontend }
    }

    /// Parse a device specification.
    ///
    /// Two forms are accepted:
    /// 1. (full) `/dev/dvb/adapter2/frontend0`
    /// 2. (abbr.) `2|0`
    pub fn from_spec(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some((adapter, frontend)) = spec.split_once('|') {
            return Some(Self::new(
                adapter.trim().parse().ok()?,
                frontend.trim().parse().ok()?,
            ));
        }

        let rest = spec.strip_prefix("/dev/dvb/adapter")?;
        let (adapter, frontend) = rest.split_once('/')?;
        let frontend = frontend.strip_prefix("frontend")?;
        Some(Self::new(adapter.parse().ok()?, frontend.parse().ok()?))
    }

    /// Path of one of the adapter's devices.
    pub fn path(&self, kind: DeviceKind) -> PathBuf {
        PathBuf::from(format!(
            "/dev/dvb/adapter{}/{}{}",
            self.adapter, kind, self.frontend
        ))
    }

    fn open_path(&self, kind: DeviceKind, write: bool) -> io::Result<OwnedFd> {
        let path = self.path(kind);
        let file = OpenOptions::new().read(true).write(write).open(&path)?;
        debug!("[Device] Opened {:?}", path);
        Ok(OwnedFd::from(file))
    }
}

impl DescriptorProvider for AdapterProvider {
    fn open_frontend(&self) -> io::Result<OwnedFd> {
        self.open_path(DeviceKind::Frontend, true)
    }

    fn open_demux(&self) -> io::Result<OwnedFd> {
        self.open_path(DeviceKind::Demux, true)
    }

    fn open_dvr(&self) -> io::Result<OwnedFd> {
        self.open_path(DeviceKind::Dvr, false)
    }
}

/// Adapts a broker callback that hands out raw descriptors.
///
/// The callback returns a negative value on failure. A non-negative value is
/// a descriptor whose ownership passes to the tuner.
pub struct BrokerProvider<F> {
    open: F,
}

impl<F> BrokerProvider<F>
where
    F: Fn(DeviceKind) -> RawFd + Send + Sync,
{
    pub fn new(open: F) -> Self {
        Self { open }
    }

    fn take(&self, kind: DeviceKind) -> io::Result<OwnedFd> {
        let fd = (self.open)(kind);
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("broker refused {} device ({})", kind, fd),
            ));
        }
        // SAFETY: the broker transfers ownership of a freshly opened descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl<F> DescriptorProvider for BrokerProvider<F>
where
    F: Fn(DeviceKind) -> RawFd + Send + Sync,
{
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

/// Switch a descriptor to non-blocking mode.
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Ask the provider for a device and make it non-blocking.
pub(crate) fn open_device<P>(provider: &P, kind: DeviceKind) -> Result<OwnedFd>
where
    P: DescriptorProvider + ?Sized,
{
    let unavailable = |source| TunerError::DescriptorUnavailable {
        device: kind,
        source,
    };
    let fd = provider.open(kind).map_err(unavailable)?;
    set_nonblocking(fd.as_fd()).map_err(unavailable)?;
    Ok(fd)
}

/// A descriptor that is either closed or owned by the tuner.
///
/// Dropping the slot closes the descriptor.
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    kind: DeviceKind,
    fd: Option<OwnedFd>,
}

impl DeviceSlot {
    pub(crate) fn new(kind: DeviceKind) -> Self {
        Self { kind, fd: None }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Open the device unless it is already open.
    pub(crate) fn open<P>(&mut self, provider: &P) -> Result<BorrowedFd<'_>>
    where
        P: DescriptorProvider + ?Sized,
    {
        let fd = match self.fd.take() {
            Some(fd) => fd,
            None => open_device(provider, self.kind)?,
        };
        let fd: &OwnedFd = self.fd.insert(fd);
        Ok(fd.as_fd())
    }

    /// Replace whatever is open with a freshly opened descriptor.
    pub(crate) fn reopen<P>(&mut self, provider: &P) -> Result<BorrowedFd<'_>>
    where
        P: DescriptorProvider + ?Sized,
    {
        self.close();
        self.open(provider)
    }

    /// Close the descriptor. Returns whether anything was open.
    pub(crate) fn close(&mut self) -> bool {
        match self.fd.take() {
            Some(fd) => {
                debug!("[Device] Closing {} (fd={})", self.kind, fd.as_raw_fd());
                true
            }
            None => false,
        }
    }
}
