//! Transport stream reads from the DVR device.

use std::os::fd::AsRawFd;
use std::time::Duration;

use log::{debug, trace};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd;

use crate::device::DescriptorProvider;
use crate::driver::{poll_timeout, FrontendDriver};
use crate::error::{Result, TunerError};
use crate::manager::DvbManager;

impl<P, D> DvbManager<P, D>
where
    P: DescriptorProvider,
    D: FrontendDriver,
{
    /// Read whatever the DVR has buffered, waiting up to `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. Without a lock the call
    /// backs off for the retry interval and fails with
    /// [`TunerError::NotLocked`] without touching any descriptor.
    pub fn read_ts_stream(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_locked() {
            std::thread::sleep(self.config.error_retry_interval());
            return Err(TunerError::NotLocked);
        }

        self.demux.lock().open(&self.provider)?;
        let mut dvr = self.dvr.lock();
        let fd = dvr.open(&self.provider)?;

        let failure = {
            let mut fds = [PollFd::new(
                fd,
                PollFlags::POLLIN | PollFlags::POLLPRI | PollFlags::POLLERR,
            )];
            match poll(&mut fds, poll_timeout(timeout)) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                    if revents.contains(PollFlags::POLLERR) {
                        Some(Errno::EIO)
                    } else {
                        None
                    }
                }
                Err(e) => Some(e),
            }
        };

        if let Some(e) = failure {
            debug!("[Reader] Can't read DVR: {}", e);
            dvr.close();
            drop(dvr);
            std::thread::sleep(self.config.error_retry_interval());
            return Err(TunerError::StreamError(e.into()));
        }

        match unistd::read(fd.as_raw_fd(), buf) {
            Ok(n) => {
                trace!("[Reader] Read {} bytes", n);
                Ok(n)
            }
            Err(Errno::EAGAIN) => Ok(0),
            Err(e) => Err(TunerError::StreamError(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TunerConfig;
    use crate::device::DeviceKind;
    use crate::error::TunerError;
    use crate::manager::DvbManager;
    use crate::testing::{MockDriver, MockProvider};
    use std::time::{Duration, Instant};

    fn manager() -> DvbManager<MockProvider, MockDriver> {
        let config = TunerConfig {
            fe_poll_timeout_ms: 5,
            error_retry_interval_ms: 20,
            ..TunerConfig::default()
        };
        DvbManager::with_driver(MockProvider::new(), MockDriver::new(), config)
    }

    #[test]
    fn test_read_without_lock_backs_off() {
        let manager = manager();
        let mut buf = [0u8; 188];

        let started = Instant::now();
        let result = manager.read_ts_stream(&mut buf, Duration::from_millis(100));

        assert!(matches!(result, Err(TunerError::NotLocked)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(manager.provider.opens(DeviceKind::Dvr), 0);
        assert_eq!(manager.provider.opens(DeviceKind::Demux), 0);
    }

    #[test]
    fn test_read_delivers_buffered_packets() {
        let manager = manager();
        let writer = manager.provider.queue_dvr_pipe();
        manager
            .tune(573_000_000, "8VSB", Duration::from_secs(2))
            .unwrap();

        let packet = [0x47u8; 188];
        nix::unistd::write(&writer, &packet).unwrap();

        let mut buf = [0u8; 1024];
        let n = manager
            .read_ts_stream(&mut buf, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 188);
        assert_eq!(&buf[..n], &packet[..]);
        // The reader brings the shared demux up lazily.
        assert!(manager.is_demux_open());
    }

    #[test]
    fn test_read_timeout_returns_zero() {
        let manager = manager();
        let _writer = manager.provider.queue_dvr_pipe();
        manager
            .tune(573_000_000, "8VSB", Duration::from_secs(2))
            .unwrap();

        let mut buf = [0u8; 188];
        let n = manager
            .read_ts_stream(&mut buf, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 0);
        assert!(manager.is_dvr_open());
    }

    #[test]
    fn test_read_reopens_dvr_after_close() {
        let manager = manager();
        manager
            .tune(573_000_000, "8VSB", Duration::from_secs(2))
            .unwrap();
        manager.close_all_pid_filters();
        assert!(!manager.is_dvr_open());

        let writer = manager.provider.queue_dvr_pipe();
        nix::unistd::write(&writer, &[0x47u8; 188]).unwrap();

        let mut buf = [0u8; 188];
        let n = manager
            .read_ts_stream(&mut buf, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 188);
        assert_eq!(manager.provider.opens(DeviceKind::Dvr), 2);
    }

    #[test]
    fn test_read_error_closes_dvr() {
        let manager = manager();
        manager.provider.queue_broken_dvr();
        manager
            .tune(573_000_000, "8VSB", Duration::from_secs(2))
            .unwrap();
        assert!(manager.is_dvr_open());

        let mut buf = [0u8; 188];
        let started = Instant::now();
        let result = manager.read_ts_stream(&mut buf, Duration::from_millis(500));
        assert!(matches!(result, Err(TunerError::StreamError(_))));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!manager.is_dvr_open());

        // The next read opens a fresh DVR.
        let writer = manager.provider.queue_dvr_pipe();
        nix::unistd::write(&writer, &[0x47u8; 188]).unwrap();
        let n = manager
            .read_ts_stream(&mut buf, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 188);
        assert_eq!(manager.provider.opens(DeviceKind::Dvr), 2);
    }
}
