//! Channel-level tuner session.
//!
//! [`TunerSession`] sits on top of a [`DvbManager`] and adds what a player
//! needs around a raw tune: per-modulation lock budgets, the default PSI
//! filters, PID validation, and a shortcut for retuning to the channel that
//! is already locked.

use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::device::DescriptorProvider;
use crate::driver::{FrontendDriver, LinuxDvb};
use crate::error::{Result, TunerError};
use crate::filter::{FilterType, MAX_PID, PAT_PID};
use crate::frontend::{LegacyModulation, SatelliteTune, TuneOutcome};
use crate::manager::DvbManager;

/// ATSC PSIP base PID.
pub const PID_ATSC_SI_BASE: u16 = 0x1FFB;
/// DVB Service Description Table PID.
pub const PID_SDT: u16 = 0x0011;

#[derive(Debug, Clone, PartialEq)]
enum Channel {
    Legacy {
        frequency: u32,
        modulation: LegacyModulation,
    },
    Satellite(SatelliteTune),
}

#[derive(Debug, Default)]
struct SessionState {
    channel: Option<Channel>,
    streaming: bool,
}

/// A [`DvbManager`] plus the channel it is tuned to.
///
/// Control calls (`tune`, `tune_dvb`, filters, `stop_tune`) are serialized;
/// [`read_ts_stream`](Self::read_ts_stream) and
/// [`set_has_pending_tune`](Self::set_has_pending_tune) never wait on them.
pub struct TunerSession<P, D = LinuxDvb> {
    manager: DvbManager<P, D>,
    state: Mutex<SessionState>,
}

impl<P, D> TunerSession<P, D>
where
    P: DescriptorProvider,
    D: FrontendDriver,
{
    pub fn new(manager: DvbManager<P, D>) -> Self {
        Self {
            manager,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn manager(&self) -> &DvbManager<P, D> {
        &self.manager
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Frequency of the channel currently tuned, if any.
    pub fn frequency(&self) -> Option<u32> {
        match &self.state.lock().channel {
            Some(Channel::Legacy { frequency, .. }) => Some(*frequency),
            Some(Channel::Satellite(request)) => Some(request.frequency),
            None => None,
        }
    }

    pub fn set_has_pending_tune(&self, pending: bool) {
        self.manager.set_has_pending_tune(pending);
    }

    fn lock_budget(&self, modulation: LegacyModulation) -> Duration {
        let config = self.manager.config();
        Duration::from_millis(match modulation {
            LegacyModulation::Vsb8 => config.vsb_tune_timeout_ms,
            LegacyModulation::Qam256 => config.qam_tune_timeout_ms,
        })
    }

    /// Tune an ATSC/QAM channel and install PAT and the PSIP base PID.
    ///
    /// Retuning to the channel already locked only reinstalls the filters.
    pub fn tune(&self, frequency: u32, modulation: &str) -> Result<TuneOutcome> {
        let modulation: LegacyModulation = modulation.parse()?;
        let mut state = self.state.lock();
        self.stop_streaming(&mut state);

        let channel = Channel::Legacy {
            frequency,
            modulation,
        };
        if state.channel.as_ref() == Some(&channel) && self.manager.is_locked() {
            debug!("[Session] Already on {} Hz {}, reopening filters", frequency, modulation);
            self.install_default_filters(PID_ATSC_SI_BASE);
            state.streaming = true;
            return Ok(TuneOutcome::Locked);
        }

        state.channel = None;
        let outcome = self
            .manager
            .tune(frequency, modulation.as_str(), self.lock_budget(modulation))?;
        self.install_default_filters(PID_ATSC_SI_BASE);
        // Only a confirmed lock may short-circuit the next tune.
        if outcome == TuneOutcome::Locked {
            state.channel = Some(channel);
        }
        state.streaming = true;
        Ok(outcome)
    }

    /// Tune a satellite transponder and install PAT and SDT.
    pub fn tune_dvb(&self, request: &SatelliteTune) -> Result<TuneOutcome> {
        let mut state = self.state.lock();
        self.stop_streaming(&mut state);

        state.channel = None;
        let budget = Duration::from_millis(self.manager.config().dvb_tune_timeout_ms);
        let outcome = self.manager.tune_dvb(request, budget)?;
        self.install_default_filters(PID_SDT);
        if outcome == TuneOutcome::Locked {
            state.channel = Some(Channel::Satellite(request.clone()));
        }
        state.streaming = true;
        Ok(outcome)
    }

    fn stop_streaming(&self, state: &mut SessionState) {
        if state.streaming {
            self.manager.close_all_pid_filters();
            state.streaming = false;
        }
    }

    fn install_default_filters(&self, si_pid: u16) {
        for pid in [PAT_PID, si_pid] {
            if let Err(e) = self.manager.start_ts_pid_filter(pid, FilterType::Other) {
                warn!("[Session] Default filter 0x{:04x} not installed: {}", pid, e);
            }
        }
    }

    fn check_pid(pid: u32) -> Result<u16> {
        if pid > MAX_PID as u32 {
            return Err(TunerError::InvalidParameter(format!(
                "PID 0x{:x} out of range",
                pid
            )));
        }
        Ok(pid as u16)
    }

    /// Add a PES filter for a PID in `0..=0x1FFF`.
    pub fn add_pid_filter(&self, pid: u32, filter_type: FilterType) -> Result<()> {
        let pid = Self::check_pid(pid)?;
        let _state = self.state.lock();
        self.manager.start_ts_pid_filter(pid, filter_type)
    }

    /// Add a section filter for a PID in `0..=0x1FFF`.
    pub fn add_section_filter(&self, pid: u32, tid: i32) -> Result<()> {
        let pid = Self::check_pid(pid)?;
        let _state = self.state.lock();
        self.manager.start_section_filter(pid, tid)
    }

    /// Release the hardware and forget the current channel.
    pub fn stop_tune(&self) {
        let mut state = self.state.lock();
        self.stop_streaming(&mut state);
        self.manager.stop_tune();
        state.channel = None;
        info!("[Session] Tuner stopped");
    }

    /// Read buffered stream data using the configured read timeout.
    pub fn read_ts_stream(&self, buf: &mut [u8]) -> Result<usize> {
        self.manager
            .read_ts_stream(buf, self.manager.config().read_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunerConfig;
    use crate::device::DeviceKind;
    use crate::frontend::DeliverySystem;
    use crate::testing::{MockDriver, MockProvider};

    fn session() -> TunerSession<MockProvider, MockDriver> {
        let config = TunerConfig {
            fe_poll_timeout_ms: 5,
            error_retry_interval_ms: 5,
            stop_delay_ms: 1,
            read_timeout_ms: 10,
            ..TunerConfig::default()
        };
        TunerSession::new(DvbManager::with_driver(
            MockProvider::new(),
            MockDriver::new(),
            config,
        ))
    }

    fn satellite() -> SatelliteTune {
        SatelliteTune {
            delivery_system: DeliverySystem::DvbS,
            frequency: 11_000_000,
            polarization: "H".into(),
            symbol_rate: 22_000_000,
            fec: "3/4".into(),
            rolloff: 0.35,
            modulation: "QPSK".into(),
        }
    }

    #[test]
    fn test_tune_installs_atsc_filters() {
        let session = session();
        session.tune(573_000_000, "8VSB").unwrap();

        let manager = session.manager();
        assert!(session.is_streaming());
        assert!(manager.filters().has_pat());
        assert_eq!(manager.filters().pids(), vec![PID_ATSC_SI_BASE]);
        assert_eq!(session.frequency(), Some(573_000_000));
    }

    #[test]
    fn test_tune_dvb_installs_sdt() {
        let session = session();
        session.tune_dvb(&satellite()).unwrap();

        let manager = session.manager();
        assert!(manager.filters().has_pat());
        assert_eq!(manager.filters().pids(), vec![PID_SDT]);
        assert_eq!(session.frequency(), Some(11_000_000));
    }

    #[test]
    fn test_same_channel_skips_retune() {
        let session = session();
        session.tune(573_000_000, "QAM256").unwrap();
        session.add_pid_filter(0x31, FilterType::Video).unwrap();

        let outcome = session.tune(573_000_000, "QAM256").unwrap();

        let manager = session.manager();
        assert_eq!(outcome, TuneOutcome::Locked);
        assert_eq!(manager.driver.frontend_params().len(), 1);
        // Program filters are dropped, PSI filters come back.
        assert_eq!(manager.filters().pids(), vec![PID_ATSC_SI_BASE]);
        assert!(manager.filters().has_pat());
    }

    #[test]
    fn test_new_channel_retunes() {
        let session = session();
        session.tune(573_000_000, "8VSB").unwrap();
        session.tune(579_000_000, "8VSB").unwrap();
        session.tune(579_000_000, "QAM256").unwrap();

        let params = session.manager().driver.frontend_params();
        assert_eq!(params.len(), 3);
        assert_eq!(params[2].frequency, 579_000_000);
    }

    #[test]
    fn test_failed_tune_forgets_channel() {
        let session = session();
        session.tune(573_000_000, "8VSB").unwrap();

        session.manager().driver.fail_set_frontend(true);
        assert!(session.tune(579_000_000, "8VSB").is_err());
        assert_eq!(session.frequency(), None);
        assert!(!session.is_streaming());

        session.manager().driver.fail_set_frontend(false);
        session.tune(579_000_000, "8VSB").unwrap();
        assert_eq!(session.manager().driver.frontend_params().len(), 2);
    }

    #[test]
    fn test_superseded_tune_is_not_remembered() {
        let session = session();
        session.manager().driver.set_default_lock(false);
        let pending = session.manager().pending_tune();

        let outcome = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                pending.set(true);
            });
            session.tune(573_000_000, "8VSB").unwrap()
        });
        assert_eq!(outcome, TuneOutcome::Superseded);
        assert_eq!(session.frequency(), None);

        session.set_has_pending_tune(false);
        session.manager().driver.set_default_lock(true);
        let outcome = session.tune(573_000_000, "8VSB").unwrap();

        // The hardware is programmed again instead of trusting the hand-off.
        assert_eq!(outcome, TuneOutcome::Locked);
        assert_eq!(session.manager().driver.frontend_params().len(), 2);
        assert_eq!(session.frequency(), Some(573_000_000));
    }

    #[test]
    fn test_lock_budget_per_modulation() {
        let session = session();
        assert_eq!(
            session.lock_budget(LegacyModulation::Vsb8),
            Duration::from_millis(2000)
        );
        assert_eq!(
            session.lock_budget(LegacyModulation::Qam256),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_pid_range_checked() {
        let session = session();
        assert!(matches!(
            session.add_pid_filter(0x2000, FilterType::Other),
            Err(TunerError::InvalidParameter(_))
        ));
        assert!(matches!(
            session.add_section_filter(0x2000, 0x42),
            Err(TunerError::InvalidParameter(_))
        ));
        assert_eq!(session.manager().provider.opens(DeviceKind::Demux), 0);

        session.add_pid_filter(0x1FFF, FilterType::Other).unwrap();
        session.add_section_filter(0x11, 0x42).unwrap();
    }

    #[test]
    fn test_stop_tune_forgets_channel() {
        let session = session();
        session.tune(573_000_000, "8VSB").unwrap();
        session.stop_tune();

        assert!(!session.is_streaming());
        assert_eq!(session.frequency(), None);
        assert!(!session.manager().is_frontend_open());

        // The same channel is programmed again after a stop.
        session.tune(573_000_000, "8VSB").unwrap();
        assert_eq!(session.manager().driver.frontend_params().len(), 2);
    }

    #[test]
    fn test_read_uses_configured_timeout() {
        let session = session();
        let _writer = session.manager().provider.queue_dvr_pipe();
        session.tune(573_000_000, "8VSB").unwrap();

        let mut buf = [0u8; 188];
        assert_eq!(session.read_ts_stream(&mut buf).unwrap(), 0);
    }
}
