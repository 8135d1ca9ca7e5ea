//! Tuner state machine and descriptor lifecycle.
//!
//! [`DvbManager`] owns every descriptor of one adapter: frontend, the shared
//! demux, DVR, and one demux descriptor per installed filter. It is shared
//! between a control thread (tune, stop, filters) and a data thread
//! ([`read_ts_stream`](DvbManager::read_ts_stream)).
//!
//! Lock order: the filter table before the demux or DVR slot. The frontend
//! slot is held for the whole of a tune and is never taken together with
//! another slot.

use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::config::TunerConfig;
use crate::device::{open_device, DescriptorProvider, DeviceKind, DeviceSlot};
use crate::driver::{DtvProperty, FrontendDriver, LinuxDvb};
use crate::error::{Result, TunerError};
use crate::filter::{
    pes_filter_params, section_filter_params, FilterSlots, FilterTable, FilterType,
};
use crate::frontend::{
    drain_stale_events, intermediate_frequency, wait_for_lock, LegacyModulation, LockWait,
    PendingTune, SatelliteTune, TuneOutcome,
};

/// Owner of one DVB adapter's descriptors and tuning state.
pub struct DvbManager<P, D = LinuxDvb> {
    pub(crate) provider: P,
    pub(crate) driver: D,
    pub(crate) config: TunerConfig,
    pub(crate) frontend: Mutex<DeviceSlot>,
    pub(crate) demux: Mutex<DeviceSlot>,
    pub(crate) dvr: Mutex<DeviceSlot>,
    pub(crate) filters: FilterTable,
    pub(crate) locked: AtomicBool,
    pub(crate) pending: PendingTune,
}

impl<P: DescriptorProvider> DvbManager<P, LinuxDvb> {
    /// Manager driving real hardware.
    pub fn new(provider: P, config: TunerConfig) -> Self {
        Self::with_driver(provider, LinuxDvb, config)
    }
}

impl<P, D> DvbManager<P, D>
where
    P: DescriptorProvider,
    D: FrontendDriver,
{
    pub fn with_driver(provider: P, driver: D, config: TunerConfig) -> Self {
        Self {
            provider,
            driver,
            config,
            frontend: Mutex::new(DeviceSlot::new(DeviceKind::Frontend)),
            demux: Mutex::new(DeviceSlot::new(DeviceKind::Demux)),
            dvr: Mutex::new(DeviceSlot::new(DeviceKind::Dvr)),
            filters: FilterTable::new(),
            locked: AtomicBool::new(false),
            pending: PendingTune::new(),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// A handle on the pending-tune flag, for callers on other threads.
    pub fn pending_tune(&self) -> PendingTune {
        self.pending.clone()
    }

    pub fn set_has_pending_tune(&self, pending: bool) {
        debug!("[Manager] Pending tune: {}", pending);
        self.pending.set(pending);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    /// Direct access to the filter table. The guard blocks every filter
    /// operation while held.
    pub(crate) fn filters(&self) -> MutexGuard<'_, FilterSlots> {
        self.filters.lock()
    }

    pub fn is_frontend_open(&self) -> bool {
        self.frontend.lock().is_open()
    }

    pub fn is_demux_open(&self) -> bool {
        self.demux.lock().is_open()
    }

    pub fn is_dvr_open(&self) -> bool {
        self.dvr.lock().is_open()
    }

    /// Close everything but the frontend and clear the lock state.
    pub fn reset_except_fe(&self) {
        self.set_locked(false);
        self.dvr.lock().close();
        self.demux.lock().close();
        self.close_all_pid_filters();
        self.close_pat_filter();
    }

    /// Close every descriptor.
    pub fn reset(&self) {
        self.reset_except_fe();
        self.frontend.lock().close();
    }

    /// Full reset followed by the settle delay.
    pub fn stop_tune(&self) {
        info!("[Manager] Stopping tune");
        self.reset();
        std::thread::sleep(self.config.stop_delay());
    }

    /// Tune an ATSC/QAM receiver with `FE_SET_FRONTEND`.
    ///
    /// `modulation` is `"8VSB"` or `"QAM256"`; anything else is rejected
    /// before the hardware is touched.
    pub fn tune(&self, frequency: u32, modulation: &str, timeout: Duration) -> Result<TuneOutcome> {
        let modulation: LegacyModulation = modulation.parse()?;
        self.reset_except_fe();
        if self.pending.is_pending() {
            return Err(TunerError::TuneInProgress);
        }

        let mut frontend = self.frontend.lock();
        let fe = frontend.open(&self.provider)?;
        let inversion_auto = match self.driver.frontend_info(fe) {
            Ok(fe_info) => {
                info!(
                    "[Manager] Using frontend \"{}\", type {}",
                    fe_info.name,
                    fe_info.kind.label()
                );
                fe_info.can_inversion_auto()
            }
            Err(e) => {
                debug!("[Manager] FE_GET_INFO failed, assuming auto inversion: {}", e);
                true
            }
        };

        let params = modulation.parameters(frequency, inversion_auto);
        info!(
            "[Manager] Tuning {} Hz, {} (inversion {})",
            frequency,
            modulation,
            if inversion_auto { "auto" } else { "off" }
        );
        self.driver
            .set_frontend(fe, &params)
            .map_err(|e| TunerError::program("FE_SET_FRONTEND", e))?;

        let outcome = wait_for_lock(&self.driver, fe, &self.pending, timeout, self.lock_wait())?;
        drop(frontend);
        self.finish_tune(outcome);
        Ok(outcome)
    }

    /// Tune a DVB-S/S2 receiver with one `FE_SET_PROPERTY` batch.
    pub fn tune_dvb(&self, request: &SatelliteTune, timeout: Duration) -> Result<TuneOutcome> {
        let props = request.properties()?;
        self.reset_except_fe();
        if self.pending.is_pending() {
            return Err(TunerError::TuneInProgress);
        }

        let mut frontend = self.frontend.lock();
        let fe = frontend.open(&self.provider)?;
        match self.driver.frontend_info(fe) {
            Ok(fe_info) => info!(
                "[Manager] Using frontend \"{}\", type {}",
                fe_info.name,
                fe_info.kind.label()
            ),
            Err(e) => debug!("[Manager] FE_GET_INFO failed: {}", e),
        }

        if let Err(e) = self
            .driver
            .set_properties(fe, &[DtvProperty::command(dvb_sys::DTV_CLEAR)])
        {
            warn!("[Manager] DTV_CLEAR failed: {}", e);
        }
        drain_stale_events(&self.driver, fe, self.config.max_stale_events);

        info!(
            "[Manager] Tuning {:?} {} kHz (IF {} kHz), pol {}, {} sym/s, fec {}, {}",
            request.delivery_system,
            request.frequency,
            intermediate_frequency(request.frequency),
            request.polarization,
            request.symbol_rate,
            request.fec,
            request.modulation
        );
        self.driver
            .set_properties(fe, &props)
            .map_err(|e| TunerError::program("FE_SET_PROPERTY", e))?;

        let outcome = wait_for_lock(&self.driver, fe, &self.pending, timeout, self.lock_wait())?;
        drop(frontend);
        self.finish_tune(outcome);
        Ok(outcome)
    }

    fn lock_wait(&self) -> LockWait {
        LockWait::from(&self.config)
    }

    fn finish_tune(&self, outcome: TuneOutcome) {
        self.set_locked(true);
        if outcome == TuneOutcome::Locked {
            if let Err(e) = self.dvr.lock().open(&self.provider) {
                // The reader reopens it lazily.
                warn!("[Manager] {}", e);
            }
        }
    }

    /// Install a PES filter for `pid` on a demux descriptor of its own.
    pub fn start_ts_pid_filter(&self, pid: u16, filter_type: FilterType) -> Result<()> {
        let mut filters = self.filters.lock();
        if filters.is_installed(pid) {
            return Ok(());
        }
        if self.pending.is_pending() {
            return Err(TunerError::TuneInProgress);
        }

        let demux = open_device(&self.provider, DeviceKind::Demux)?;
        let params = pes_filter_params(pid, filter_type);
        // On failure `demux` is dropped, which closes it.
        self.driver
            .set_pes_filter(demux.as_fd(), &params)
            .map_err(|e| TunerError::program("DMX_SET_PES_FILTER", e))?;

        debug!("[Manager] PES filter on PID 0x{:04x} ({:?})", pid, filter_type);
        filters.record(pid, demux);
        Ok(())
    }

    /// Install a section filter for `pid` on the shared demux descriptor.
    ///
    /// A table id in `1..0x100` restricts the filter to that table.
    pub fn start_section_filter(&self, pid: u16, tid: i32) -> Result<()> {
        let mut filters = self.filters.lock();
        if filters.is_installed(pid) {
            return Ok(());
        }
        if self.pending.is_pending() {
            return Err(TunerError::TuneInProgress);
        }

        let mut demux = self.demux.lock();
        let fd = demux.reopen(&self.provider)?;
        let params = section_filter_params(pid, tid);
        if let Err(e) = self.driver.set_section_filter(fd, &params) {
            demux.close();
            return Err(TunerError::program("DMX_SET_FILTER", e));
        }
        let filter = fd
            .try_clone_to_owned()
            .map_err(|e| TunerError::program("dup", e))?;

        debug!("[Manager] Section filter on PID 0x{:04x}, table 0x{:02x}", pid, tid);
        filters.record(pid, filter);
        Ok(())
    }

    /// Close every PID filter except PAT, then the DVR so the next channel
    /// starts without stale data.
    pub fn close_all_pid_filters(&self) {
        let mut filters = self.filters.lock();
        let closed = filters.close_pids();
        if closed > 0 {
            debug!("[Manager] Closed {} PID filters", closed);
        }
        self.dvr.lock().close();
    }

    pub fn close_pat_filter(&self) {
        self.filters.close_pat();
    }
}

impl<P, D> Drop for DvbManager<P, D> {
    fn drop(&mut self) {
        // Same order as reset().
        self.dvr.get_mut().close();
        self.demux.get_mut().close();
        let filters = self.filters.lock().close_pids();
        self.filters.close_pat();
        self.frontend.get_mut().close();
        debug!("[Manager] Released adapter ({} PID filters)", filters);
    }
}
