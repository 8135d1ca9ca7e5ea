//! Frontend tuning engine.
//!
//! This module provides:
//! - The parameter mapping for the legacy (`FE_SET_FRONTEND`) protocol used
//!   by ATSC/QAM receivers
//! - The property batch for DVB-S/S2 receivers, including LNB frequency
//!   translation
//! - [`PendingTune`], the cancellation flag shared with the caller
//! - The lock-polling loop both protocols finish with

use std::fmt;
use std::os::fd::BorrowedFd;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dvb_sys as sys;
use log::{debug, info, trace, warn};

use crate::config::TunerConfig;
use crate::driver::{DtvProperty, FrontendDriver, FrontendParameters};
use crate::error::{Result, TunerError};

/// LNB band switch frequency.
pub const SLOF: u32 = 11_700_000;
/// Low-band local oscillator.
pub const LOF1: u32 = 9_750_000;
/// High-band local oscillator.
pub const LOF2: u32 = 10_600_000;

/// Translate a satellite downlink frequency into the intermediate frequency
/// the frontend is programmed with.
pub fn intermediate_frequency(frequency: u32) -> u32 {
    if frequency >= SLOF {
        frequency - LOF2
    } else if frequency < LOF1 {
        LOF1 - frequency
    } else {
        frequency - LOF1
    }
}

/// Modulations accepted by the legacy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyModulation {
    Vsb8,
    Qam256,
}

impl LegacyModulation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyModulation::Vsb8 => "8VSB",
            LegacyModulation::Qam256 => "QAM256",
        }
    }

    fn raw(&self) -> u32 {
        match self {
            LegacyModulation::Vsb8 => sys::VSB_8,
            LegacyModulation::Qam256 => sys::QAM_256,
        }
    }

    /// Legacy parameter block. Inversion is AUTO unless the frontend cannot
    /// do it.
    pub(crate) fn parameters(&self, frequency: u32, inversion_auto: bool) -> FrontendParameters {
        FrontendParameters {
            frequency,
            inversion: if inversion_auto {
                sys::INVERSION_AUTO
            } else {
                sys::INVERSION_OFF
            },
            modulation: self.raw(),
        }
    }
}

impl FromStr for LegacyModulation {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "8VSB" => Ok(LegacyModulation::Vsb8),
            "QAM256" => Ok(LegacyModulation::Qam256),
            other => Err(TunerError::InvalidParameter(format!(
                "unrecognized modulation mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LegacyModulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Satellite delivery system. A closed two-way choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySystem {
    DvbS,
    DvbS2,
}

impl DeliverySystem {
    /// Map a caller selector: `2` is DVB-S, anything else DVB-S2.
    pub fn from_selector(selector: i32) -> Self {
        if selector == 2 {
            DeliverySystem::DvbS
        } else {
            DeliverySystem::DvbS2
        }
    }

    fn raw(&self) -> u32 {
        match self {
            DeliverySystem::DvbS => sys::SYS_DVBS,
            DeliverySystem::DvbS2 => sys::SYS_DVBS2,
        }
    }
}

/// A DVB-S/S2 tune request.
///
/// String fields are taken as the channel list spells them.
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteTune {
    pub delivery_system: DeliverySystem,
    /// Downlink frequency as listed for the transponder.
    pub frequency: u32,
    /// `V`/`v` for vertical, anything else horizontal.
    pub polarization: String,
    pub symbol_rate: u32,
    pub fec: String,
    pub rolloff: f64,
    /// `QPSK` or `8PSK`.
    pub modulation: String,
}

impl SatelliteTune {
    /// LNB supply voltage selecting the polarization.
    pub fn voltage(&self) -> u32 {
        match self.polarization.chars().next() {
            Some('V') | Some('v') => sys::SEC_VOLTAGE_13,
            _ => sys::SEC_VOLTAGE_18,
        }
    }

    pub fn modulation_value(&self) -> Result<u32> {
        match self.modulation.as_str() {
            "QPSK" => Ok(sys::QPSK),
            "8PSK" => Ok(sys::PSK_8),
            other => Err(TunerError::InvalidParameter(format!(
                "unrecognized satellite modulation: {}",
                other
            ))),
        }
    }

    pub fn code_rate(&self) -> u32 {
        match self.fec.as_str() {
            "5/6" => sys::FEC_5_6,
            _ => sys::FEC_NONE,
        }
    }

    pub fn rolloff_value(&self) -> u32 {
        const EPSILON: f64 = 1e-6;
        if (self.rolloff - 0.20).abs() < EPSILON {
            sys::ROLLOFF_20
        } else if (self.rolloff - 0.25).abs() < EPSILON {
            sys::ROLLOFF_25
        } else {
            sys::ROLLOFF_35
        }
    }

    /// The batch programmed in a single `FE_SET_PROPERTY`. `DTV_TUNE` is
    /// last so the driver applies everything at once.
    pub fn properties(&self) -> Result<Vec<DtvProperty>> {
        Ok(vec![
            DtvProperty::new(sys::DTV_DELIVERY_SYSTEM, self.delivery_system.raw()),
            DtvProperty::new(sys::DTV_FREQUENCY, intermediate_frequency(self.frequency)),
            DtvProperty::new(sys::DTV_MODULATION, self.modulation_value()?),
            DtvProperty::new(sys::DTV_SYMBOL_RATE, self.symbol_rate),
            DtvProperty::new(sys::DTV_INNER_FEC, self.code_rate()),
            DtvProperty::new(sys::DTV_VOLTAGE, self.voltage()),
            DtvProperty::new(sys::DTV_INVERSION, sys::INVERSION_AUTO),
            DtvProperty::new(sys::DTV_ROLLOFF, self.rolloff_value()),
            DtvProperty::new(sys::DTV_PILOT, sys::PILOT_AUTO),
            DtvProperty::command(sys::DTV_TUNE),
        ])
    }
}

/// Advisory flag announcing that a newer tune request is on its way.
///
/// Clones share the same flag. While it is set, filter installs and tunes
/// are refused and a running lock wait hands off immediately.
#[derive(Debug, Clone, Default)]
pub struct PendingTune(Arc<AtomicBool>);

impl PendingTune {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pending: bool) {
        self.0.store(pending, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a successful lock wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneOutcome {
    /// The frontend reported a stable lock.
    Locked,
    /// A newer request took over before lock was confirmed.
    Superseded,
}

/// Sampling parameters of the lock loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockWait {
    pub poll_timeout: Duration,
    pub streak: u32,
}

impl From<&TunerConfig> for LockWait {
    fn from(cfg: &TunerConfig) -> Self {
        Self {
            poll_timeout: cfg.fe_poll_timeout(),
            streak: cfg.lock_streak(),
        }
    }
}

/// One sample: wait for an event, then check it for `FE_HAS_LOCK`.
fn sample_lock<D>(driver: &D, fe: BorrowedFd<'_>, poll_timeout: Duration) -> bool
where
    D: FrontendDriver + ?Sized,
{
    match driver.wait_event(fe, poll_timeout) {
        Ok(true) => match driver.next_event(fe) {
            Ok(Some(status)) => status.has_lock(),
            Ok(None) => false,
            Err(e) => {
                debug!("[Frontend] FE_GET_EVENT failed: {}", e);
                false
            }
        },
        Ok(false) => false,
        Err(e) => {
            debug!("[Frontend] Poll on frontend failed: {}", e);
            // Keep per-iteration sampling even when poll fails fast.
            std::thread::sleep(poll_timeout);
            false
        }
    }
}

/// Poll the frontend until a debounced lock, a hand-off, or the deadline.
pub(crate) fn wait_for_lock<D>(
    driver: &D,
    fe: BorrowedFd<'_>,
    pending: &PendingTune,
    timeout: Duration,
    wait: LockWait,
) -> Result<TuneOutcome>
where
    D: FrontendDriver + ?Sized,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut streak = 0u32;

    while Instant::now() < deadline {
        if pending.is_pending() {
            info!(
                "[Frontend] Pending tune after {}ms, handing off",
                started.elapsed().as_millis()
            );
            return Ok(TuneOutcome::Superseded);
        }

        let locked = sample_lock(driver, fe, wait.poll_timeout);
        streak = if locked { streak + 1 } else { 0 };
        trace!("[Frontend] Lock status: {} (streak {})", locked, streak);

        if streak >= wait.streak {
            info!(
                "[Frontend] Locked after {}ms",
                started.elapsed().as_millis()
            );
            return Ok(TuneOutcome::Locked);
        }
    }

    warn!("[Frontend] No lock within {}ms", timeout.as_millis());
    Err(TunerError::LockTimeout(timeout))
}

/// Discard queued frontend events left over from an earlier tune.
///
/// Stops when the queue reports empty, on error, or after `limit` events.
pub(crate) fn drain_stale_events<D>(driver: &D, fe: BorrowedFd<'_>, limit: u32) -> u32
where
    D: FrontendDriver + ?Sized,
{
    let mut drained = 0;
    while drained < limit {
        match driver.next_event(fe) {
            Ok(Some(_)) => drained += 1,
            Ok(None) => break,
            Err(e) => {
                debug!("[Frontend] Stopped draining events: {}", e);
                break;
            }
        }
    }
    if drained >= limit {
        warn!("[Frontend] Event queue still busy after {} stale events", drained);
    } else if drained > 0 {
        debug!("[Frontend] Discarded {} stale events", drained);
    }
    drained
}
