//! `linux/dvb/frontend.h`

use std::ffi::{c_char, c_int, c_void};

// enum fe_type
pub const FE_QPSK: u32 = 0;
pub const FE_QAM: u32 = 1;
pub const FE_OFDM: u32 = 2;
pub const FE_ATSC: u32 = 3;

// enum fe_caps
pub const FE_IS_STUPID: u32 = 0;
pub const FE_CAN_INVERSION_AUTO: u32 = 0x1;
pub const FE_CAN_FEC_AUTO: u32 = 0x200;
pub const FE_CAN_QPSK: u32 = 0x400;
pub const FE_CAN_QAM_256: u32 = 0x8000;
pub const FE_CAN_8VSB: u32 = 0x200000;
pub const FE_CAN_2G_MODULATION: u32 = 0x10000000;

// enum fe_status
pub const FE_NONE: u32 = 0x00;
pub const FE_HAS_SIGNAL: u32 = 0x01;
pub const FE_HAS_CARRIER: u32 = 0x02;
pub const FE_HAS_VITERBI: u32 = 0x04;
pub const FE_HAS_SYNC: u32 = 0x08;
pub const FE_HAS_LOCK: u32 = 0x10;
pub const FE_TIMEDOUT: u32 = 0x20;
pub const FE_REINIT: u32 = 0x40;

// enum fe_spectral_inversion
pub const INVERSION_OFF: u32 = 0;
pub const INVERSION_ON: u32 = 1;
pub const INVERSION_AUTO: u32 = 2;

// enum fe_code_rate
pub const FEC_NONE: u32 = 0;
pub const FEC_1_2: u32 = 1;
pub const FEC_2_3: u32 = 2;
pub const FEC_3_4: u32 = 3;
pub const FEC_4_5: u32 = 4;
pub const FEC_5_6: u32 = 5;
pub const FEC_6_7: u32 = 6;
pub const FEC_7_8: u32 = 7;
pub const FEC_8_9: u32 = 8;
pub const FEC_AUTO: u32 = 9;
pub const FEC_3_5: u32 = 10;
pub const FEC_9_10: u32 = 11;
pub const FEC_2_5: u32 = 12;

// enum fe_modulation
pub const QPSK: u32 = 0;
pub const QAM_16: u32 = 1;
pub const QAM_32: u32 = 2;
pub const QAM_64: u32 = 3;
pub const QAM_128: u32 = 4;
pub const QAM_256: u32 = 5;
pub const QAM_AUTO: u32 = 6;
pub const VSB_8: u32 = 7;
pub const VSB_16: u32 = 8;
pub const PSK_8: u32 = 9;
pub const APSK_16: u32 = 10;
pub const APSK_32: u32 = 11;
pub const DQPSK: u32 = 12;

// enum fe_sec_voltage
pub const SEC_VOLTAGE_13: u32 = 0;
pub const SEC_VOLTAGE_18: u32 = 1;
pub const SEC_VOLTAGE_OFF: u32 = 2;

// enum fe_pilot
pub const PILOT_ON: u32 = 0;
pub const PILOT_OFF: u32 = 1;
pub const PILOT_AUTO: u32 = 2;

// enum fe_rolloff
pub const ROLLOFF_35: u32 = 0;
pub const ROLLOFF_20: u32 = 1;
pub const ROLLOFF_25: u32 = 2;
pub const ROLLOFF_AUTO: u32 = 3;

// enum fe_delivery_system
pub const SYS_UNDEFINED: u32 = 0;
pub const SYS_DVBC_ANNEX_A: u32 = 1;
pub const SYS_DVBC_ANNEX_B: u32 = 2;
pub const SYS_DVBT: u32 = 3;
pub const SYS_DSS: u32 = 4;
pub const SYS_DVBS: u32 = 5;
pub const SYS_DVBS2: u32 = 6;
pub const SYS_DVBH: u32 = 7;
pub const SYS_ISDBT: u32 = 8;
pub const SYS_ISDBS: u32 = 9;
pub const SYS_ISDBC: u32 = 10;
pub const SYS_ATSC: u32 = 11;
pub const SYS_ATSCMH: u32 = 12;
pub const SYS_DTMB: u32 = 13;
pub const SYS_CMMB: u32 = 14;
pub const SYS_DAB: u32 = 15;
pub const SYS_DVBT2: u32 = 16;
pub const SYS_TURBO: u32 = 17;
pub const SYS_DVBC_ANNEX_C: u32 = 18;

// DTV property commands
pub const DTV_UNDEFINED: u32 = 0;
pub const DTV_TUNE: u32 = 1;
pub const DTV_CLEAR: u32 = 2;
pub const DTV_FREQUENCY: u32 = 3;
pub const DTV_MODULATION: u32 = 4;
pub const DTV_BANDWIDTH_HZ: u32 = 5;
pub const DTV_INVERSION: u32 = 6;
pub const DTV_DISEQC_MASTER: u32 = 7;
pub const DTV_SYMBOL_RATE: u32 = 8;
pub const DTV_INNER_FEC: u32 = 9;
pub const DTV_VOLTAGE: u32 = 10;
pub const DTV_TONE: u32 = 11;
pub const DTV_PILOT: u32 = 12;
pub const DTV_ROLLOFF: u32 = 13;
pub const DTV_DISEQC_SLAVE_REPLY: u32 = 14;
pub const DTV_FE_CAPABILITY_COUNT: u32 = 15;
pub const DTV_FE_CAPABILITY: u32 = 16;
pub const DTV_DELIVERY_SYSTEM: u32 = 17;

pub const DTV_IOCTL_MAX_MSGS: usize = 64;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct dvb_frontend_info {
    pub name: [c_char; 128],
    pub type_: u32,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub notifier_delay: u32,
    pub caps: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dvb_qpsk_parameters {
    pub symbol_rate: u32,
    pub fec_inner: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dvb_qam_parameters {
    pub symbol_rate: u32,
    pub fec_inner: u32,
    pub modulation: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dvb_vsb_parameters {
    pub modulation: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dvb_ofdm_parameters {
    pub bandwidth: u32,
    pub code_rate_HP: u32,
    pub code_rate_LP: u32,
    pub constellation: u32,
    pub transmission_mode: u32,
    pub guard_interval: u32,
    pub hierarchy_information: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union dvb_frontend_parameters_u {
    pub qpsk: dvb_qpsk_parameters,
    pub qam: dvb_qam_parameters,
    pub ofdm: dvb_ofdm_parameters,
    pub vsb: dvb_vsb_parameters,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct dvb_frontend_parameters {
    pub frequency: u32,
    pub inversion: u32,
    pub u: dvb_frontend_parameters_u,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct dvb_frontend_event {
    pub status: u32,
    pub parameters: dvb_frontend_parameters,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct dtv_property_buffer {
    pub data: [u8; 32],
    pub len: u32,
    pub reserved1: [u32; 3],
    pub reserved2: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union dtv_property_u {
    pub data: u32,
    pub buffer: dtv_property_buffer,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct dtv_property {
    pub cmd: u32,
    pub reserved: [u32; 3],
    pub u: dtv_property_u,
    pub result: c_int,
}

impl dtv_property {
    /// A property carrying a single 32-bit value.
    pub fn with_data(cmd: u32, data: u32) -> Self {
        // SAFETY: every field is plain data and all-zero is a valid bit pattern.
        let mut prop: Self = unsafe { std::mem::zeroed() };
        prop.cmd = cmd;
        prop.u.data = data;
        prop
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct dtv_properties {
    pub num: u32,
    pub props: *mut dtv_property,
}

#[cfg(unix)]
mod ioctls {
    use super::*;

    nix::ioctl_read!(fe_get_info, b'o', 61, dvb_frontend_info);
    nix::ioctl_write_ptr!(fe_set_frontend, b'o', 76, dvb_frontend_parameters);
    nix::ioctl_read!(fe_get_event, b'o', 78, dvb_frontend_event);
    nix::ioctl_write_ptr!(fe_set_property, b'o', 82, dtv_properties);
}

#[cfg(unix)]
pub use ioctls::*;
