//! `linux/dvb/dmx.h`

pub const DMX_FILTER_SIZE: usize = 16;

// enum dmx_output
pub const DMX_OUT_DECODER: u32 = 0;
pub const DMX_OUT_TAP: u32 = 1;
pub const DMX_OUT_TS_TAP: u32 = 2;
pub const DMX_OUT_TSDEMUX_TAP: u32 = 3;

// enum dmx_input
pub const DMX_IN_FRONTEND: u32 = 0;
pub const DMX_IN_DVR: u32 = 1;

// enum dmx_ts_pes
pub const DMX_PES_AUDIO0: u32 = 0;
pub const DMX_PES_VIDEO0: u32 = 1;
pub const DMX_PES_TELETEXT0: u32 = 2;
pub const DMX_PES_SUBTITLE0: u32 = 3;
pub const DMX_PES_PCR0: u32 = 4;
pub const DMX_PES_OTHER: u32 = 20;

pub const DMX_PES_AUDIO: u32 = DMX_PES_AUDIO0;
pub const DMX_PES_VIDEO: u32 = DMX_PES_VIDEO0;
pub const DMX_PES_TELETEXT: u32 = DMX_PES_TELETEXT0;
pub const DMX_PES_SUBTITLE: u32 = DMX_PES_SUBTITLE0;
pub const DMX_PES_PCR: u32 = DMX_PES_PCR0;

// filter flags
pub const DMX_CHECK_CRC: u32 = 1;
pub const DMX_ONESHOT: u32 = 2;
pub const DMX_IMMEDIATE_START: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dmx_filter {
    pub filter: [u8; DMX_FILTER_SIZE],
    pub mask: [u8; DMX_FILTER_SIZE],
    pub mode: [u8; DMX_FILTER_SIZE],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dmx_sct_filter_params {
    pub pid: u16,
    pub filter: dmx_filter,
    pub timeout: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dmx_pes_filter_params {
    pub pid: u16,
    pub input: u32,
    pub output: u32,
    pub pes_type: u32,
    pub flags: u32,
}

#[cfg(unix)]
mod ioctls {
    use super::*;

    nix::ioctl_write_ptr!(dmx_set_filter, b'o', 43, dmx_sct_filter_params);
    nix::ioctl_write_ptr!(dmx_set_pes_filter, b'o', 44, dmx_pes_filter_params);
}

#[cfg(unix)]
pub use ioctls::*;
