use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;

#[derive(Debug, Parser)]
#[clap(name = "dvbtune")]
#[clap(about = "dvbtune tunes a Linux DVB adapter and records the transport stream. ", long_about = None)]
#[clap(version)]
pub(crate) struct Cli {
    /// Configuration file path.{n}
    /// Falls back to `dvbtune.toml` in the working directory.
    #[clap(short = 'f', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Satellite delivery system.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub(crate) enum Satellite {
    /// DVB-S
    S,
    /// DVB-S2
    #[default]
    S2,
}

/// Options shared by every recording subcommand.
#[derive(Debug, Args)]
pub(crate) struct Recording {
    /// The device.{n}
    /// There are 2 ways to point the frontend.{n}
    /// 1. (full) `-c /dev/dvb/adapter2/frontend0`{n}
    /// 2. (abbr.) `-c "2|0"`
    #[clap(short = 'c', long, value_name = "CANONICAL_PATH", required = true)]
    pub device: String,

    /// Additional PIDs to pass through.{n}
    /// Accepts decimal or `0x`-prefixed hexadecimal, and may be repeated.
    #[clap(short, long = "pid", value_parser = maybe_hex::<u32>)]
    pub pids: Vec<u32>,

    /// Recording duration in seconds.{n}
    /// Records until Ctrl-C when omitted.
    #[clap(short, long)]
    pub time: Option<u64>,

    /// Output file. `-` writes to stdout.
    #[clap(required = true)]
    pub output: String,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Tune an ATSC or cable receiver.{n}
    /// Uses the legacy frontend protocol and installs PAT and the
    /// PSIP base PID.
    Tune {
        /// Frequency in Hz.
        #[clap(long, required = true)]
        frequency: u32,

        /// Modulation.
        #[clap(short, long, default_value = "8VSB", value_parser = ["8VSB", "QAM256"])]
        modulation: String,

        #[clap(flatten)]
        recording: Recording,
    },
    /// Tune a DVB-S/S2 receiver.{n}
    /// The downlink frequency is translated through a universal LNB
    /// and PAT plus SDT are installed.
    TuneDvb {
        /// Delivery system.
        #[clap(value_enum, long = "delivery-system", default_value_t)]
        delivery_system: Satellite,

        /// Downlink frequency in kHz.
        #[clap(long, required = true)]
        frequency: u32,

        /// Polarization. `V` selects vertical, anything else horizontal.
        #[clap(long, default_value = "H")]
        polarization: String,

        /// Symbol rate in symbols per second.
        #[clap(long, required = true)]
        symbol_rate: u32,

        /// Inner FEC. Only `5/6` is recognised; anything else programs FEC_NONE.
        #[clap(long, default_value = "NONE")]
        fec: String,

        /// Roll-off factor.
        #[clap(long, default_value_t = 0.35)]
        rolloff: f64,

        /// Modulation.
        #[clap(short, long, default_value = "QPSK", value_parser = ["QPSK", "8PSK"])]
        modulation: String,

        #[clap(flatten)]
        recording: Recording,
    },
}
