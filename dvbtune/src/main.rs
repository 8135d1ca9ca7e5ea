//! dvbtune: tune a Linux DVB adapter and record the transport stream.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use dvbtune::{
    AdapterProvider, DeliverySystem, DvbManager, FilterType, SatelliteTune, TuneOutcome,
    TunerConfig, TunerError, TunerSession,
};

mod context;

use context::{Cli, Commands, Recording, Satellite};

/// A whole number of TS packets.
const READ_BUFFER_SIZE: usize = 188 * 348;

fn load_config(path: Option<PathBuf>) -> Result<TunerConfig, Box<dyn std::error::Error>> {
    // Explicit path > auto-detect > defaults
    let path = path.or_else(|| {
        let default_path = PathBuf::from("dvbtune.toml");
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    match path {
        Some(path) => {
            let config = TunerConfig::load(&path)?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        None => Ok(TunerConfig::from_env()),
    }
}

fn open_output(output: &str) -> io::Result<Box<dyn Write>> {
    if output == "-" {
        Ok(Box::new(BufWriter::new(io::stdout().lock())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

fn progress_bar(output: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    if output == "-" {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bytes} ({binary_bytes_per_sec}) {msg}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(200));
    Ok(pb)
}

fn record<P, D>(
    session: &TunerSession<P, D>,
    recording: &Recording,
    stop: &AtomicBool,
) -> Result<u64, Box<dyn std::error::Error>>
where
    P: dvbtune::DescriptorProvider,
    D: dvbtune::FrontendDriver,
{
    for &pid in &recording.pids {
        session.add_pid_filter(pid, FilterType::Other)?;
    }

    let mut out = open_output(&recording.output)?;
    let pb = progress_bar(&recording.output)?;
    let deadline = recording
        .time
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut written = 0u64;

    while !stop.load(Ordering::SeqCst) {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            info!("Recording time reached");
            break;
        }
        match session.read_ts_stream(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                out.write_all(&buf[..n])?;
                written += n as u64;
                pb.set_position(written);
            }
            Err(TunerError::NotLocked) => warn!("Frontend lost lock"),
            Err(e @ TunerError::StreamError(_)) => warn!("{}", e),
            Err(e) => return Err(e.into()),
        }
    }

    out.flush()?;
    pb.finish_with_message("done");
    Ok(written)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(cli.config)?;

    let (device, recording) = match &cli.command {
        Commands::Tune { recording, .. } | Commands::TuneDvb { recording, .. } => {
            (recording.device.as_str(), recording)
        }
    };
    let provider = AdapterProvider::from_spec(device)
        .ok_or_else(|| format!("Invalid device: {}", device))?;
    let session = TunerSession::new(DvbManager::new(provider, config));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let pending = session.manager().pending_tune();
        ctrlc::set_handler(move || {
            // Aborts a lock wait in progress as well.
            pending.set(true);
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let outcome = match &cli.command {
        Commands::Tune {
            frequency,
            modulation,
            ..
        } => session.tune(*frequency, modulation),
        Commands::TuneDvb {
            delivery_system,
            frequency,
            polarization,
            symbol_rate,
            fec,
            rolloff,
            modulation,
            ..
        } => {
            let request = SatelliteTune {
                delivery_system: match delivery_system {
                    Satellite::S => DeliverySystem::DvbS,
                    Satellite::S2 => DeliverySystem::DvbS2,
                },
                frequency: *frequency,
                polarization: polarization.clone(),
                symbol_rate: *symbol_rate,
                fec: fec.clone(),
                rolloff: *rolloff,
                modulation: modulation.clone(),
            };
            session.tune_dvb(&request)
        }
    };

    match outcome {
        Ok(TuneOutcome::Locked) => info!("Locked on {}", device),
        Ok(TuneOutcome::Superseded) => {
            info!("Interrupted before lock");
            session.stop_tune();
            return Ok(());
        }
        Err(e) => {
            error!("Tune failed: {}", e);
            session.stop_tune();
            return Err(e.into());
        }
    }

    let result = record(&session, recording, &stop);
    session.stop_tune();
    let written = result?;
    info!("Wrote {} bytes to {}", written, recording.output);
    Ok(())
}
