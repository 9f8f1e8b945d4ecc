use std::{
    env::current_exe,
    io::stdout,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use backend::{Point, Settings, calibrate_from_source};
use clap::Parser;
use fern::Dispatch;
use log::{LevelFilter, info};
use tokio::{signal::ctrl_c, task::spawn_blocking};

/// Aims a pan-tilt mechanism at moving lights seen by a wide-field camera.
#[derive(Parser, Debug)]
#[command(name = "skytrack", version)]
struct Args {
    /// Settings file, created with defaults if missing.
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Log commands instead of sending them to the mechanism.
    #[arg(long)]
    dry_run: bool,

    /// Recompute the marker heading from the marker pixel `x,y`, save it and exit.
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    calibrate: Option<(i32, i32)>,
}

fn parse_point(value: &str) -> Result<(i32, i32), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {value}"))?;
    let x = x.trim().parse().map_err(|err| format!("invalid x: {err}"))?;
    let y = y.trim().parse().map_err(|err| format!("invalid y: {err}"))?;
    Ok((x, y))
}

fn init_logging() -> Result<()> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_path = current_exe()?
        .parent()
        .context("executable has no parent directory")?
        .join("log.txt");
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;
    log_panics::init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let mut settings = Settings::load(&args.settings)?;
    if let Some((x, y)) = args.calibrate {
        let heading = spawn_blocking(move || {
            calibrate_from_source(&mut settings, Point::new(x, y))?;
            settings.save(&args.settings)?;
            anyhow::Ok(settings.calibration.marker_heading)
        })
        .await??;
        info!(target: "main", "marker heading saved as {heading:.2}");
        return Ok(());
    }

    let exit = Arc::new(AtomicBool::new(false));
    let exit_on_signal = exit.clone();
    tokio::spawn(async move {
        if ctrl_c().await.is_ok() {
            info!(target: "main", "interrupted, shutting down");
            exit_on_signal.store(true, Ordering::Release);
        }
    });

    spawn_blocking(move || backend::run(settings, args.dry_run, exit)).await?
}
