use crate::capture::select_backend;
use crate::config::{RecorderConfig, SessionEnv, app_name, app_version};
use crate::pipeline::Supervisor;
use crate::utils::sos::{ShutdownCoordinator, ShutdownSignal};
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{error, info};
use std::path::PathBuf;
use std::{panic, process};

pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod utils;

/// Exit status for a configuration that cannot be used
const EXIT_CONFIG: i32 = 1;

fn cli() -> Command {
    Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; command line flags take precedence.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output file, strftime tokens such as %Y-%m-%d_%H-%M-%S are expanded.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .value_name("BACKEND")
                .help("Capture backend (auto/local/screencast)."),
        )
        .arg(
            Arg::new("resolution")
                .short('r')
                .long("resolution")
                .value_name("WxH")
                .help("Virtual display resolution, e.g. 1280x720."),
        )
        .arg(
            Arg::new("framerate")
                .short('f')
                .long("framerate")
                .value_name("FPS")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("display")
                .short('d')
                .long("display")
                .value_name("ID")
                .help("Virtual display id, e.g. :99."),
        )
        .arg(Arg::new("preset").long("preset").value_name("PRESET").help("Encoder preset."))
        .arg(
            Arg::new("poll-interval-ms")
                .long("poll-interval-ms")
                .value_name("MS")
                .help("How often the capture health is checked.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("no-probe")
                .long("no-probe")
                .help("Skip the display liveness probe.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-monitor")
                .long("no-monitor")
                .help("Disable CPU and output size sampling.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-cursor")
                .long("no-cursor")
                .help("Hide the mouse cursor in the recording.")
                .action(ArgAction::SetTrue),
        )
}

/// Load the config file (if any) and lay the command line over it.
fn load_config(matches: &ArgMatches) -> anyhow::Result<RecorderConfig> {
    let mut config = RecorderConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output = output.clone();
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        config.backend = backend.parse()?;
    }
    if let Some(resolution) = matches.get_one::<String>("resolution") {
        config.display.resolution = resolution.parse()?;
    }
    if let Some(framerate) = matches.get_one::<u32>("framerate") {
        config.framerate = *framerate;
    }
    if let Some(display) = matches.get_one::<String>("display") {
        config.display.id = display.clone();
    }
    if let Some(preset) = matches.get_one::<String>("preset") {
        config.encoder.preset = preset.clone();
    }
    if let Some(interval) = matches.get_one::<u64>("poll-interval-ms") {
        config.poll_interval_ms = *interval;
    }
    if matches.get_flag("no-probe") {
        config.display.verify = false;
    }
    if matches.get_flag("no-monitor") {
        config.monitor.enabled = false;
    }
    if matches.get_flag("no-cursor") {
        config.cursor_visible = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    // SIGINT, SIGTERM and SIGHUP only flip the signal; cleanup runs below
    let coordinator = ShutdownCoordinator::new(ShutdownSignal::new());
    if let Err(e) = coordinator.install() {
        error!("{:#}", e);
        process::exit(EXIT_CONFIG);
    }

    let backend = select_backend(&config, &SessionEnv::from_process());
    info!("{} {} using {} backend", app_name(), app_version(), backend.kind());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start async runtime: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };
    let outcome = runtime.block_on(Supervisor::new(config, backend, coordinator.signal().clone()).run());

    info!("{}", outcome);
    process::exit(outcome.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendChoice, Resolution};
    use std::io::Write;

    fn parse(args: &[&str]) -> anyhow::Result<RecorderConfig> {
        let matches = cli().try_get_matches_from(std::iter::once("vfbcast").chain(args.iter().copied()))?;
        load_config(&matches)
    }

    #[test]
    fn test_defaults_without_flags() {
        assert_eq!(parse(&[]).unwrap(), RecorderConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "-o",
            "/tmp/out.mp4",
            "--backend",
            "local",
            "-r",
            "1920x1080",
            "-f",
            "30",
            "-d",
            ":42",
            "--preset",
            "veryfast",
            "--poll-interval-ms",
            "50",
            "--no-probe",
            "--no-monitor",
            "--no-cursor",
        ])
        .unwrap();

        assert_eq!(config.output, PathBuf::from("/tmp/out.mp4"));
        assert_eq!(config.backend, BackendChoice::Local);
        assert_eq!(config.display.resolution, Resolution { width: 1920, height: 1080 });
        assert_eq!(config.framerate, 30);
        assert_eq!(config.display.id, ":42");
        assert_eq!(config.encoder.preset, "veryfast");
        assert_eq!(config.poll_interval_ms, 50);
        assert!(!config.display.verify);
        assert!(!config.monitor.enabled);
        assert!(!config.cursor_visible);
    }

    #[test]
    fn test_flags_win_over_config_file() {
        let path = std::env::temp_dir().join(format!("vfbcast-cli-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{ "framerate": 25, "backend": "screencast" }"#).unwrap();

        let config = parse(&["--config", path.to_str().unwrap(), "--framerate", "10"]).unwrap();
        assert_eq!(config.framerate, 10);
        assert_eq!(config.backend, BackendChoice::Screencast);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_bad_values_are_configuration_errors() {
        assert!(parse(&["--backend", "wayland"]).is_err());
        assert!(parse(&["-r", "0x720"]).is_err());
        assert!(parse(&["-f", "0"]).is_err());
        assert!(parse(&["-o", "rec_%Q.mp4"]).is_err());
    }
}
