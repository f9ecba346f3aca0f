use anyhow::Context;
use log::log_enabled;
use mallocprobe::{error::EXIT_PROBE_FAILED, Probe, ProbeConfig, ProbeError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    if let Err(err) = run() {
        if log_enabled!(log::Level::Error) {
            log::error!("{err:#}");
        } else {
            eprintln!("Error: {err:#}");
        }
        let code = err
            .downcast_ref::<ProbeError>()
            .map_or(EXIT_PROBE_FAILED, ProbeError::exit_code);
        std::process::exit(code);
    }
}

fn run() -> anyhow::Result<()> {
    let config = ProbeConfig::from_env();
    log::debug!("{config:?}");
    let format = config.format;
    let probe = Probe::new(config);
    let report = probe.report().context("probing the allocator failed")?;
    println!("{}", report.render(format)?);
    Ok(())
}
