use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use vmgate::{
    accept_one, exit_code_for_gate_error, inherited_socket, load_env_file, logging_init,
    ClientSocket, GateConfig, GateError, Session,
};

mod cli;

use cli::Cli;

fn build_config(cli: &Cli) -> Result<GateConfig, GateError> {
    let endpoint_flag = cli.api_endpoint.as_ref().map(|u| u.to_string());
    let mut cfg = GateConfig::from_lookup(|k| {
        if k == "VMGATE_API_ENDPOINT" && endpoint_flag.is_some() {
            return endpoint_flag.clone();
        }
        env::var(k).ok()
    })?;
    cli.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = build_config(cli).context("configuration")?;
    debug!(
        build = env!("VMGATE_BUILD_DATE"),
        target = env!("VMGATE_BUILD_TARGET"),
        profile = env!("VMGATE_BUILD_PROFILE"),
        rustc = env!("VMGATE_BUILD_RUSTC"),
        version = env!("CARGO_PKG_VERSION"),
        "vmgate starting"
    );
    debug!(?cfg, "effective configuration");

    let client = match &cli.listen {
        Some(addr) => ClientSocket::Tcp(accept_one(addr.as_str())?),
        None => inherited_socket()?,
    };
    Session::new(&cfg).run(client)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Before logging init so VMGATE_LOG from the file applies.
    if let Some(path) = &cli.env_file {
        if let Err(e) = load_env_file(path) {
            eprintln!("vmgate: {e}");
            return ExitCode::from(exit_code_for_gate_error(&e));
        }
    }
    logging_init(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<GateError>()
                .map(exit_code_for_gate_error)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
