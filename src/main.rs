//! `smtpd`: the SMTP receiving server binary, per `spec.md` §6.
//!
//! Also answers to a private, undocumented `--transform-worker <cmd>
//! <maildir>` invocation form: the transform dispatcher re-execs this same
//! binary to populate its worker pool (§4.4), rather than shipping a
//! second binary for it.

use log::error;
use maildrop_smtpd::{config::Config, transform, Server};

fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "smtpd".to_string());

    if args.len() >= 2 && args[1] == "--transform-worker" {
        if let Err(e) = run_transform_worker(&args[2..]) {
            error!("transform worker failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = run(&program, &args[1..]) {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Runs the worker side of the `--transform-worker <cmd> <maildir>`
/// protocol until its stdin reaches EOF (§4.4, §5).
fn run_transform_worker(args: &[String]) -> anyhow::Result<()> {
    let (cmd, maildir) = match args {
        [cmd, maildir] => (cmd, maildir),
        _ => anyhow::bail!("--transform-worker requires <cmd> <maildir>"),
    };
    transform::worker::run(cmd, maildir)
}

fn run(program: &str, args: &[String]) -> anyhow::Result<()> {
    let config = Config::from_args(args).map_err(|e| {
        anyhow::anyhow!("{}\n{}", e, Config::usage(program))
    })?;

    log::info!(
        "starting {} v{} on smtp port {} / mgmt port {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.smtp_port,
        config.mgmt_port
    );

    let server = Server::new(config)?;
    server.run()
}
