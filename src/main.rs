use clap::Parser;
use restless::job::job_config::RestlessConfig;
use restless::job::notifications::Notification;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};

/// Runs one backup or replication job against a restic-compatible store
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Job name from the `backups` or `replication` config section
    job: String,

    /// Location of config file
    #[arg(short, long, default_value = "restless.yaml")]
    config: PathBuf,

    /// Execution mode: `backup` or `replication`
    #[arg(short, long, default_value = "backup")]
    mode: String,
}

fn main() {
    let args = Args::parse();

    let config = match RestlessConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            error!("{e}");
            exit(1);
        }
    };

    let res = config
        .log()
        .init()
        .and_then(|_| config.run_job(&args.mode, &args.job));

    match res {
        Ok(()) => info!("job {} finished", args.job),
        Err(e) => {
            error!("{e}");
            if let Err(send_error) = config.notifications().send(e.title(), e.to_string()) {
                error!("sending the failure notification failed: {send_error}");
            }
            exit(1);
        }
    }
}
