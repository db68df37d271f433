use std::error::Error;
use std::process;
use std::thread;

use clap::Parser;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use ribsync::cli::{query_ribsync, Args, Command, RunOptions};
use ribsync::{config, serve, SyncConfig};

fn init_logging(verbose: u8) {
    let (ribsync_level, other_level) = match verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("ribsync"), ribsync_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", ribsync_level, other_level);
}

fn load_config(options: &RunOptions) -> Result<SyncConfig, Box<dyn Error>> {
    let mut config = match &options.config_path {
        Some(path) => {
            let config = config::from_file(path)?;
            debug!("Loaded config from {}", path);
            config
        }
        None => SyncConfig::default(),
    };
    options.apply(&mut config);
    debug!("{:?}", config);
    Ok(config)
}

async fn run(options: &RunOptions) -> Result<(), Box<dyn Error>> {
    let config = load_config(options)?;

    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!("Received signal {}, stopping ribsync...", signal);
            process::exit(0);
        }
    });

    serve(config).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match &args.cmd {
        Command::Run(options) => {
            init_logging(args.verbose);
            if let Err(err) = run(options).await {
                error!("{}", err);
                process::exit(1);
            }
        }
        _ => query_ribsync(&args).await,
    }
}
