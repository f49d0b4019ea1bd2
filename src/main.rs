use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use nbf_host::cli::{Cli, Commands, LoadArgs};
use nbf_host::config::HostConfig;
use nbf_host::streaming::{HostEngine, LoadOptions, NbfFile, Stats, StopSignal, VerifyReport};
use nbf_host::transport::{SerialTransport, Transport};
use nbf_host::NbfError;
use std::io;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        if matches!(e.downcast_ref::<NbfError>(), Some(NbfError::Interrupted)) {
            eprintln!("Aborted");
        } else {
            error!("{:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config =
        HostConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);
    config.validate()?;

    let transport = SerialTransport::open(&config.serial_settings())
        .with_context(|| format!("Failed to open serial port {}", config.serial.port))?;

    let stop = StopSignal::new();
    let mut engine = HostEngine::with_stop_signal(transport, config.engine_config(), stop.clone());

    // The engine blocks on serial reads; Ctrl-C raises the stop signal and
    // the engine notices it within one read timeout.
    let mut task = tokio::task::spawn_blocking(move || {
        let result = execute(&mut engine, &cli.command, &config);
        engine.close();
        result
    });

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            stop.raise();
            task.await
        }
    };

    joined.context("Engine task failed")?
}

fn execute<T: Transport>(
    engine: &mut HostEngine<T>,
    command: &Commands,
    config: &HostConfig,
) -> Result<()> {
    match command {
        Commands::Load(args) => {
            load(engine, args, config)?;
            if args.listen {
                listen(engine, args.verbose)?;
            }
        }
        Commands::Unfreeze { listen: then_listen } => {
            let result = engine.unfreeze();
            print_summary(&engine.stats());
            result?;
            if *then_listen {
                listen(engine, false)?;
            }
        }
        Commands::Verify { file } => {
            let file = NbfFile::new(file);
            let bar = progress_bar(&file, "verifying nbf")?;
            let result = engine.verify(file.commands()?.progress_with(bar.clone()));
            bar.finish_and_clear();
            print_summary(&engine.stats());
            print_verify_report(engine.verify_report());
            result?;
        }
        Commands::Listen { verbose } => listen(engine, *verbose)?,
    }
    Ok(())
}

fn load<T: Transport>(engine: &mut HostEngine<T>, args: &LoadArgs, config: &HostConfig) -> Result<()> {
    let file = NbfFile::new(&args.file);
    let options = LoadOptions {
        suppress_unfreeze: args.no_unfreeze,
        window_size: config.load.window_size,
        verbose: args.verbose,
    };

    let bar = progress_bar(&file, "loading nbf")?;
    let commands = file
        .commands()
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let result = engine.load(commands.progress_with(bar.clone()), &options);
    bar.finish_and_clear();

    print_summary(&engine.stats());
    result?;
    Ok(())
}

fn listen<T: Transport>(engine: &mut HostEngine<T>, verbose: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let finish = engine.listen(verbose, &mut out)?;
    println!("{}", finish);
    Ok(())
}

fn progress_bar(file: &NbfFile, message: &'static str) -> Result<ProgressBar> {
    let bar = match file.peek_length()? {
        Some(len) => {
            let bar = ProgressBar::new(len as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg}: {wide_bar} {pos}/{len} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        }
        None => ProgressBar::new_spinner(),
    };
    bar.set_message(message);
    Ok(bar)
}

fn print_summary(stats: &Stats) {
    info!(target: "nbf::command", " Sent:     {} commands", stats.commands_sent);
    info!(target: "nbf::command", " Received: {} commands", stats.commands_received);
    if stats.reply_violations > 0 {
        warn!(target: "nbf::command", " Reply violations: {} commands", stats.reply_violations);
    }
}

fn print_verify_report(report: &VerifyReport) {
    info!(target: "nbf::command", " Writes checked:       {}", report.writes_checked);
    info!(target: "nbf::command", " Corrupt writes found: {}", report.writes_corrupted);
    if !report.is_clean() {
        warn!(target: "nbf::command", "{}", "== CORRUPTION DETECTED ==".red().bold());
    }
}
