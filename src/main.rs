mod cli;
mod config;

use clap::Parser;
use cli::{Cli, Commands, RunArgs, ServeArgs};
use config::{RunConfig, load_config, merge_config};
use loadgen::arith::{ArithServer, TcpCaller};
use loadgen::engine::{Generator, Params, Tally};
use loadgen::types::ResultCode;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32, String> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_load(&args).await,
        Commands::Serve(args) => run_serve(&args).await,
    }
}

async fn run_load(args: &RunArgs) -> Result<i32, String> {
    let toml_config = if let Some(ref path) = args.config {
        Some(load_config(path)?)
    } else {
        None
    };

    let config = merge_config(args, toml_config)?;

    if args.dry_run {
        return dry_run(&config);
    }

    // Held until the run ends; dropping it closes the listener.
    let local_server = if config.addr.is_none() {
        let server = ArithServer::listen("127.0.0.1:0")
            .await
            .map_err(|e| format!("Failed to start local server: {}", e))?;
        Some(server)
    } else {
        None
    };

    let addr = match (&config.addr, &local_server) {
        (Some(addr), _) => addr.clone(),
        (None, Some(server)) => server.local_addr().to_string(),
        (None, None) => return Err("Target address is required".to_string()),
    };

    let (result_tx, result_rx) = mpsc::channel(config.buffer);
    let params = params_for(&config, TcpCaller::new(addr.clone()), result_tx);
    let generator =
        Generator::new(params).map_err(|e| format!("Failed to create load generator: {}", e))?;

    eprintln!(
        "Generating load against {} at {} for {:?}...",
        addr,
        rate_label(config.rate),
        config.duration
    );

    let tally = tokio::spawn(Tally::drain(result_rx));
    let started = Instant::now();
    if !generator.start() {
        return Err("Load generator refused to start".to_string());
    }

    let stopper = generator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping");
            stopper.stop().await;
        }
    });

    let tally = tally
        .await
        .map_err(|e| format!("Result consumer failed: {}", e))?;
    let elapsed = started.elapsed();

    print_summary(&tally, &generator, elapsed);

    if let Some(server) = local_server {
        server.close();
    }

    Ok(0)
}

fn params_for(
    config: &RunConfig,
    caller: TcpCaller,
    result_tx: mpsc::Sender<loadgen::CallResult>,
) -> Params<TcpCaller> {
    let params = Params::new(
        caller,
        config.timeout,
        config.rate,
        config.duration,
        result_tx,
    );
    match config.max_in_flight {
        Some(max) => params.with_max_in_flight(max),
        None => params,
    }
}

fn dry_run(config: &RunConfig) -> Result<i32, String> {
    let (result_tx, _result_rx) = mpsc::channel(config.buffer);
    let target = config
        .addr
        .clone()
        .unwrap_or_else(|| "(local server)".to_string());
    let params = params_for(config, TcpCaller::new(target.clone()), result_tx);
    params.validate().map_err(|e| e.to_string())?;

    eprintln!("Configuration validated successfully!\n");
    eprintln!("Target:      {}", target);
    eprintln!("Rate:        {}", rate_label(config.rate));
    eprintln!("Timeout:     {:?}", config.timeout);
    eprintln!("Duration:    {:?}", config.duration);
    eprintln!("Buffer:      {}", config.buffer);
    if let Some(max) = config.max_in_flight {
        eprintln!("Max Flight:  {}", max);
    }
    eprintln!("Concurrency: {}", params.concurrency());

    Ok(0)
}

async fn run_serve(args: &ServeArgs) -> Result<i32, String> {
    let server = ArithServer::listen(&args.listen)
        .await
        .map_err(|e| format!("Failed to start server on {}: {}", args.listen, e))?;
    eprintln!("Serving arithmetic on {} (Ctrl-C to stop)", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl-C: {}", e))?;
    server.close();

    Ok(0)
}

fn rate_label(rate: u32) -> String {
    if rate == 0 {
        "unthrottled".to_string()
    } else {
        format!("{} calls/s", rate)
    }
}

fn print_summary<C: loadgen::Caller>(tally: &Tally, generator: &Generator<C>, elapsed: Duration) {
    println!("\n{}", "=".repeat(50));
    println!("{:^50}", "Load Generation Results");
    println!("{}", "=".repeat(50));

    println!("\nCalls:");
    println!("  Dispatched:      {:>12}", generator.call_count());
    println!("  Reported:        {:>12}", tally.total());
    println!("  Dropped:         {:>12}", generator.dropped_count());
    println!("  Concurrency:     {:>12}", generator.concurrency());
    println!("  Success/sec:     {:>12.2}", tally.success_per_sec(elapsed));
    println!("  Success Rate:    {:>11.2}%", tally.success_rate() * 100.0);

    println!("\nLatency (ms):");
    for (label, p) in [("p50", 50.0), ("p90", 90.0), ("p99", 99.0)] {
        println!(
            "  {:<17}{:>12.2}",
            format!("{}:", label),
            tally.latency_percentile(p).as_secs_f64() * 1000.0
        );
    }
    println!(
        "  Max:             {:>12.2}",
        tally.latency_max().as_secs_f64() * 1000.0
    );

    if tally.total() > 0 {
        println!("\nResult Codes:");
        for (code, count) in tally.codes() {
            println!("  {:<17}{:>12}", format!("{}:", code), count);
        }
    }

    if tally.count(ResultCode::Success) == 0 && tally.total() > 0 {
        println!("\nNo call succeeded; check that the target is an arithmetic server.");
    }

    println!("\n{}", "=".repeat(50));
}
