use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Parser, Debug)]
#[command(
    name = "loadgen",
    author,
    version,
    about = "Rate-controlled synthetic load generator",
    long_about = "loadgen drives a target at a fixed number of calls per second for a fixed \
                  duration, bounding calls in flight and classifying every attempt.\n\n\
                  The bundled target is a newline-delimited JSON arithmetic server."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate load against an arithmetic server
    Run(RunArgs),

    /// Run an arithmetic server until Ctrl-C
    Serve(ServeArgs),
}

/// Values left unset fall back to the config file, then to built-in defaults.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Target address (host:port)
    #[arg(required_unless_present_any = ["config", "serve_local"])]
    pub target: Option<String>,

    /// Calls per second, 0 for unthrottled [default: 1000]
    #[arg(short = 'r', long)]
    pub rate: Option<u32>,

    /// Per-call timeout, e.g. 50ms [default: 50ms]
    #[arg(short = 't', long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Run duration, e.g. 10s, 1m [default: 10s]
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Result channel capacity [default: 50]
    #[arg(long)]
    pub buffer: Option<usize>,

    /// Upper bound on calls in flight
    #[arg(long)]
    pub max_in_flight: Option<u32>,

    /// Config file path (TOML)
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Start an arithmetic server on an ephemeral local port and target it
    #[arg(long, conflicts_with = "target")]
    pub serve_local: bool,

    /// Validate config and exit without running
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short = 'l', long, default_value = "127.0.0.1:8043")]
    pub listen: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_parse() {
        let cli = Cli::try_parse_from([
            "loadgen", "run", "127.0.0.1:9000", "-r", "500", "-t", "20ms", "-d", "1m",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.target.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.rate, Some(500));
        assert_eq!(args.timeout, Some(Duration::from_millis(20)));
        assert_eq!(args.duration, Some(Duration::from_secs(60)));
        assert_eq!(args.buffer, None);
    }

    #[test]
    fn run_requires_a_target() {
        assert!(Cli::try_parse_from(["loadgen", "run"]).is_err());
        assert!(Cli::try_parse_from(["loadgen", "run", "--serve-local"]).is_ok());
        assert!(Cli::try_parse_from(["loadgen", "run", "-f", "load.toml"]).is_ok());
    }

    #[test]
    fn serve_local_conflicts_with_target() {
        assert!(Cli::try_parse_from(["loadgen", "run", "127.0.0.1:1", "--serve-local"]).is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Cli::try_parse_from(["loadgen", "run", "x:1", "-d", "soon"]).is_err());
    }

    #[test]
    fn serve_has_a_default_address() {
        let cli = Cli::try_parse_from(["loadgen", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, "127.0.0.1:8043");
    }
}
