use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use frame_bus::RedisBus;

use crate::detection::{self, DetectCliArgs, DetectionConfig, ShowCliArgs};

#[derive(Debug, Parser)]
#[command(name = "markers-detection", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect markers in camera frames and publish the results.
    Detect(DetectCliArgs),
    /// Print the last stored detections for a camera key.
    Show(ShowCliArgs),
}

pub fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Detect(args) => {
            let config = DetectionConfig::try_from(args)?;
            detection::run(&config)
        }
        Command::Show(args) => {
            let mut bus = RedisBus::connect(&args.host, args.port)?;
            detection::show_detections(&mut bus, &args.key, &mut io::stdout().lock())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["markers-detection", "detect", "-s", "-b", "1"]).unwrap();
        assert!(matches!(cli.command, Command::Detect(ref args) if args.stream && args.backends == [1]));

        let cli = Cli::try_parse_from(["markers-detection", "show", "-k", "cam"]).unwrap();
        assert!(matches!(cli.command, Command::Show(ref args) if args.key == "cam"));
    }
}
