//! Command-line interface

pub mod discover;
pub mod launch;
pub mod peer;
pub mod serve;
pub mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    pub const LAUNCH_FAILED: i32 = 2;
    pub const INVALID_EXECUTABLE: i32 = 3;
}

/// Privileged host for legacy game sessions
#[derive(Parser, Debug)]
#[command(name = "gamebridge", version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "GAMEBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long, global = true, env = "GAMEBRIDGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the capability bridge to the UI
    Serve(serve::ServeArgs),

    /// Launch one program and print its exit report
    Launch(launch::LaunchArgs),

    /// Look up the companion service address
    Discover(discover::DiscoverArgs),

    /// Query or drive the peer-to-peer node
    Peer(peer::PeerArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_launch_with_trailing_args() {
        let cli = Cli::try_parse_from(["gamebridge", "-v", "launch", "war3.exe", "-window", "-creategame"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Launch(args) => {
                assert_eq!(args.program, "war3.exe");
                assert_eq!(args.args, vec!["-window", "-creategame"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_discover_overrides() {
        let cli = Cli::try_parse_from([
            "gamebridge",
            "discover",
            "--url",
            "http://127.0.0.1:9000/server-info",
            "--attempts",
            "2",
            "--json-output",
        ])
        .unwrap();
        assert!(cli.json_output);
        match cli.command {
            Commands::Discover(args) => {
                assert_eq!(args.url.as_deref(), Some("http://127.0.0.1:9000/server-info"));
                assert_eq!(args.attempts, Some(2));
                assert_eq!(args.delay_ms, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_peer_connect() {
        let cli = Cli::try_parse_from(["gamebridge", "peer", "connect", "/ip4/10.0.0.9/tcp/9201/p2p/QmOther"])
            .unwrap();
        match cli.command {
            Commands::Peer(args) => match args.command {
                peer::PeerCommand::Connect { address } => {
                    assert_eq!(address, "/ip4/10.0.0.9/tcp/9201/p2p/QmOther")
                }
                other => panic!("unexpected peer command {other:?}"),
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["gamebridge"]).is_err());
    }
}
