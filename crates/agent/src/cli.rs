use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "xfrmgate-agent",
    about = "IPsec mark-and-redirect datapath agent",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "XFRMGATE_CONFIG")]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the classifiers and run the agent (default)
    Run,

    /// Parse and validate the configuration file, then exit
    Validate,

    /// Print the key index negotiated between a local and a peer key
    SelectKey {
        /// Local key index (0-15)
        local: u8,
        /// Peer key index (0-15)
        peer: u8,
    },

    /// Display version and build information
    Version,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_config_path() {
        let cli = Cli::try_parse_from(["xfrmgate-agent"]).unwrap();
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(cli.log_level.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_custom_config_path() {
        let cli = Cli::try_parse_from(["xfrmgate-agent", "-c", "/tmp/test.yaml"]).unwrap();
        assert_eq!(cli.config, "/tmp/test.yaml");
    }

    #[test]
    fn cli_log_overrides() {
        let cli = Cli::try_parse_from([
            "xfrmgate-agent",
            "--log-level",
            "debug",
            "--log-format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Text));
    }

    #[test]
    fn cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["xfrmgate-agent", "-l", "loud"]).is_err());
    }

    #[test]
    fn cli_run_and_validate_subcommands() {
        let cli = Cli::try_parse_from(["xfrmgate-agent", "run"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Run)));
        let cli = Cli::try_parse_from(["xfrmgate-agent", "validate"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Validate)));
    }

    #[test]
    fn cli_select_key_arguments() {
        let cli = Cli::try_parse_from(["xfrmgate-agent", "select-key", "15", "1"]).unwrap();
        match cli.command {
            Some(Command::SelectKey { local, peer }) => {
                assert_eq!(local, 15);
                assert_eq!(peer, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_version_subcommand() {
        let cli = Cli::try_parse_from(["xfrmgate-agent", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }
}
