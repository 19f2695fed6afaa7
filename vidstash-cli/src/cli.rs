use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vidstash", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "VIDSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the storage directory for this invocation
    #[arg(long, global = true, env = "VIDSTASH_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the streams available for a watch URL
    Resolve {
        /// Watch URL, e.g. https://www.youtube.com/watch?v=dQw4w9WgXcQ
        url: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Download a video for offline playback
    Download {
        /// Watch URL, e.g. https://www.youtube.com/watch?v=dQw4w9WgXcQ
        url: String,

        /// Index into the compatible video streams
        #[arg(long)]
        video: Option<usize>,

        /// Index into the compatible audio streams
        #[arg(long)]
        audio: Option<usize>,

        /// Pick the streams interactively
        #[arg(short, long)]
        interactive: bool,
    },

    /// List stored downloads
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Shorthand for `--output json`
        #[arg(long)]
        json: bool,
    },

    /// Delete a stored download
    Delete {
        /// Video identifier as shown by `list`
        id: String,
    },

    /// Print what a player needs to play a stored download
    Play {
        /// Video identifier as shown by `list`
        id: String,
    },

    /// Print the list of downloads again every time it changes
    Watch {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Seconds between rescans of the storage directory
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the metadata API instance
    SetInstance {
        /// Base URL, e.g. https://pipedapi.example.org
        url: String,
    },
    /// Reset configuration to defaults
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Pretty,
    /// JSON output
    Json,
    /// Compact JSON output
    JsonCompact,
    /// Table output
    Table,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonCompact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_download_selection() {
        let args = Args::parse_from([
            "vidstash",
            "download",
            "https://www.youtube.com/watch?v=abc123",
            "--video",
            "1",
            "--audio",
            "0",
        ]);
        match args.command {
            Commands::Download { url, video, audio, interactive } => {
                assert_eq!(url, "https://www.youtube.com/watch?v=abc123");
                assert_eq!(video, Some(1));
                assert_eq!(audio, Some(0));
                assert!(!interactive);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_config_subcommands() {
        let args = Args::parse_from(["vidstash", "config", "set-instance", "https://api.example"]);
        assert!(matches!(
            args.command,
            Commands::Config { action: ConfigAction::SetInstance { .. } }
        ));
    }
}
