//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands::{self, ExtractArgs};
use crate::logging;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use wavext::config::BackendKind;
use wavext::waveform::Metric;

/// Fixed-length waveform extraction from audio files and streams
#[derive(Parser)]
#[command(name = "wavext")]
#[command(version)]
#[command(about = "Fixed-length waveform extraction from audio files and streams")]
#[command(long_about = "Fixed-length waveform extraction from audio files and streams.\n\nDecodes any source ffmpeg can read (WAV is decoded natively), folds it to mono\nand reduces it to a fixed number of normalized points for waveform rendering.\n\nEXAMPLES:\n    # 200 amplitude points as JSON on stdout\n    $ wavext extract song.mp3\n    \n    # 64 RMS points written to a file\n    $ wavext x song.flac -n 64 -m rms -o song.json\n    \n    # Give up on a slow stream after 30 seconds\n    $ wavext extract https://example.com/live.ogg --timeout 30\n    \n    # Edit configuration file\n    $ wavext config")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/wavext/wavext.toml\n    Logs:               ~/.local/state/wavext/wavext.log.*"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a waveform from an audio file or URL
    ///
    /// Writes {"data": [...], "truncated": bool} to stdout or FILE.
    /// Failures are written to stderr as {"error": ..., "code": ...}.
    /// Ctrl-C cancels the extraction.
    #[command(visible_alias = "x")]
    Extract {
        /// Audio file path, file:// URI or stream URL
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Number of waveform points (clamped to 1-500)
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        samples: Option<i64>,

        /// How each bucket is reduced to a value
        #[arg(short, long, value_enum)]
        metric: Option<Metric>,

        /// Write the waveform to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Decoder backend
        #[arg(long, value_enum)]
        decoder: Option<BackendKind>,

        /// Cancel the extraction after SECS seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Open configuration file in your preferred editor
    ///
    /// Creates the file with default values first if it does not exist.
    /// Uses $EDITOR environment variable or falls back to nano/vi.
    #[command(visible_alias = "c")]
    Config,

    /// Show recent log entries from the application
    ///
    /// Display the last 50 lines of the most recent log file.
    /// Useful for troubleshooting issues.
    Logs,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   wavext completions bash > wavext.bash
    ///   wavext completions zsh > _wavext
    ///   wavext completions fish > wavext.fish
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Runs the application based on command-line arguments.
///
/// # Exit Codes
/// - 0: Success
/// - 1: General or extraction error
/// - 2: Usage error (invalid arguments)
/// - 130: Extraction cancelled
///
/// # Errors
/// - If logging initialization fails
/// - If command execution fails
pub async fn run() -> Result<ExitCode, anyhow::Error> {
    let cli = Cli::parse();

    // Commands that don't need logging
    match &cli.command {
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "wavext", &mut io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Logs => {
            commands::handle_logs()?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    logging::init_logging()?;

    match cli.command {
        Commands::Extract {
            source,
            samples,
            metric,
            output,
            decoder,
            timeout,
        } => {
            commands::handle_extract(ExtractArgs {
                source,
                samples,
                metric,
                output,
                decoder,
                timeout_secs: timeout,
            })
            .await
        }
        Commands::Config => {
            commands::handle_config()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { .. } | Commands::Logs => {
            unreachable!("These commands are handled earlier")
        }
    }
}
