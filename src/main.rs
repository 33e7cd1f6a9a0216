use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use macfs::error::MacFsError;
use macfs::extract::ForkMode;
use macfs::ops;

#[derive(Parser)]
#[command(
    name = "macfs",
    about = "Read classic Macintosh HFS and HFS+ volumes from raw disk images",
    version = env!("APP_VERSION"),
    arg_required_else_help = true,
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Text encoding for HFS names (only MacRoman is implemented)
    #[arg(long, default_value = "macroman", global = true)]
    encoding: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump volume metadata, B-tree shape, and every catalog record
    Analyze {
        /// Disk image or raw block device
        image: PathBuf,
    },
    /// Pretty-print the directory hierarchy
    List {
        /// Disk image or raw block device
        image: PathBuf,
    },
    /// Extract a file's data and resource forks to the host filesystem
    Extract {
        /// Disk image or raw block device
        image: PathBuf,
        /// Bare file name, or a colon-separated HFS path such as
        /// "Macintosh HD:System Folder:Finder"
        query: String,
        /// Directory to write extracted files into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Resource fork rendition: appledouble, macbinary, rsrc, data-only
        #[arg(long, default_value = "appledouble")]
        fork_mode: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if !cli.encoding.eq_ignore_ascii_case("macroman") {
        return Err(MacFsError::UnsupportedVersion(format!(
            "text encoding '{}' (only MacRoman is implemented)",
            cli.encoding
        ))
        .into());
    }

    let result = match cli.command {
        Command::Analyze { image } => ops::analyze(&image),
        Command::List { image } => ops::list(&image),
        Command::Extract {
            image,
            query,
            output,
            fork_mode,
        } => {
            let mode: ForkMode = fork_mode.parse().map_err(anyhow::Error::msg)?;
            ops::extract(&image, &query, &output, mode)
        }
    };

    if let Err(err) = result {
        // An unmatched quarry is an expected outcome, not an error report.
        if let Some(MacFsError::NotFound(query)) = err.downcast_ref::<MacFsError>() {
            println!("not found: {query}");
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}
