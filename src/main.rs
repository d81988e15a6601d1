//! bryckctl - Bryck lifecycle command line
//!
//! ```text
//! bryckctl format --key-file /root/bryck.key --yes
//! bryckctl mount  --key-file /root/bryck.key /mnt/bryck
//! bryckctl info
//! bryckctl eject
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bryck::adapters::{LoggingEventPublisher, ShellCommandRunner};
use bryck::domain::ports::CommandRunner;
use bryck::hardware::{DriveScanner, ScannerConfig};
use bryck::{BryckConfig, BryckController, FormatOptions, MountOptions, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Format, mount, eject and erase Bryck drive sets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Configuration file (JSON)
    #[arg(long, env = "BRYCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Run host commands through sudo
    #[arg(long, global = true)]
    sudo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Erase, encrypt and build a fresh Bryck filesystem
    Format {
        /// Do not encrypt the drives
        #[arg(long = "no-enc")]
        no_enc: bool,

        /// Skip authentication
        #[arg(long = "no-auth")]
        no_auth: bool,

        /// Key file used to encrypt the drives
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Skip the secure erase
        #[arg(long = "no-erase")]
        no_erase: bool,

        /// Data RAID chunk size in MB
        #[arg(long)]
        raid_chunk: Option<u64>,

        /// Data RAID level (0, 5 or 6)
        #[arg(long, default_value_t = 5)]
        raid_level: u8,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Unlock, repair if needed and mount the Bryck
    Mount {
        /// Key file used to unlock the drives
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Directory to mount the Bryck filesystem on
        mount_dir: PathBuf,
    },

    /// Unmount, stop RAID and lock the drives
    Eject,

    /// Securely erase every drive
    Erase {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Replace the encryption key
    Setkey {
        /// Current key file
        old: PathBuf,
        /// New key file
        new: PathBuf,
    },

    /// Show product, capacity and usage
    Info,

    /// List the Bryck drives as JSON
    List,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(&args).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            if args.json {
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                eprintln!("Error: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: &Args) -> Result<String> {
    let config = match &args.config {
        Some(path) => BryckConfig::load(path)?,
        None => BryckConfig::default(),
    };
    debug!(?config, "Loaded configuration");

    let runner: Arc<dyn CommandRunner> = if args.sudo {
        Arc::new(ShellCommandRunner::with_sudo())
    } else {
        Arc::new(ShellCommandRunner::new())
    };
    let scanner = DriveScanner::new(ScannerConfig::from_config(&config), runner.clone());
    let events = Arc::new(LoggingEventPublisher::info_level());
    let mut controller = BryckController::discover(config, runner, &scanner, events).await?;

    let message = match &args.command {
        Command::Format {
            no_enc,
            no_auth,
            key_file,
            no_erase,
            raid_chunk,
            raid_level,
            yes,
        } => {
            if !*yes && !confirm("Formatting destroys all data on the Bryck.")? {
                return Ok("Format cancelled".to_string());
            }
            let options = FormatOptions {
                no_auth: *no_auth,
                no_encrypt: *no_enc,
                no_erase: *no_erase,
                raid_chunk_mb: *raid_chunk,
                raid_level: *raid_level,
                key_file: key_file.clone(),
            };
            controller.format(options).await?
        }
        Command::Mount {
            key_file,
            mount_dir,
        } => {
            let options = MountOptions {
                key_file: key_file.clone(),
                mount_dir: Some(mount_dir.clone()),
            };
            controller.mount(options).await?
        }
        Command::Eject => controller.eject().await?,
        Command::Erase { yes } => {
            if !*yes && !confirm("Erasing destroys all data on the Bryck.")? {
                return Ok("Erase cancelled".to_string());
            }
            controller.erase().await?
        }
        Command::Setkey { old, new } => {
            controller
                .set_key(Some(old.clone()), Some(new.clone()))
                .await?
        }
        Command::Info => {
            let info = controller.info().await?;
            return if args.json {
                Ok(serde_json::to_string_pretty(&info)?)
            } else {
                Ok(info.render_text().trim_end().to_string())
            };
        }
        Command::List => return Ok(serde_json::to_string_pretty(&controller.list()?)?),
    };

    if args.json {
        Ok(serde_json::json!({ "message": message }).to_string())
    } else {
        Ok(message)
    }
}

/// Ask on the terminal; only `y` or `yes` proceeds.
fn confirm(warning: &str) -> Result<bool> {
    print!("{warning} Continue? [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
}
