//! Splitbox CLI - encrypted data containers with a separate key file
//!
//! Command-line interface for sealing a file into a data file plus a
//! one-time key file, and for opening, verifying and resealing such pairs.

use clap::{Parser, Subcommand};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use splitbox::config::{ContainerConfig, DEFAULT_BINDING_LEN};
use splitbox::container::SecureContainer;
use splitbox::error::Result;
use splitbox::file_ops::{self, DEFAULT_DATA_FILE, DEFAULT_KEY_FILE};

#[derive(Parser)]
#[command(name = "splitbox")]
#[command(version)]
#[command(about = "Encrypted data file with a separate one-time key file.", long_about = None)]
struct Cli {
    /// Hash used for the integrity checks (md5, sha1, sha224, sha256, sha384, sha512)
    #[arg(long, global = true, env = "SPLITBOX_HASH", default_value = "sha512")]
    hash: String,

    /// Block cipher (AES-128, AES-192, AES-256)
    #[arg(
        long,
        global = true,
        env = "SPLITBOX_CIPHER",
        default_value = "AES-256"
    )]
    cipher: String,

    /// Cipher mode (CBC, CFB, CFB8, CFB128, CTR, ECB, OFB)
    #[arg(long, global = true, env = "SPLITBOX_MODE", default_value = "CFB")]
    mode: String,

    /// Length in bytes of the value binding the data file to its key file
    #[arg(
        long,
        global = true,
        env = "SPLITBOX_BINDING_LEN",
        default_value_t = DEFAULT_BINDING_LEN
    )]
    binding_len: usize,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a file into a data file and a new key file
    #[command(alias = "s")]
    Seal {
        /// Path to the file whose contents is to be sealed
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the data file to
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DATA_FILE)]
        data: PathBuf,

        /// Path to write the key file to
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_KEY_FILE)]
        key: PathBuf,
    },

    /// Open a data file with its key file
    #[command(alias = "o")]
    Open {
        /// Path to the data file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DATA_FILE)]
        data: PathBuf,

        /// Path to the key file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_KEY_FILE)]
        key: PathBuf,

        /// Path to the file to write the recovered contents to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Check that a data file and key file belong together and are unmodified
    #[command(alias = "v")]
    Verify {
        /// Path to the data file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DATA_FILE)]
        data: PathBuf,

        /// Path to the key file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_KEY_FILE)]
        key: PathBuf,
    },

    /// Replace an existing data file and key file with new content, after
    /// checking that the current key file opens the current data file.
    #[command(alias = "r")]
    Reseal {
        /// Path to the file whose contents is to be sealed
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing data file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DATA_FILE)]
        data: PathBuf,

        /// Path to the existing key file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_KEY_FILE)]
        key: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", error_chain(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ContainerConfig::from_names(&cli.hash, &cli.cipher, &cli.mode)?;
    let container = SecureContainer::new(config.with_binding_len(cli.binding_len))?;

    match cli.command {
        Commands::Seal { input, data, key } => {
            file_ops::seal_file(&container, &input, &data, &key)
        }
        Commands::Open { data, key, output } => {
            file_ops::open_file(&container, &data, &key, &output)
        }
        Commands::Verify { data, key } => {
            file_ops::verify(&container, &data, &key)?;
            println!("OK: {} and {} match", data.display(), key.display());
            Ok(())
        }
        Commands::Reseal { input, data, key } => {
            file_ops::reseal_file(&container, &input, &data, &key)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // try_init only fails when a global subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Render an error and its sources as `outer: inner: ...`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
