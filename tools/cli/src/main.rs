//! NasCrypt CLI - Command line interface for vault and file encryption.
//!
//! This tool sets up and unlocks a vault, encrypts and decrypts files with
//! the vault data key, and handles password-only containers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use nascrypt_crypto::{ContainerInfo, CHUNK_SIZE};
use nascrypt_vault::{VaultOptions, VaultRecord, VaultService};

/// Extension appended to encrypted files.
const ENCRYPTED_EXTENSION: &str = "nasc";

#[derive(Parser)]
#[command(name = "nascrypt")]
#[command(about = "NasCrypt - Streaming file encryption and vault key custody")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Vault directory (default: platform data dir).
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// JSON file with vault options.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init,

    /// Show vault status.
    Status,

    /// Change the vault master password.
    Passwd,

    /// Encrypt a file with the vault data key.
    Encrypt {
        /// File to encrypt.
        input: PathBuf,

        /// Output path (default: input with .nasc appended).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a file with the vault data key.
    Decrypt {
        /// Encrypted file.
        input: PathBuf,

        /// Output path (default: input without .nasc).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Plaintext offset to start from.
        #[arg(long)]
        offset: Option<u64>,

        /// Maximum number of plaintext bytes to write.
        #[arg(long)]
        length: Option<u64>,
    },

    /// Encrypt a file with a password only, without a vault.
    Seal {
        /// File to encrypt.
        input: PathBuf,

        /// Output path (default: input with .nasc appended).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a password-only container.
    Open {
        /// Encrypted file.
        input: PathBuf,

        /// Output path (default: input without .nasc).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show container header and size information.
    Inspect {
        /// File to inspect.
        file: PathBuf,
    },

    /// Export the vault data key wrapped under a share password.
    ShareKey {
        /// Write the key material JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export the vault record (password-wrapped key) for backup.
    Backup {
        /// Write the record JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recreate the vault from a backed-up record.
    Restore {
        /// Record JSON produced by `backup`.
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let vault_path = match cli.vault {
        Some(path) => path,
        None => default_vault_path()?,
    };
    let options = match &cli.config {
        Some(path) => VaultOptions::from_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => VaultOptions::default(),
    };
    debug!(vault = %vault_path.display(), ?options, "starting");

    match cli.command {
        Commands::Init => cmd_init(&vault_path, options),

        Commands::Status => cmd_status(&vault_path, options),

        Commands::Passwd => cmd_passwd(&vault_path, options),

        Commands::Encrypt { input, output } => cmd_encrypt(&vault_path, options, &input, output),

        Commands::Decrypt {
            input,
            output,
            offset,
            length,
        } => cmd_decrypt(&vault_path, options, &input, output, offset, length),

        Commands::Seal { input, output } => cmd_seal(&input, output),

        Commands::Open { input, output } => cmd_open(&input, output),

        Commands::Inspect { file } => cmd_inspect(&file),

        Commands::ShareKey { output } => cmd_share_key(&vault_path, options, output),

        Commands::Backup { output } => cmd_backup(&vault_path, options, output),

        Commands::Restore { input } => cmd_restore(&vault_path, options, &input),
    }
}

fn default_vault_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine the platform data directory")?;
    Ok(data_dir.join("nascrypt").join("vault"))
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

/// Prompt twice and require both entries to match.
fn prompt_new_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;

    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    Ok(password)
}

/// Open the vault and unlock it with a prompted password.
fn unlock_vault(vault_path: &Path, options: VaultOptions) -> Result<VaultService> {
    let service = VaultService::with_options(vault_path, options);
    if !service.is_configured() {
        anyhow::bail!(
            "No vault at {}. Run `nascrypt init` first",
            vault_path.display()
        );
    }

    let password = prompt_password("Enter vault password: ")?;
    service.unlock(&password).context("Failed to unlock vault")?;
    Ok(service)
}

/// Create a new vault.
fn cmd_init(vault_path: &Path, options: VaultOptions) -> Result<()> {
    info!("Creating new vault at: {}", vault_path.display());

    let service = VaultService::with_options(vault_path, options);
    let password = prompt_new_password("Enter new vault password: ")?;
    service.setup(&password).context("Failed to create vault")?;
    service.lock()?;

    println!("Vault created successfully!");
    println!("  Location: {}", vault_path.display());

    Ok(())
}

/// Show vault status.
fn cmd_status(vault_path: &Path, options: VaultOptions) -> Result<()> {
    let service = VaultService::with_options(vault_path, options);
    let status = service.status();

    println!("Vault Status:");
    println!("  Location: {}", status.vault_path.display());
    println!("  State: {}", status.state);
    println!("  Format version: {}", status.version);
    println!("  Algorithm: {}", status.algorithm);
    println!("  KDF: {}", status.kdf);
    println!("  Failed unlocks: {}", status.failed_unlocks);
    let limits = service.options();
    if limits.max_failed_unlocks > 0 {
        println!(
            "  Lockout: after {} failures, for {} s",
            limits.max_failed_unlocks, limits.lockout_secs
        );
    } else {
        println!("  Lockout: disabled");
    }

    if let Some(record) = VaultRecord::load(vault_path).context("Failed to read vault record")? {
        println!("  Created: {}", record.created_at);
        println!("  Modified: {}", record.modified_at);
        println!("  KDF Parameters:");
        println!("    Memory: {} KiB", record.kdf_params.memory_cost);
        println!("    Time: {} iterations", record.kdf_params.time_cost);
        println!("    Parallelism: {}", record.kdf_params.parallelism);
    }

    Ok(())
}

/// Change vault password.
fn cmd_passwd(vault_path: &Path, options: VaultOptions) -> Result<()> {
    info!("Changing vault password");

    let service = VaultService::with_options(vault_path, options);
    let old_password = prompt_password("Enter current password: ")?;
    service
        .unlock(&old_password)
        .context("Failed to unlock vault")?;

    let new_password = prompt_new_password("Enter new password: ")?;
    service
        .change_password(&old_password, &new_password)
        .context("Failed to change password")?;
    service.lock()?;

    println!("Password changed successfully!");

    Ok(())
}

/// Encrypt a file with the vault data key.
fn cmd_encrypt(
    vault_path: &Path,
    options: VaultOptions,
    input: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| encrypted_name(input));
    let service = unlock_vault(vault_path, options)?;

    let reader = open_input(input)?;
    let bytes = write_output(&output, |writer| {
        Ok(service.encrypt_stream(reader, writer)?)
    })
    .context("Failed to encrypt file")?;

    println!(
        "Encrypted {} ({} bytes) -> {}",
        input.display(),
        bytes,
        output.display()
    );
    Ok(())
}

/// Decrypt a file with the vault data key.
fn cmd_decrypt(
    vault_path: &Path,
    options: VaultOptions,
    input: &Path,
    output: Option<PathBuf>,
    offset: Option<u64>,
    length: Option<u64>,
) -> Result<()> {
    let output = match output {
        Some(path) => path,
        None => decrypted_name(input)?,
    };
    let service = unlock_vault(vault_path, options)?;

    let result = if offset.is_some() || length.is_some() {
        let file = File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        write_output(&output, |writer| {
            Ok(service.decrypt_range(file, writer, offset.unwrap_or(0), length)?)
        })
    } else {
        let reader = open_input(input)?;
        write_output(&output, |writer| Ok(service.decrypt_stream(reader, writer)?))
    };
    let bytes = result.context("Failed to decrypt file")?;

    println!(
        "Decrypted {} ({} bytes) -> {}",
        input.display(),
        bytes,
        output.display()
    );
    Ok(())
}

/// Encrypt a file with a password only.
fn cmd_seal(input: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| encrypted_name(input));
    let password = prompt_new_password("Enter password: ")?;

    let reader = open_input(input)?;
    let bytes = write_output(&output, |writer| {
        Ok(nascrypt_crypto::encrypt_stream(&password, reader, writer)?)
    })
    .context("Failed to encrypt file")?;

    println!(
        "Sealed {} ({} bytes) -> {}",
        input.display(),
        bytes,
        output.display()
    );
    Ok(())
}

/// Decrypt a password-only container.
fn cmd_open(input: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = match output {
        Some(path) => path,
        None => decrypted_name(input)?,
    };
    let password = prompt_password("Enter password: ")?;

    let reader = open_input(input)?;
    let bytes = write_output(&output, |writer| {
        Ok(nascrypt_crypto::decrypt_stream(&password, reader, writer)?)
    })
    .context("Failed to decrypt file")?;

    println!(
        "Opened {} ({} bytes) -> {}",
        input.display(),
        bytes,
        output.display()
    );
    Ok(())
}

/// Show container information.
fn cmd_inspect(file: &Path) -> Result<()> {
    let mut reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let info = ContainerInfo::inspect(&mut reader).context("Failed to inspect file")?;

    println!("Container Information:");
    println!("  File: {}", file.display());

    let Some(header) = info.header.filter(|_| info.is_valid) else {
        println!("  Not a NasCrypt container.");
        return Ok(());
    };

    println!("  Version: 0x{:02x}", header.version);
    println!("  Encrypted size: {} bytes", info.encrypted_size);
    println!("  Chunks: {} x {} bytes", info.chunk_count, CHUNK_SIZE);
    println!("  Plaintext size: {} bytes", info.plaintext_size);

    Ok(())
}

/// Export the vault data key for a share recipient.
fn cmd_share_key(vault_path: &Path, options: VaultOptions, output: Option<PathBuf>) -> Result<()> {
    let service = unlock_vault(vault_path, options)?;
    let share_password = prompt_new_password("Enter share password: ")?;

    let material = service
        .export_key_material(&share_password)
        .context("Failed to export key material")?;
    service.lock()?;
    let json = material.to_json()?;

    match output {
        Some(path) => {
            write_output(&path, |writer| {
                writer.write_all(json.as_bytes())?;
                Ok(json.len() as u64)
            })
            .context("Failed to write key material")?;
            println!("Key material written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Export the vault record; works while locked.
fn cmd_backup(vault_path: &Path, options: VaultOptions, output: Option<PathBuf>) -> Result<()> {
    let service = VaultService::with_options(vault_path, options);
    let record = service
        .export_record()
        .with_context(|| format!("Failed to export vault at {}", vault_path.display()))?;

    match output {
        Some(path) => {
            write_output(&path, |writer| {
                writer.write_all(&record)?;
                Ok(record.len() as u64)
            })
            .context("Failed to write vault backup")?;
            println!("Vault backup written to {}", path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&record)),
    }

    Ok(())
}

/// Install a backed-up record into an empty vault directory.
fn cmd_restore(vault_path: &Path, options: VaultOptions, input: &Path) -> Result<()> {
    let record = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let service = VaultService::with_options(vault_path, options);
    service.import_record(&record).context("Failed to restore vault")?;

    println!("Vault restored to {}", vault_path.display());
    println!("  Unlock it with the password it was backed up under.");
    Ok(())
}

fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Create `path`, run `write` against it, and remove it again on failure.
fn write_output<F>(path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64>,
{
    if path.exists() {
        anyhow::bail!("Refusing to overwrite {}", path.display());
    }

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let result = write(&mut writer).and_then(|bytes| {
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(bytes)
    });

    if result.is_err() {
        drop(writer);
        if let Err(e) = fs::remove_file(path) {
            debug!(error = %e, path = %path.display(), "could not remove partial output");
        }
    }

    result
}

fn encrypted_name(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

fn decrypted_name(input: &Path) -> Result<PathBuf> {
    match input.extension() {
        Some(ext) if ext == ENCRYPTED_EXTENSION => Ok(input.with_extension("")),
        _ => anyhow::bail!(
            "Cannot derive an output name for {}; pass --output",
            input.display()
        ),
    }
}
