//! vaultcodec CLI - Command line front end for the container codec.
//!
//! Inspects, opens and seals encrypted containers, and benchmarks the
//! key derivation backends.

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use vaultcodec_container::{CodecConfig, ContainerCodec, OuterHeader};
use vaultcodec_crypto::kdf::AesKdf;
use vaultcodec_crypto::keys::random_bytes;
use vaultcodec_crypto::params::SEED_LENGTH;
use vaultcodec_crypto::{CipherEngine, CompositeKey, KeyTransformer, SelectionPolicy};

#[derive(Parser)]
#[command(name = "vaultcodec")]
#[command(about = "vaultcodec - Encrypted container codec")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON codec configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container header information.
    Info {
        /// Path to the container.
        file: PathBuf,
    },

    /// Decrypt a container and write its body.
    Open {
        /// Path to the container.
        file: PathBuf,

        /// Key file to combine with the password.
        #[arg(short, long)]
        key_file: Option<PathBuf>,

        /// Output path for the decrypted body.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt a body into a new container.
    Seal {
        /// Plaintext body to seal.
        body: PathBuf,

        /// Output path for the container.
        #[arg(short, long)]
        output: PathBuf,

        /// Key file to combine with the password.
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },

    /// Time AES-KDF on the native and portable backends.
    KdfBench {
        /// Transformation rounds.
        #[arg(short, long, default_value_t = 1_000_000)]
        rounds: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { file } => cmd_info(&file),

        Commands::Open {
            file,
            key_file,
            output,
        } => cmd_open(config, &file, key_file.as_deref(), output.as_deref()),

        Commands::Seal {
            body,
            output,
            key_file,
        } => cmd_seal(config, &body, &output, key_file.as_deref()),

        Commands::KdfBench { rounds } => cmd_kdf_bench(config, rounds),
    }
}

/// Load the codec configuration, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<CodecConfig> {
    let Some(path) = path else {
        return Ok(CodecConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = CodecConfig::from_json(&json).context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Build the composite key from a prompted password and optional key file.
fn composite_key(password: &str, key_file: Option<&Path>) -> Result<CompositeKey> {
    let mut builder = CompositeKey::builder();
    if !password.is_empty() {
        builder = builder.password(password.as_bytes());
    }
    if let Some(path) = key_file {
        let content = Zeroizing::new(
            fs::read(path).with_context(|| format!("Failed to read key file {}", path.display()))?,
        );
        builder = builder.key_file(&content);
    }
    builder.build().context("A password or key file is required")
}

/// Show header fields. Nothing here needs the key.
fn cmd_info(file: &Path) -> Result<()> {
    let handle = File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let parsed = OuterHeader::read(&mut BufReader::new(handle)).context("Failed to read header")?;
    let header = &parsed.header;

    println!("Container Information:");
    println!("  Format: {}", header.format());
    match CipherEngine::resolve(&header.cipher_id) {
        Ok(engine) => println!("  Cipher: {}", engine.name()),
        Err(_) => println!("  Cipher: unknown ({})", header.cipher_id),
    }
    println!("  Compression: {:?}", header.compression);
    println!("  Header SHA-256: {}", hex::encode(parsed.hash));

    match KeyTransformer::resolve(&header.kdf_parameters) {
        Ok(KeyTransformer::Aes(aes)) => {
            println!("  KDF: AES-KDF");
            println!("    Rounds: {}", aes.rounds);
        }
        Ok(KeyTransformer::Argon2(argon)) => {
            println!("  KDF: {:?}", argon.variant);
            println!("    Memory: {} KiB", argon.memory_kib);
            println!("    Time: {} iterations", argon.iterations);
            println!("    Parallelism: {}", argon.parallelism);
        }
        Err(e) => println!("  KDF: {}", e),
    }

    if let Some(kind) = header.inner_random_stream {
        println!("  Inner stream: {:?}", kind);
    }
    if let Some(comment) = &header.comment {
        println!("  Comment: {}", String::from_utf8_lossy(comment));
    }
    if let Some(data) = &header.public_custom_data {
        println!(
            "  Public custom data: {}",
            base64::engine::general_purpose::STANDARD.encode(data)
        );
    }

    Ok(())
}

/// Decrypt a container.
fn cmd_open(config: CodecConfig, file: &Path, key_file: Option<&Path>, output: Option<&Path>) -> Result<()> {
    info!("Opening container: {}", file.display());

    let password = prompt_password("Enter password: ")?;
    let key = composite_key(&password, key_file)?;

    let codec = ContainerCodec::new(config)?;
    let opened = codec.open_path(file, &key).context("Failed to open container")?;

    match output {
        Some(path) => {
            fs::write(path, opened.body.as_slice()).context("Failed to write output file")?;
            println!(
                "Container opened: {} ({} bytes)",
                path.display(),
                opened.body.len()
            );
        }
        None => {
            println!("Container opened successfully!");
            println!("  Format: {}", opened.header.format());
            println!("  Body: {} bytes", opened.body.len());
        }
    }

    Ok(())
}

/// Seal a body with the configured settings.
fn cmd_seal(config: CodecConfig, body: &Path, output: &Path, key_file: Option<&Path>) -> Result<()> {
    info!("Sealing {} into {}", body.display(), output.display());

    let password = prompt_password("Enter password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() && key_file.is_none() {
        anyhow::bail!("Password cannot be empty without a key file");
    }

    let key = composite_key(&password, key_file)?;
    let content = Zeroizing::new(fs::read(body).context("Failed to read body")?);

    let codec = ContainerCodec::new(config)?;
    codec
        .seal_path(output, &key, &content)
        .context("Failed to seal container")?;

    println!("Container sealed successfully!");
    println!("  Format: {}", codec.config().format);
    println!("  Cipher: {}", codec.config().cipher.name());
    println!("  Location: {}", output.display());

    Ok(())
}

/// Compare native and portable AES-KDF.
fn cmd_kdf_bench(config: CodecConfig, rounds: u64) -> Result<()> {
    let transformer = KeyTransformer::Aes(AesKdf { rounds });
    let seed = random_bytes(SEED_LENGTH);
    let key = CompositeKey::from_password(b"benchmark")?;

    let native = config.selection_policy();
    let portable = SelectionPolicy::portable_only();

    let start = Instant::now();
    let native_key = transformer.transform_with(&native, &seed, &key)?;
    let native_time = start.elapsed();

    let start = Instant::now();
    let portable_key = transformer.transform_with(&portable, &seed, &key)?;
    let portable_time = start.elapsed();

    println!("AES-KDF, {} rounds:", rounds);
    println!("  Native available: {}", native.native_available());
    println!("  Native:   {:?}", native_time);
    println!("  Portable: {:?}", portable_time);

    if native_key.as_bytes() != portable_key.as_bytes() {
        anyhow::bail!("Native and portable backends disagree");
    }
    println!("  Outputs match.");

    Ok(())
}
