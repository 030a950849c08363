use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use uor_collection::config::{LoaderConfig, LogLevel, PullOptions, PushOptions};
use uor_collection::oci::{LayoutFetcher, Reference, RegistryFetcher, RegistryOptions};
use uor_collection::signing::{CosignCli, Signer, Verifier};
use uor_collection::{logging, Collection, Descriptor, Fetcher, ManifestLoader};

#[derive(Parser)]
#[command(
    name = "uor-collection",
    version,
    about = "Build content-addressed collections from OCI manifests"
)]
struct Cli {
    /// error, warn, info, debug or trace
    #[arg(long, global = true, env = "UOR_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a manifest tree and list its nodes
    Inspect(InspectArgs),
    /// Sign a pushed collection
    Sign(SignArgs),
    /// Verify the signature of a collection
    Verify(SignArgs),
}

#[derive(Args)]
struct RegistryArgs {
    /// Credential config files, consulted in order
    #[arg(long = "config", short = 'c')]
    configs: Vec<PathBuf>,
    #[arg(long)]
    plain_http: bool,
    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// Registry reference, or a directory with --layout
    source: String,
    /// Read SOURCE as an OCI image layout directory
    #[arg(long)]
    layout: bool,
    /// Manifest tag inside the layout's index.json
    #[arg(long, requires = "layout")]
    tag: Option<String>,
    #[command(flatten)]
    registry: RegistryArgs,
    /// Concurrent fetches; 1 walks the tree strictly in order
    #[arg(long, env = "UOR_MAX_CONCURRENT_FETCHES")]
    concurrency: Option<usize>,
    /// Per-fetch timeout in seconds
    #[arg(long, env = "UOR_FETCH_TIMEOUT_SECS")]
    timeout: Option<u64>,
    /// Verify the signature before loading
    #[arg(long)]
    verify: bool,
    /// Print nodes as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SignArgs {
    reference: String,
    #[command(flatten)]
    registry: RegistryArgs,
    /// Do not enable cosign's experimental keyless mode
    #[arg(long)]
    no_experimental: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json, cli.log_level)?;

    let ctx = CancellationToken::new();
    let on_interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Inspect(args) => inspect(&ctx, args, cli.log_level).await,
        Command::Sign(args) => sign(args, cli.log_level).await,
        Command::Verify(args) => verify(args, cli.log_level).await,
    }
}

async fn inspect(ctx: &CancellationToken, args: InspectArgs, log_level: LogLevel) -> Result<()> {
    let mut config = LoaderConfig::from_env();
    if let Some(n) = args.concurrency {
        config = config.with_max_concurrency(n);
    }
    if let Some(secs) = args.timeout {
        config = config.with_fetch_timeout(Duration::from_secs(secs));
    }

    let collection = Collection::new(args.source.clone());

    if args.layout {
        let fetcher = LayoutFetcher::new(&args.source);
        let root = fetcher.resolve(args.tag.as_deref()).await?;
        load(ctx, &collection, &fetcher, &root, config).await?;
    } else {
        let pull = PullOptions {
            source: args.source.clone(),
            configs: args.registry.configs.clone(),
            plain_http: args.registry.plain_http,
            insecure: args.registry.insecure,
            log_level,
            verify: args.verify,
        };
        let reference = Reference::parse(&pull.source)?;
        let keychain = Arc::new(pull.keychain());

        if pull.verify {
            CosignCli::new(pull.signing_config(), keychain.clone())
                .verify(&reference)
                .await
                .context("signature verification failed")?;
        }

        let options = RegistryOptions {
            plain_http: pull.plain_http,
            insecure: pull.insecure,
        };
        let fetcher = RegistryFetcher::new(reference, options, keychain.as_ref())?;
        let root = fetcher.resolve().await?;
        load(ctx, &collection, &fetcher, &root, config).await?;
    }

    print_nodes(&collection, args.json)
}

async fn load<F: Fetcher>(
    ctx: &CancellationToken,
    collection: &Collection,
    fetcher: &F,
    root: &Descriptor,
    config: LoaderConfig,
) -> Result<()> {
    ManifestLoader::new(fetcher)
        .with_config(config)
        .load(ctx, collection, root)
        .await
        .with_context(|| format!("failed to load collection from {}", root.digest))?;
    Ok(())
}

fn print_nodes(collection: &Collection, json: bool) -> Result<()> {
    let mut nodes = collection.nodes();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    if json {
        let out = serde_json::json!({ "name": collection.name(), "nodes": nodes });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for node in &nodes {
        println!(
            "{}\t{}\t{}\t{}",
            node.id,
            node.media_type,
            node.size,
            node.title().unwrap_or("-")
        );
    }
    println!("{} nodes", nodes.len());
    Ok(())
}

async fn sign(args: SignArgs, log_level: LogLevel) -> Result<()> {
    let push = PushOptions {
        destination: args.reference.clone(),
        configs: args.registry.configs.clone(),
        plain_http: args.registry.plain_http,
        insecure: args.registry.insecure,
        log_level,
        sign: true,
    };
    let reference = Reference::parse(&push.destination)?;
    let config = push.signing_config().experimental(!args.no_experimental);
    CosignCli::new(config, Arc::new(push.keychain()))
        .sign(&reference)
        .await?;
    println!("Signed {}", reference);
    Ok(())
}

async fn verify(args: SignArgs, log_level: LogLevel) -> Result<()> {
    let pull = PullOptions {
        source: args.reference.clone(),
        configs: args.registry.configs.clone(),
        plain_http: args.registry.plain_http,
        insecure: args.registry.insecure,
        log_level,
        verify: true,
    };
    let reference = Reference::parse(&pull.source)?;
    let config = pull.signing_config().experimental(!args.no_experimental);
    CosignCli::new(config, Arc::new(pull.keychain()))
        .verify(&reference)
        .await?;
    println!("Verified {}", reference);
    Ok(())
}
