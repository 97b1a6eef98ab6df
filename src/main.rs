use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use trailsieve::{
    init_tracing_once, CachedConfigStore, CancellationToken, ConfigStore, FileConfigStore, FileProcessor, Handler,
    LocalObjectStore, LogFormat, ObjectStore, PayloadType, ProcessSummary, ProcessorOptions, RuleSet,
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_CONDUIT_BYTES,
};

#[derive(Parser, Debug)]
#[command(name = "trailsieve", version, about = "Filter CloudTrail log files through a YAML rule set")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Destination bucket; output keeps the source key.
    #[arg(long, global = true, env = "CLOUDTRAIL_OUTPUT_BUCKET_NAME", default_value = "")]
    output_bucket: String,

    /// Config store path of the rules YAML.
    #[arg(long, global = true, env = "CONFIG_PATH", default_value = "/cloudtrail/rules")]
    config_path: String,

    #[arg(long, global = true, env = "SNS_PAYLOAD_TYPE", value_enum, default_value_t = PayloadType::Cloudtrail)]
    payload_type: PayloadType,

    /// Directory holding one sub-directory per bucket.
    #[arg(long, global = true, env = "STORE_ROOT", default_value = "./store")]
    store_root: PathBuf,

    /// Directory the config paths resolve against.
    #[arg(long, global = true, env = "CONFIG_ROOT", default_value = "./config")]
    config_root: PathBuf,

    /// Seconds a fetched rules document is reused. 0 disables caching.
    #[arg(long, global = true, env = "CONFIG_CACHE_TTL_SECS", default_value_t = 0)]
    config_ttl_secs: u64,

    #[arg(long, global = true, env = "INVOCATION_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[arg(long, global = true, env = "CONDUIT_BUFFER_BYTES", default_value_t = DEFAULT_CONDUIT_BYTES)]
    conduit_buffer_bytes: usize,

    #[arg(long, global = true, env = "COMPRESSION_LEVEL", default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compression_level: u32,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a notification payload (file, or stdin when omitted).
    Handle {
        #[arg(long)]
        event: Option<PathBuf>,
    },
    /// Process one object, or every object in the bucket when no key is given.
    Process {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Load and validate a rules file.
    Validate {
        #[arg(long)]
        rules: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing_once(cli.global.log_format);

    match cli.command {
        Command::Validate { rules } => validate(&rules),
        Command::Handle { event } => {
            let (processor, _) = build_processor(&cli.global)?;
            let handler = Handler::new(processor, cli.global.payload_type);
            let payload = read_payload(event.as_deref()).await?;
            let cancel = invocation_token(cli.global.timeout_secs);
            let summaries = handler.handle(&payload, &cancel).await.context("handle notification")?;
            print_summaries(&summaries)
        }
        Command::Process { bucket, key } => {
            let (processor, store) = build_processor(&cli.global)?;
            let cancel = invocation_token(cli.global.timeout_secs);
            let keys = match key {
                Some(k) => vec![k],
                None => {
                    let keys = store.list_keys(&bucket).await.with_context(|| format!("list bucket {bucket}"))?;
                    tracing::info!(bucket = %bucket, objects = keys.len(), "backfill");
                    keys
                }
            };
            let mut summaries = Vec::with_capacity(keys.len());
            for key in &keys {
                let summary = processor
                    .process(&bucket, key, &cancel)
                    .await
                    .with_context(|| format!("process s3://{bucket}/{key}"))?;
                summaries.push(summary);
            }
            print_summaries(&summaries)
        }
    }
}

fn build_processor(args: &GlobalArgs) -> Result<(FileProcessor, Arc<LocalObjectStore>)> {
    let opts = ProcessorOptions::new(&args.output_bucket)
        .with_rules_path(&args.config_path)
        .with_conduit_buffer(args.conduit_buffer_bytes)
        .with_compression_level(args.compression_level);
    if opts.output_bucket.is_empty() {
        bail!("output bucket is not set (--output-bucket / CLOUDTRAIL_OUTPUT_BUCKET_NAME)");
    }

    let store = Arc::new(LocalObjectStore::new(&args.store_root));
    let files = FileConfigStore::new(&args.config_root);
    let config: Arc<dyn ConfigStore> = match args.config_ttl_secs {
        0 => Arc::new(files),
        ttl => Arc::new(CachedConfigStore::new(files, Duration::from_secs(ttl))),
    };
    let objects: Arc<dyn ObjectStore> = store.clone();
    Ok((FileProcessor::new(objects, config, opts), store))
}

/// Token cancelled on deadline or Ctrl-C.
fn invocation_token(timeout_secs: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        let deadline = async {
            match timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = deadline => tracing::warn!("invocation deadline reached, cancelling"),
            _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted, cancelling"),
        }
        guard.cancel();
    });
    cancel
}

async fn read_payload(path: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match path {
        Some(p) => tokio::fs::read(p).await.with_context(|| format!("read event {}", p.display())),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await.context("read event from stdin")?;
            Ok(buf)
        }
    }
}

fn validate(path: &std::path::Path) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read rules {}", path.display()))?;
    let rules = RuleSet::load(&text).with_context(|| format!("parse rules {}", path.display()))?;
    let errs = rules.validate();
    if !errs.is_empty() {
        eprintln!("{errs}");
        bail!("{} validation error(s) in {}", errs.len(), path.display());
    }
    println!("{}: {} rule(s) ok", path.display(), rules.len());
    Ok(())
}

fn print_summaries(summaries: &[ProcessSummary]) -> Result<()> {
    for s in summaries {
        println!("{}", serde_json::to_string(s)?);
    }
    Ok(())
}
