use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use fileop::{OperationOutput, OperationRegistry, OperationRequest, SourceFile};
use std::path::PathBuf;
use tracing::{debug, info};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    " for ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ")"
);

/// Run server-side file operations: expand zip archives into S3 buckets, or render web pages to
/// images and PDFs
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,

    #[clap(flatten)]
    config: fileop::Config,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Read the job config from this JSON file.
    ///
    /// When this is set, the config-related command line options are ignored.
    #[clap(long, global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one file operation on a source file
    Run {
        /// URL of the source file: http(s)://, s3://bucket/key, or file://
        #[clap(long, value_name = "URL")]
        src_url: String,

        /// Mime type of the source file, for example `application/zip` or `text/html`
        #[clap(long)]
        mime_type: String,

        /// Size of the source file.
        ///
        /// Can be specified as an integer, ie "1000000", or with a suffix ie "10MB".  If not set,
        /// the size of a `file://` source is read from the filesystem, and any other source is
        /// assumed to be within limits.
        #[clap(long)]
        size: Option<byte_unit::Byte>,

        /// Request ID used in log output
        #[clap(long, default_value = "cli")]
        req_id: String,

        /// The operation command, for example `unzip/bucket/cGhvdG9z/prefix/b3V0Lw==`
        #[clap(value_name = "CMD")]
        cmd: String,
    },

    /// Run a request read from a JSON file, in the form the task runner sends it
    Request {
        /// Path to the request JSON file
        #[clap(value_name = "PATH")]
        path: PathBuf,
    },

    /// List the available operations
    Operations,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args.globals);

    let config = match &args.globals.config_file {
        Some(path) => fileop::Config::from_json_file(path)
            .wrap_err_with(|| format!("Failed to load config file '{}'", path.display()))?,
        None => args.config.normalized(),
    };
    debug!(?config, "Using config");

    let registry = OperationRegistry::from_config(&config).await;

    let request = match args.command {
        Command::Operations => {
            for name in registry.names() {
                println!("{name}");
            }

            return Ok(());
        }
        Command::Run {
            src_url,
            mime_type,
            size,
            req_id,
            cmd,
        } => {
            let size = match size {
                Some(size) => u64::try_from(size.get_bytes())?,
                None => local_file_size(&src_url).await,
            };

            OperationRequest {
                req_id,
                cmd,
                src: SourceFile {
                    url: src_url,
                    mime_type,
                    size,
                },
            }
        }
        Command::Request { path } => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .wrap_err_with(|| format!("Failed to read request file '{}'", path.display()))?;

            serde_json::from_str(&json)
                .wrap_err_with(|| format!("Failed to parse request file '{}'", path.display()))?
        }
    };

    info!(req_id = %request.req_id, cmd = %request.cmd, "Running request");

    let output = registry.run(&request).await?;

    let json = match output {
        OperationOutput::Json(json) => json,
        OperationOutput::File { path, content_type } => serde_json::json!({
            "path": path,
            "content_type": content_type,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&json)?);

    Ok(())
}

/// The size of a `file://` source, or 0 for anything else or if it can't be read
async fn local_file_size(src_url: &str) -> u64 {
    match fileop::SourceArchive::from_url(src_url) {
        Ok(fileop::SourceArchive::File(path)) => tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0),
        _ => 0,
    }
}

fn init_logging(globals: &Globals) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if globals.verbose {
        "debug"
    } else if globals.quiet {
        "error"
    } else {
        "info"
    };

    // RUST_LOG takes precedence over the command line; the AWS SDK and HTTP stack are very
    // chatty at debug level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("h2=warn,hyper=info,rustls=info,aws=info,{level}"))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
