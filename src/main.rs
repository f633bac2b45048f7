use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use oci_distribution::client::{ClientConfig, ClientConfigSource, ClientProtocol};
use oci_distribution::progress::{NoProgress, ProgressObserver};
use oci_distribution::{Client, Puller};
use structopt::StructOpt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod progress;

use progress::TerminalProgress;

/// CLI options for regpull
#[derive(StructOpt, Debug)]
#[structopt(
    name = "regpull",
    about = "List tags and pull image blobs from an OCI/Docker registry"
)]
struct Opts {
    #[structopt(
        long = "images-dir",
        default_value = "images",
        env = "REGPULL_IMAGES_DIR",
        help = "The directory pulled images are stored under, as <images-dir>/<host>/<name>/<tag>/"
    )]
    images_dir: PathBuf,

    #[structopt(
        long = "insecure-registry",
        env = "REGPULL_INSECURE_REGISTRIES",
        use_delimiter = true,
        help = "Registry hosts to reach over plain HTTP. May be repeated or separated by ','"
    )]
    insecure_registries: Vec<String>,

    #[structopt(
        long = "insecure-skip-tls-verify",
        help = "Accept invalid TLS certificates and hostnames"
    )]
    insecure_skip_tls_verify: bool,

    #[structopt(
        long = "timeout",
        env = "REGPULL_TIMEOUT",
        help = "Seconds before any single registry request is abandoned. Unbounded by default"
    )]
    timeout: Option<u64>,

    #[structopt(long = "no-progress", help = "Do not draw transfer progress")]
    no_progress: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Print the tags of a repository
    List {
        #[structopt(help = "The repository as <host>/<repository>[:<tag>]; the tag is ignored")]
        reference: String,
    },
    /// Download an image's config and layers
    Pull {
        #[structopt(help = "The image as <host>/<repository>[:<tag>], the tag defaults to latest")]
        reference: String,
    },
}

impl ClientConfigSource for Opts {
    fn client_config(&self) -> ClientConfig {
        let protocol = if self.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(self.insecure_registries.clone())
        };
        ClientConfig {
            protocol,
            accept_invalid_certificates: self.insecure_skip_tls_verify,
            accept_invalid_hostnames: self.insecure_skip_tls_verify,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    // Logs go to stderr, stdout carries the tag listing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(opts).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    debug!(images_dir = %opts.images_dir.display(), "Using images directory");
    let puller = Puller::new(Client::from_source(&opts), &opts.images_dir);

    match &opts.command {
        Command::List { reference } => {
            let tags = puller
                .list(reference)
                .await
                .with_context(|| format!("Failed to list tags of {}", reference))?;
            println!("Tags:");
            for tag in tags {
                println!("  {}", tag);
            }
        }
        Command::Pull { reference } => {
            let mut progress: Box<dyn ProgressObserver> = if opts.no_progress {
                Box::new(NoProgress)
            } else {
                Box::new(TerminalProgress::default())
            };
            puller
                .pull(reference, progress.as_mut())
                .await
                .with_context(|| format!("Failed to pull {}", reference))?;
        }
    }

    Ok(())
}
