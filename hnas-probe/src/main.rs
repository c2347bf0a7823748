use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use hnas_probe::backend::{HnasBackend, InstanceBlockDevTester, random_marker};
use hnas_probe::config::{BackendConfig, HnasConfig};
use hnas_probe::limit::tester::DEFAULT_CONNECTIONS;
use hnas_probe::limit::{LogWatchOptions, LogWatcher, SscLimitTester};
use hnas_probe::metrics;
use hnas_probe::remote::{CommandRunner, SshRunner, SshTarget};
use hnas_probe::retry::{RetryOutcome, RetryPolicy};
use hnas_probe::ssc::parse_table;

#[derive(Parser, Debug)]
#[command(name = "hnas-probe")]
#[command(about = "Inspect an HNAS array while exercising the cinder HNAS driver")]
struct Args {
    /// Probe configuration file (TOML)
    #[arg(long, env = "HNAS_CONFIG", default_value = "/etc/hnas-probe/hnas.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9092)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse an SSC table read from stdin and print it as JSON
    ParseTable,

    /// List the EVS of a backend
    EvsList {
        #[arg(long)]
        backend: String,
    },

    /// Run a command in the SSC shell of a backend
    Ssc {
        #[arg(long)]
        backend: String,

        /// SSC command, e.g. "evs list"
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Find the file backing a volume or snapshot
    LocateVolume {
        /// Backend to search; every enabled backend when omitted
        #[arg(long)]
        backend: Option<String>,

        /// Volume or snapshot id
        #[arg(long)]
        uuid: String,

        /// Service index the volume belongs to
        #[arg(long, default_value = "0")]
        service: usize,

        /// Keep polling until the file shows up
        #[arg(long)]
        wait: bool,

        /// Keep polling until the file is gone
        #[arg(long, conflicts_with = "wait")]
        absent: bool,

        /// Retries after the first attempt when polling
        #[arg(long, default_value = "10")]
        retries: u32,

        /// Seconds between polling attempts
        #[arg(long, default_value = "15")]
        wait_secs: u64,
    },

    /// Wait for a line containing a marker to appear in a log file
    WatchLog {
        /// Log file; defaults to the configured cinder volume log
        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        marker: String,

        /// Read from this byte offset instead of the end of the file
        #[arg(long)]
        start: Option<u64>,

        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },

    /// Hold SSC connections open until the driver reports it cannot connect
    LimitTest {
        #[arg(long)]
        backend: String,

        #[arg(long, default_value_t = DEFAULT_CONNECTIONS)]
        connections: usize,

        /// Seconds to wait for the driver error
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },

    /// Write a marker through a guest block device and read it back on the array
    VerifyWrite {
        #[arg(long)]
        backend: String,

        /// Id of the volume attached to the guest
        #[arg(long)]
        uuid: String,

        #[arg(long, default_value = "0")]
        service: usize,

        /// Guest address
        #[arg(long)]
        vm_host: String,

        #[arg(long, default_value = "ubuntu")]
        vm_user: String,

        #[arg(long, env = "VM_SSH_KEY")]
        vm_key: Option<PathBuf>,

        /// Guest block device name, e.g. vdb
        #[arg(long, default_value = "vdb")]
        device: String,
    },
}

fn ssh_connector(backend: &BackendConfig) -> Arc<dyn CommandRunner> {
    Arc::new(SshRunner::new(backend.ssh_target()))
}

async fn connect_backend(
    config: &HnasConfig,
    name: &str,
) -> Result<HnasBackend, Box<dyn std::error::Error>> {
    let backend = config.backend(name)?;
    let backend = HnasBackend::connect(
        name,
        backend,
        &config.hnas.cinder_manage_host,
        ssh_connector(backend),
    )
    .await?;
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    if let Command::ParseTable = args.command {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        let rows = parse_table(&input)?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let config = HnasConfig::from_file(&args.config)?;
    info!("Loaded config from {}", args.config.display());

    match args.command {
        Command::ParseTable => {}

        Command::EvsList { backend } => {
            let backend = connect_backend(&config, &backend).await?;
            let evs = backend.client().evs_list().await?;
            println!("{}", serde_json::to_string_pretty(&evs)?);
        }

        Command::Ssc { backend, command } => {
            let backend = connect_backend(&config, &backend).await?;
            let output = backend.client().ssc(&command.join(" ")).await?;
            print!("{}", output);
        }

        Command::LocateVolume {
            backend,
            uuid,
            service,
            wait,
            absent,
            retries,
            wait_secs,
        } => {
            let backends = match backend {
                Some(name) => vec![connect_backend(&config, &name).await?],
                None => HnasBackend::from_config(&config, ssh_connector).await?,
            };

            let found = if wait || absent {
                let policy = if absent {
                    RetryPolicy::expect_failure()
                } else {
                    RetryPolicy::expect_success()
                }
                .with_retries(retries)
                .with_wait(Duration::from_secs(wait_secs));

                match HnasBackend::locate_in_any(&backends, &uuid, service, &policy).await? {
                    RetryOutcome::Matched(found) => found,
                    RetryOutcome::ProbeFailed => None,
                    RetryOutcome::Exhausted(_) => {
                        let state = if absent { "still present" } else { "not found" };
                        return Err(format!("volume {} {}", uuid, state).into());
                    }
                }
            } else {
                HnasBackend::find_volume(&backends, &uuid, service).await?
            };

            match found {
                None if absent => println!("volume {} is gone", uuid),
                None => return Err(format!("volume {} not found", uuid).into()),
                Some(_) if absent => return Err(format!("volume {} still present", uuid).into()),
                Some((backend, volume)) => {
                    println!("backend:     {}", backend.name());
                    println!("unix path:   {}", volume.unix_path());
                    println!("filesystem:  {}", volume.fs_name());
                    println!("ssc path:    {}", volume.ssc_path());
                    println!("evs:         {}", volume.evs_id());
                    println!("nfs url:     {}", volume.nfs_url(service)?);
                    println!("manage host: {}", backend.manage_host(service)?);
                    println!("size (GiB):  {:.3}", volume.size_gib().await?);
                }
            }
        }

        Command::WatchLog {
            path,
            marker,
            start,
            timeout_secs,
        } => {
            let path = path.unwrap_or_else(|| config.hnas.volume_log_path.clone());
            let options = LogWatchOptions {
                start,
                timeout: Duration::from_secs(timeout_secs),
                ..Default::default()
            };
            match LogWatcher::spawn(&path, marker, options).await?.wait().await? {
                Some(line) => println!("{}", line),
                None => return Err(format!("marker not found in {}", path.display()).into()),
            }
        }

        Command::LimitTest {
            backend,
            connections,
            timeout_secs,
        } => {
            let backend = connect_backend(&config, &backend).await?;
            let mut tester = SscLimitTester::new(Arc::clone(backend.client()), connections);
            let opened = tester.open_connections().await?;
            info!("Holding {} SSC connection(s)", opened);

            let options = LogWatchOptions {
                timeout: Duration::from_secs(timeout_secs),
                ..Default::default()
            };
            let handle = tester
                .close_connections_on_error(&config.hnas.volume_log_path, options)
                .await?;
            let limit_hit = handle.await??;
            if !limit_hit {
                warn!("Driver did not report an SSC connection failure, closing connections");
                tester.close_connections().await?;
            }
            println!("opened: {}, limit hit: {}", opened, limit_hit);
        }

        Command::VerifyWrite {
            backend,
            uuid,
            service,
            vm_host,
            vm_user,
            vm_key,
            device,
        } => {
            let backend = connect_backend(&config, &backend).await?;
            let volume = backend.volume_reference(&uuid, service).await?;

            let vm = SshRunner::new(SshTarget::new(vm_host, vm_user).with_private_key(vm_key));
            let dev = InstanceBlockDevTester::new(Arc::new(vm), &device);
            info!("Guest device {} has {} MiB", dev.dev_path(), dev.size_mib().await?);

            let marker = random_marker("hnas-write-test");
            dev.write_to_top(&marker).await?;
            let on_array = volume.first_bytes(marker.len()).await?;
            if on_array != marker {
                return Err(format!(
                    "array returned '{}' instead of '{}'",
                    on_array.trim(),
                    marker
                )
                .into());
            }
            println!("marker {} visible on {}", marker, volume.unix_path());
        }
    }

    Ok(())
}
