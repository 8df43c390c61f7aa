//! vitolink: poll a Vitotronic heating controller, log to InfluxDB

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vitolink::http;
use vitolink::poller::{Poller, PollerConfig};
use vitolink::sink::{InfluxSink, SinkConfig};
use vitolink::transport::{LinkConfig, OptolinkLink};
use vitolink::varlist;

#[derive(Parser, Debug)]
#[command(name = "vitolink", version, about)]
struct Args {
    /// Debug mode
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode, less output
    #[arg(short, long)]
    quiet: bool,

    /// Serial port the Optolink adapter is connected to
    #[arg(short, long, value_name = "DEV", default_value = "/dev/ttyUSB0")]
    tty: String,

    /// Seconds to sleep between polling passes
    #[arg(short, long, value_name = "SEC", default_value_t = 15)]
    sleep: u64,

    /// Submit to the database in batches of N polling passes
    #[arg(short = 'B', long, value_name = "N", default_value_t = 5)]
    batch_submit: u32,

    /// Serve ad-hoc queries on http://localhost:PORT/query/{addr}/{tag_or_len}
    #[arg(short = 'w', long, value_name = "PORT")]
    webserver: Option<u16>,

    /// InfluxDB url; '-' disables the sink
    #[arg(
        short = 'i',
        long,
        value_name = "URL",
        default_value = "http://127.0.0.1:8086/"
    )]
    influxdb_url: String,

    /// File with the InfluxDB token (one line)
    #[arg(
        short = 'T',
        long,
        value_name = "FILE",
        default_value = "/usr/local/lib/vitolink/influxdb.token"
    )]
    influxdb_token_file: PathBuf,

    /// InfluxDB organization
    #[arg(short = 'o', long, value_name = "ORG", default_value = "home")]
    influxdb_org: String,

    /// InfluxDB bucket
    #[arg(short = 'b', long, value_name = "BUCKET", default_value = "heating")]
    influxdb_bucket: String,

    /// InfluxDB measurement name for submitted samples
    #[arg(short = 'm', long, value_name = "NAME", default_value = "optolink")]
    influxdb_measurement: String,

    /// File with variables to query regularly
    variablelist: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.debug {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let variables = varlist::load_variable_list(&args.variablelist)?;
    tracing::info!(
        "Loaded {} variables from {}",
        variables.len(),
        args.variablelist.display()
    );

    let link = Arc::new(OptolinkLink::open(&args.tty, LinkConfig::default()).await?);

    let sink = if args.influxdb_url.is_empty() || args.influxdb_url == "-" {
        tracing::info!("No InfluxDB url configured, samples are logged only");
        None
    } else {
        let token = std::fs::read_to_string(&args.influxdb_token_file)?
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Some(InfluxSink::new(SinkConfig {
            url: args.influxdb_url.clone(),
            token,
            org: args.influxdb_org.clone(),
            bucket: args.influxdb_bucket.clone(),
        }))
    };

    let poller = Poller::new(
        Arc::clone(&link),
        variables,
        sink,
        PollerConfig {
            measurement: args.influxdb_measurement.clone(),
            sleep: Duration::from_secs(args.sleep),
            batch_submit: args.batch_submit,
        },
    );
    let poll_task = tokio::spawn(poller.run());

    match args.webserver {
        Some(port) => http::serve(link, port).await?,
        None => poll_task.await?,
    }

    Ok(())
}
