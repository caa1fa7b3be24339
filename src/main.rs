use clap::Parser;
use order_publisher::encoder::{HttpSchemaRegistry, InMemorySchemaRegistry, SchemaRegistry};
use order_publisher::kafka::{DeliveryChannel, KafkaChannel, MemoryChannel, MemoryMode};
use order_publisher::record::Order;
use order_publisher::{Config, PublishReport, Publisher, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "order-publisher")]
#[command(about = "Publishes sample orders to Kafka", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(long, help = "Validate payloads against the schema registry")]
    schema_registry: bool,

    #[arg(short = 'n', long, help = "Number of records to publish")]
    count: Option<usize>,

    #[arg(short, long, help = "Topic to publish to")]
    topic: Option<String>,

    #[arg(long, help = "Publish to an in-memory broker instead of Kafka")]
    dry_run: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting order-publisher");

    match run(args).await {
        Ok(report) => {
            info!(delivered = report.delivered, "All records delivered");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<PublishReport> {
    info!("Loading configuration from {:?}", args.config);
    let mut config = Config::from_file(&args.config)?;

    if args.schema_registry {
        config.publisher.schema_validation = true;
    }
    if let Some(count) = args.count {
        config.publisher.message_count = count;
    }
    if let Some(topic) = args.topic {
        config.publisher.topic = topic;
    }

    info!(
        kafka_brokers = ?config.kafka.brokers,
        topic = %config.publisher.topic,
        message_count = config.publisher.message_count,
        schema_validation = config.publisher.schema_validation,
        dry_run = args.dry_run,
        "Configuration summary"
    );

    let registry = match (config.publisher.schema_validation, args.dry_run) {
        (false, _) => None,
        (true, true) => Some(Arc::new(InMemorySchemaRegistry::new()) as Arc<dyn SchemaRegistry>),
        (true, false) => {
            let settings = config.schema_registry_settings()?;
            info!(url = %settings.url, "Using schema registry");
            Some(Arc::new(HttpSchemaRegistry::new(&settings)?) as Arc<dyn SchemaRegistry>)
        }
    };

    let records = Order::sample_batch(config.publisher.message_count, &mut rand::thread_rng());

    let report = if args.dry_run {
        publish(MemoryChannel::new(MemoryMode::Available), &config, registry, &records).await?
    } else {
        publish(KafkaChannel::new(&config.kafka)?, &config, registry, &records).await?
    };

    report.into_result()
}

async fn publish<C: DeliveryChannel>(
    channel: C,
    config: &Config,
    registry: Option<Arc<dyn SchemaRegistry>>,
    records: &[Order],
) -> Result<PublishReport> {
    let mut publisher = Publisher::new(channel, &config.publisher);
    if let Some(registry) = registry {
        publisher = publisher.with_schema_registry(registry).await?;
    }
    publisher.publish(records).await
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("order_publisher=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("order_publisher=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
