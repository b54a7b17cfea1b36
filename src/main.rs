#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use crate::command::{lock, release, status, wait_lock};
use argh::FromArgs;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use store_mutex::configuration::{self, Configuration, ObservabilityConfig};
use store_mutex::Coordinator;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

mod command;

fn set_tracing(config: Option<ObservabilityConfig>) -> Result<(), configuration::Error> {
    if let Some(ObservabilityConfig {
        tracing: Some(tracing_config),
    }) = config
    {
        let resource = Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .build();
        let otlp_exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&tracing_config.endpoint)
            .with_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(otlp_exporter)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .with_sampler(Sampler::TraceIdRatioBased(tracing_config.sampling_rate))
            .build();

        let tracer = tracer_provider.tracer("store-mutex");
        let _ = global::set_tracer_provider(tracer_provider);
        let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .with(telemetry)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    }
    Ok(())
}

#[derive(FromArgs, PartialEq, Debug)]
/// Named locks shared between processes through a common store
struct GlobalArguments {
    #[argh(option, short = 'c', default = "String::from(\"config.toml\")")]
    /// the path to the configuration file, defaults to `config.toml`
    config: String,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Lock(lock::Options),
    WaitLock(wait_lock::Options),
    Status(status::Options),
    Release(release::Options),
}

fn main() -> Result<(), command::Error> {
    let cli_args: GlobalArguments = argh::from_env();

    let config = Configuration::load(&cli_args.config)?;

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run_command(cli_args, config));

    match result {
        Err(err @ command::Error::ChildExit(_)) => std::process::exit(err.exit_code()),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.exit_code());
        }
        Ok(()) => Ok(()),
    }
}

async fn run_command(
    cli_args: GlobalArguments,
    config: Configuration,
) -> Result<(), command::Error> {
    set_tracing(config.observability.clone())?;

    let store = config.store.to_backend()?;
    let coordinator = Coordinator::configure(store, &config.mutex).await?;

    match cli_args.subcommand {
        SubCommand::Lock(options) => {
            let command = lock::Command::new(&options, &config.lock, coordinator);
            command.run().await
        }
        SubCommand::WaitLock(options) => {
            let command = wait_lock::Command::new(&options, &config.lock, coordinator);
            command.run().await
        }
        SubCommand::Status(options) => status::Command::new(&options, coordinator).run().await,
        SubCommand::Release(options) => release::Command::new(&options, coordinator).run().await,
    }
}
