#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use segid_tonic_core::proto::{
    FILE_DESCRIPTOR_SET, segment_id_generator_server::SegmentIdGeneratorServer,
};
use server::config::{CliArgs, ServerConfig};
use server::service::handler::SegmentIdService;
use server::telemetry::Telemetry;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type IdServer = SegmentIdGeneratorServer<SegmentIdService>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;
    let telemetry = Telemetry::init()?;

    // Namespaces are seeded before the listener is bound.
    let service = SegmentIdService::new(config.clone()).await?;
    log_startup_info(&config);

    let served = if config.uds {
        serve_uds(service, &config).await
    } else {
        let listener = TcpListener::bind(&config.server_addr).await?;
        serve(service, TcpListenerStream::new(listener)).await
    };

    telemetry.shutdown();
    served
}

#[cfg(unix)]
async fn serve_uds(service: SegmentIdService, config: &ServerConfig) -> anyhow::Result<()> {
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;

    let path = &config.server_addr;
    let listener = UnixListener::bind(path)?;
    let served = serve(service, UnixListenerStream::new(listener)).await;
    // Best effort; a panic can still leave the socket file behind.
    let _ = std::fs::remove_file(path);
    served
}

#[cfg(not(unix))]
async fn serve_uds(_service: SegmentIdService, _config: &ServerConfig) -> anyhow::Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

/// Serves the ID service, health and reflection on `incoming` until a
/// shutdown signal arrives and the service has drained.
async fn serve<I, IO, IE>(service: SegmentIdService, incoming: I) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<IdServer>().await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(ServiceBuilder::new().layer(cors).layer(GrpcWebLayer::new()))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(id_server(service.clone()))
        .serve_with_incoming_shutdown(incoming, drain_on_signal(service, health_reporter))
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn id_server(service: SegmentIdService) -> IdServer {
    [
        CompressionEncoding::Zstd,
        CompressionEncoding::Gzip,
        CompressionEncoding::Deflate,
    ]
    .into_iter()
    .fold(SegmentIdGeneratorServer::new(service), |server, encoding| {
        server.send_compressed(encoding).accept_compressed(encoding)
    })
}

fn log_startup_info(_config: &ServerConfig) {
    #[cfg(feature = "tracing")]
    {
        tracing::info!(
            addr = %_config.server_addr,
            uds = _config.uds,
            prefetch_workers = _config.prefetch_workers,
            prefetch_period_ms = _config.prefetch_period.as_millis() as u64,
            "Starting segment ID service"
        );
        for seed in &_config.segments {
            tracing::info!(
                namespace = %seed.namespace,
                max_id = seed.max_id,
                step = seed.step,
                safe_distance = seed.safe_distance,
                "Serving namespace"
            );
        }
        if cfg!(debug_assertions) {
            tracing::debug!("Full config: {:#?}", _config);
        }
    }
}

/// Resolves once Ctrl+C or SIGTERM arrives, naming which one.
async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => "Ctrl+C",
        () = terminate => "SIGTERM",
    }
}

/// Flips health to not-serving, then drains the service. The server stops
/// accepting connections once this returns.
async fn drain_on_signal(service: SegmentIdService, health_reporter: HealthReporter) {
    let _signal = wait_for_signal().await;
    #[cfg(feature = "tracing")]
    tracing::info!(signal = _signal, "Shutdown signal received, draining");

    health_reporter.set_not_serving::<IdServer>().await;

    if let Err(_e) = service.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during service shutdown: {:?}", _e);
    }
}
