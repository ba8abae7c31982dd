use anyhow::{Context, bail};
use clap::Parser;
use core::{str::FromStr, time::Duration};
use segid_tonic_core::{segid::TIME_TO_LIVE_FOREVER, types::ID_SIZE};

/// One namespace row seeded into the store at start-up.
///
/// Parsed from `namespace:max_id:step:safe_distance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSeed {
    pub namespace: String,
    pub max_id: i64,
    pub step: i64,
    pub safe_distance: i64,
}

impl FromStr for SegmentSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.trim().split(':').collect();
        let [namespace, max_id, step, safe_distance] = parts.as_slice() else {
            return Err(format!(
                "expected `namespace:max_id:step:safe_distance`, got `{s}`"
            ));
        };
        let number = |name: &str, raw: &str| {
            raw.parse::<i64>()
                .map_err(|e| format!("invalid {name} `{raw}` in `{s}`: {e}"))
        };
        Ok(Self {
            namespace: (*namespace).to_string(),
            max_id: number("max_id", max_id)?,
            step: number("step", step)?,
            safe_distance: number("safe_distance", safe_distance)?,
        })
    }
}

/// Runtime configuration for the `segid-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single node.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segid-tonic-server",
    version,
    about = "A gRPC service handing out segment-chain IDs per namespace"
)]
pub struct CliArgs {
    /// Maximum number of IDs allowed per `StreamIds` request.
    ///
    /// Environment variable: `MAX_ALLOWED_IDS`
    #[arg(long, env = "MAX_ALLOWED_IDS", default_value_t = 1_000_000_000)]
    pub max_allowed_ids: usize,

    /// Number of IDs included in each streamed `IdChunk`.
    ///
    /// Environment variable: `IDS_PER_CHUNK`
    #[arg(long, env = "IDS_PER_CHUNK", default_value_t = 4096)]
    pub ids_per_chunk: usize,

    /// Number of chunks buffered per stream before the producer waits for the
    /// client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Number of background threads keeping segment chains stocked.
    ///
    /// Environment variable: `PREFETCH_WORKERS`
    #[arg(long, env = "PREFETCH_WORKERS", default_value_t = 2)]
    pub prefetch_workers: usize,

    /// Milliseconds between two prefetch passes of a worker.
    ///
    /// Environment variable: `PREFETCH_PERIOD_MS`
    #[arg(long, env = "PREFETCH_PERIOD_MS", default_value_t = 1000)]
    pub prefetch_period_ms: u64,

    /// Seconds a fetched segment stays usable. `0` keeps segments forever.
    ///
    /// Environment variable: `SEGMENT_TTL_SECS`
    #[arg(long, env = "SEGMENT_TTL_SECS", default_value_t = 0)]
    pub segment_ttl_secs: u64,

    /// Seconds to wait for in-flight streams on shutdown before cancelling
    /// them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,

    /// Namespaces to register at start-up, comma separated, each as
    /// `namespace:max_id:step:safe_distance`.
    ///
    /// Example: "orders:1:1000:10,users:1:100:2"
    ///
    /// Environment variable: `SEGMENTS`
    #[arg(long, env = "SEGMENTS", value_delimiter = ',')]
    pub segments: Vec<SegmentSeed>,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/segid.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_allowed_ids: usize,
    pub ids_per_chunk: usize,
    pub stream_buffer_size: usize,
    pub prefetch_workers: usize,
    pub prefetch_period: Duration,
    pub segment_ttl: i64,
    pub shutdown_timeout: Duration,
    pub segments: Vec<SegmentSeed>,
    pub server_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_allowed_ids == 0 {
            bail!("MAX_ALLOWED_IDS must be greater than 0");
        }
        if args.ids_per_chunk == 0 {
            bail!("IDS_PER_CHUNK must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }
        if args.prefetch_workers == 0 {
            bail!("PREFETCH_WORKERS must be greater than 0");
        }
        if args.prefetch_period_ms == 0 {
            bail!("PREFETCH_PERIOD_MS must be greater than 0");
        }

        args.ids_per_chunk
            .checked_mul(ID_SIZE)
            .ok_or_else(|| anyhow::anyhow!("IDS_PER_CHUNK is too large"))?;

        let segment_ttl = match args.segment_ttl_secs {
            0 => TIME_TO_LIVE_FOREVER,
            secs => i64::try_from(secs).context("SEGMENT_TTL_SECS is out of range")?,
        };

        Ok(Self {
            max_allowed_ids: args.max_allowed_ids,
            ids_per_chunk: args.ids_per_chunk,
            stream_buffer_size: args.stream_buffer_size,
            prefetch_workers: args.prefetch_workers,
            prefetch_period: Duration::from_millis(args.prefetch_period_ms),
            segment_ttl,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            segments: args.segments,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
