use crate::{
    build_listeners,
    core::Config,
    logging::LogFormat,
    snapshot::Snapshot,
    synth::{ListenerBuilder, SynthMetrics},
};
use anyhow::{Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[clap(
    name = "listener-controller",
    about = "Computes proxy listener configurations from a mesh snapshot"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "mesh_listener_controller=info,warn",
        env = "LISTENER_CONTROLLER_LOG"
    )]
    log_level: String,

    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    /// A JSON document describing the push context, the proxies, and listener patches.
    #[clap(long)]
    snapshot: PathBuf,

    /// Where listeners are written. Defaults to stdout.
    #[clap(long)]
    output: Option<PathBuf>,

    /// Where metrics are written in the Prometheus text format.
    #[clap(long)]
    metrics_output: Option<PathBuf>,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_SNIFF_INBOUND")]
    sniff_inbound: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_SNIFF_OUTBOUND")]
    sniff_outbound: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_LOOP_BLOCKER")]
    loop_blocker: bool,

    #[clap(long, default_value_t = true, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_MONGO_FILTER")]
    mongo_filter: bool,

    #[clap(long, default_value_t = false, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_MYSQL_FILTER")]
    mysql_filter: bool,

    #[clap(long, default_value_t = false, action = clap::ArgAction::Set, env = "LISTENER_CONTROLLER_REDIS_FILTER")]
    redis_filter: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            snapshot,
            output,
            metrics_output,
            sniff_inbound,
            sniff_outbound,
            loop_blocker,
            mongo_filter,
            mysql_filter,
            redis_filter,
        } = self;

        log_format.try_init(&log_level)?;

        let Snapshot {
            push,
            proxies,
            patches,
        } = Snapshot::load(&snapshot).await?;
        info!(
            services = push.services.len(),
            gateways = push.gateways.len(),
            proxies = proxies.len(),
            "Loaded snapshot"
        );

        let mut prom = <Registry>::default();
        let metrics = SynthMetrics::register(prom.sub_registry_with_prefix("listener_controller"));

        let config = Config {
            sniff_inbound,
            sniff_outbound,
            loop_blocker,
            mongo_filter,
            mysql_filter,
            redis_filter,
        };
        debug!(?config);
        let mut builder = ListenerBuilder::new(config, metrics);
        if !patches.is_empty() {
            debug!(patches = patches.len(), "Applying listener patches");
            builder = builder.with_patcher(Arc::new(patches));
        }

        let listeners = build_listeners(Arc::new(builder), Arc::new(push), proxies).await?;
        let count = listeners.values().map(Vec::len).sum::<usize>();
        let mut json = serde_json::to_vec_pretty(&listeners)?;
        json.push(b'\n');
        match output {
            Some(path) => tokio::fs::write(&path, &json)
                .await
                .with_context(|| format!("failed to write listeners to {}", path.display()))?,
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&json).await?;
                stdout.flush().await?;
            }
        }
        info!(proxies = listeners.len(), listeners = count, "Computed listeners");

        if let Some(path) = metrics_output {
            let mut text = String::new();
            prometheus_client::encoding::text::encode(&mut text, &prom)?;
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        }

        Ok(())
    }
}
