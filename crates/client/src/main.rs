use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nanocas_view_client::{ClientConfig, EventChannel, HttpAnalysisApi, SessionView, ViewSnapshot};
use nanocas_view_core::{ListenerState, Metric, TimeUnit};
use nanocas_view_observability::ObservabilityConfig;
use tokio::sync::watch;
use tracing::info;

/// How long `start`/`stop` wait for the server to confirm.
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "nanocas-view", version, about = "Monitor nanocas analysis sessions")]
struct Args {
    /// Base URL of the analysis server [env: NANOCAS_SERVER_URL]
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Event channel WebSocket URL [env: NANOCAS_CHANNEL_URL]
    #[arg(long, global = true)]
    channel_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow one session: listener state, coverage and match charts.
    Watch {
        project_id: String,
        #[arg(long, default_value_t = Metric::Depth)]
        metric: Metric,
        #[arg(long, default_value_t = TimeUnit::Minutes)]
        unit: TimeUnit,
        /// Print every snapshot as JSON instead of a status line.
        #[arg(long)]
        json: bool,
    },
    /// List sequencing devices visible to the server.
    Devices,
    /// Look up (or allocate) the session id for an output directory.
    Uid { source_path: String },
    /// Check that an output directory is usable before setup.
    Validate {
        source_path: String,
        #[arg(long)]
        queries: Option<String>,
    },
    /// Start the file listener of a session.
    Start { project_id: String },
    /// Stop the file listener of a session.
    Stop { project_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log = nanocas_view_observability::init(&ObservabilityConfig::for_service("nanocas_view"))?;

    let args = Args::parse();
    let mut config = ClientConfig::default();
    if let Some(url) = args.server_url {
        config = config.with_server_url(url);
    }
    if let Some(url) = args.channel_url {
        config = config.with_channel_url(url);
    }
    info!(server = %config.server_url, channel = %config.channel_url, "nanocas-view starting");

    let api = HttpAnalysisApi::new(config.server_url.clone());

    match args.command {
        Command::Devices => {
            for device in api.index_devices().await? {
                println!("{device}");
            }
        }
        Command::Uid { source_path } => {
            println!("{}", api.get_uid(&source_path).await?);
        }
        Command::Validate {
            source_path,
            queries,
        } => {
            let check = api.validate_locations(&source_path, queries.as_deref()).await?;
            for message in &check.messages {
                println!("{message}");
            }
            if !check.valid {
                bail!("location check failed for {source_path}");
            }
        }
        Command::Watch {
            project_id,
            metric,
            unit,
            json,
        } => {
            let channel = EventChannel::connect(config.channel_url.clone());
            let view = SessionView::mount(project_id, channel, Arc::new(api), &config);
            view.select_metric(metric);
            view.select_unit(unit);
            watch_view(&view, json).await?;
        }
        Command::Start { project_id } => {
            let channel = EventChannel::connect(config.channel_url.clone());
            let view = SessionView::mount(project_id, channel, Arc::new(api), &config);
            let mut snapshots = view.watch();
            wait_until(&mut snapshots, "session metadata", |s| s.session.is_some()).await?;
            view.start_listener().await?;
            let snapshot = wait_until(&mut snapshots, "listener start", |s| {
                !matches!(s.listener, ListenerState::Pending)
            })
            .await?;
            report_listener(&snapshot)?;
        }
        Command::Stop { project_id } => {
            let channel = EventChannel::connect(config.channel_url.clone());
            let view = SessionView::mount(project_id, channel, Arc::new(api), &config);
            let mut snapshots = view.watch();
            wait_until(&mut snapshots, "listener status", |s| s.can_stop).await?;
            view.stop_listener().await?;
            let snapshot =
                wait_until(&mut snapshots, "listener stop", |s| !s.can_stop).await?;
            report_listener(&snapshot)?;
        }
    }

    Ok(())
}

async fn watch_view(view: &SessionView, json: bool) -> Result<()> {
    let mut snapshots = view.watch();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            println!("{}", status_line(&snapshot));
        }

        tokio::select! {
            changed = snapshots.changed() => changed.context("session view stopped")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
        }
    }
}

async fn wait_until(
    snapshots: &mut watch::Receiver<ViewSnapshot>,
    what: &str,
    done: impl FnMut(&ViewSnapshot) -> bool,
) -> Result<ViewSnapshot> {
    let snapshot = tokio::time::timeout(ACTION_TIMEOUT, snapshots.wait_for(done))
        .await
        .with_context(|| format!("timed out waiting for {what}"))?
        .context("session view stopped")?;
    Ok(snapshot.clone())
}

fn report_listener(snapshot: &ViewSnapshot) -> Result<()> {
    if let ListenerState::Error(message) = &snapshot.listener {
        bail!("listener error: {message}");
    }
    println!("{}", status_line(snapshot));
    Ok(())
}

fn status_line(snapshot: &ViewSnapshot) -> String {
    let listener = match &snapshot.listener {
        ListenerState::Stopped => "stopped".to_owned(),
        ListenerState::Pending => "starting".to_owned(),
        ListenerState::Running => "running".to_owned(),
        ListenerState::Error(message) => format!("error ({message})"),
    };
    let mut line = format!(
        "{} listener={} records={} chart={}x{} {} ({})",
        snapshot.project_id,
        listener,
        snapshot.records,
        snapshot.coverage_chart.rows.len(),
        snapshot.coverage_chart.width(),
        snapshot.metric,
        snapshot.unit,
    );
    if snapshot.store_ready == Some(false) {
        line.push_str(" store=not-ready");
    }
    if let Some(error) = &snapshot.error {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}
