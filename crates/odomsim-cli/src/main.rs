//! `odomsim` – runs the dead-reckoning odometry node.
//!
//! 1. Loads `~/.odomsim/config.toml`, writing defaults on first run.
//! 2. Starts the odometry node: `/cmd_vel` in, `ResetPosition` service,
//!    `odom → base_link` transforms out on `/tf`.
//! 3. Optionally starts the rosbridge-compatible WebSocket endpoint and the
//!    square-driving demo controller.
//! 4. On **Ctrl-C** publishes a shutdown alert, stops the robot and logs the
//!    final pose.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, warn};

use odomsim_middleware::{service_channel, EventBus, Ros2Bridge, Topic, TransformBroadcaster};
use odomsim_runtime::{telemetry, OdometryNode, SquareController, SteadyClock, TransformListener};
use odomsim_types::{Event, EventPayload, OdomError, Twist};

fn main() {
    // Tracing first: the OTLP exporter must exist before the runtime does.
    let _telemetry = telemetry::init_tracing("odomsim");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, path, created)) => {
            let verb = if created { "Default config written to" } else { "Config loaded from" };
            println!("  {verb} {}", path.display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    println!();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg)) {
        error!(error = %e, "odomsim exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: config::Config) -> Result<(), OdomError> {
    let bus = Arc::new(EventBus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    install_ctrlc(Arc::clone(&bus), shutdown_tx.clone());

    // ── Odometry node ─────────────────────────────────────────────────────
    let (reset_client, reset_server) = service_channel(cfg.node.reset_service.clone(), 16);
    let sink = Arc::new(TransformBroadcaster::new(Arc::clone(&bus)).with_source("odomsim::odometry_node"));
    let node = OdometryNode::new(
        cfg.node.clone(),
        Arc::clone(&bus),
        sink,
        Arc::new(SteadyClock::new()),
    )
    .spawn(reset_server);

    // ── rosbridge endpoint ────────────────────────────────────────────────
    let bridge = if cfg.bridge.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.bridge.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OdomError::Channel(format!("ws bind error on {addr}: {e}")))?;
        let bridge = Ros2Bridge::new(Arc::clone(&bus), reset_client.clone())
            .with_inbound_rate(cfg.bridge.inbound_rate)
            .with_call_timeout(Duration::from_millis(cfg.bridge.call_timeout_ms));
        Some(tokio::spawn(bridge.serve(listener)))
    } else {
        None
    };

    // ── Demo controller ───────────────────────────────────────────────────
    let controller = cfg.controller.enabled.then(|| {
        let listener = Arc::new(TransformListener::spawn(&bus));
        tokio::spawn(SquareController::new(cfg.controller.clone()).run(
            listener,
            Arc::clone(&bus),
            cfg.node.parent_frame.clone(),
            cfg.node.child_frame.clone(),
            shutdown_rx.clone(),
        ))
    });

    println!(
        "  {} publishing {} → {} every {} ms. Press {} to stop.\n",
        "●".green(),
        cfg.node.parent_frame.bold(),
        cfg.node.child_frame.bold(),
        cfg.node.tick_period_ms,
        "Ctrl-C".bold()
    );

    // ── Wait for Ctrl-C ───────────────────────────────────────────────────
    let mut stop = shutdown_rx;
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        warn!("shutdown channel closed unexpectedly");
    }

    if let Some(task) = controller
        && let Err(e) = task.await
    {
        warn!(error = %e, "controller task failed");
    }
    if let Some(task) = bridge {
        task.abort();
    }
    let stop_cmd = Event::new("odomsim-cli", EventPayload::CmdVel(Twist::zero()));
    if let Err(e) = bus.publish_to(Topic::CmdVel, stop_cmd) {
        warn!(error = %e, "could not publish final stop command");
    }
    drop(reset_client);
    drop(shutdown_tx);
    node.shutdown().await;

    println!("{}", "  ✓ Exiting odomsim.".green());
    Ok(())
}

/// Ctrl-C publishes a shutdown alert and flips the shutdown flag.
fn install_ctrlc(bus: Arc<EventBus>, shutdown: watch::Sender<bool>) {
    let result = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());

        // Nobody may be listening for alerts; that is fine.
        let _ = bus.publish_to(Topic::SystemAlerts, shutdown_alert());
        shutdown.send_replace(true);
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }
}

fn shutdown_alert() -> Event {
    Event::new(
        "odomsim-cli",
        EventPayload::Alert {
            component: "cli".to_string(),
            code: 130,
            message: "SHUTDOWN: operator Ctrl-C".to_string(),
        },
    )
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____      __               _         "#.bold().cyan());
    println!("{}", r#"  / __ \____/ /___  ____ ___ (_)___ ___ "#.bold().cyan());
    println!("{}", r#" / / / / __  / __ \/ __ `__ \/ / __ `__ \"#.bold().cyan());
    println!("{}", r#"/ /_/ / /_/ / /_/ / / / / / / / / / / / /"#.bold().cyan());
    println!("{}", r#"\____/\__,_/\____/_/ /_/ /_/_/_/ /_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "odomsim".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Dead-reckoning odometry node");
    println!();
}
