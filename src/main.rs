/*!
 * Sched Core - Main Entry Point
 *
 * Starts the configured schedulers, accepts worker logins over TCP (and a
 * unix socket when configured) and runs until ctrl-c, then terminates all
 * processes in order.
 */

use anyhow::Context;
use log::info;
use sched_core::{init_tracing, CoreConfig, SchedulerSystem};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// How often termination progress is checked
const TERMINATION_POLL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = CoreConfig::load(config_path.as_deref()).context("loading configuration")?;
    let port = config.login.port;
    let unix_socket = config.login.unix_socket.clone();
    let timeout_s = config.scheduler.termination_timeout_s;

    info!("Sched core starting (instance {})", config.login.instance);
    info!("================================================");

    let system = Arc::new(
        SchedulerSystem::builder()
            .with_config(config)
            .build()
            .context("building scheduler system")?,
    );
    system.start().context("starting scheduler threads")?;

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let tcp = system.listen_tcp(addr).context("opening login port")?;
    match tcp.local_addr() {
        Some(bound) => info!("Accepting logins on {}", bound),
        None => warn!("login listener has no local address"),
    }

    #[cfg(unix)]
    let unix = match unix_socket {
        Some(path) => Some(
            system
                .listen_unix(std::path::Path::new(&path))
                .context("opening login socket")?,
        ),
        None => None,
    };
    #[cfg(not(unix))]
    if unix_socket.is_some() {
        warn!("unix socket logins are not supported on this platform");
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Interrupt received, terminating");

    system.request_termination();
    system.set_termination_timeout(timeout_s);
    let mut interval = tokio::time::interval(TERMINATION_POLL);
    loop {
        interval.tick().await;
        if system.check_all_terminated() {
            break;
        }
    }

    tcp.shutdown();
    #[cfg(unix)]
    if let Some(listener) = unix {
        listener.shutdown();
    }

    let joined = {
        let system = system.clone();
        tokio::task::spawn_blocking(move || system.shutdown()).await
    };
    if let Err(e) = joined {
        error!(error = %e, "shutdown task failed");
    }
    info!("Sched core stopped");
    Ok(())
}
