//! Process wrapper
//!
//! Starts the frontend, runs the command with the proxy environment pointing
//! at it, waits for the command and drains the remaining sessions.

use crate::chain::Negotiator;
use crate::config::Config;
use crate::frontend::{Frontend, FrontendSettings};
use crate::transport::TcpTransport;
use anyhow::{bail, Context, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Exit code when the command cannot be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Variables pointing HTTP-aware programs at the frontend
pub const HTTP_PROXY_VARS: [&str; 4] = ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"];

/// Variables pointing SOCKS-aware programs at the frontend
pub const SOCKS_PROXY_VARS: [&str; 2] = ["all_proxy", "ALL_PROXY"];

/// Variables removed so that no destination is exempt from the proxy
pub const NO_PROXY_VARS: [&str; 2] = ["no_proxy", "NO_PROXY"];

/// Address the command should dial to reach a frontend bound to `local`
pub fn client_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}

/// Proxy environment for a frontend reachable at `addr`
pub fn proxy_env(addr: SocketAddr) -> Vec<(&'static str, String)> {
    let http = format!("http://{}", addr);
    let socks = format!("socks5h://{}", addr);

    HTTP_PROXY_VARS
        .iter()
        .map(|var| (*var, http.clone()))
        .chain(SOCKS_PROXY_VARS.iter().map(|var| (*var, socks.clone())))
        .collect()
}

/// Build the command line with the proxy environment applied
pub fn build_command(command: &[String], addr: SocketAddr) -> Result<Command> {
    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => bail!("no command to run"),
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    for var in NO_PROXY_VARS {
        cmd.env_remove(var);
    }
    cmd.envs(proxy_env(addr));
    Ok(cmd)
}

/// Exit code reported for a finished command; `128 + signal` when it was killed
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Run `command` with its traffic routed through the configured chain.
///
/// Returns the command's exit code.
pub async fn run_wrapped(config: &Config, command: &[String]) -> Result<i32> {
    let negotiator = Negotiator::new(TcpTransport::from_config(config), config.timeouts());
    let frontend = Frontend::new(FrontendSettings::from_config(config), negotiator);
    let handle = frontend
        .start()
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;

    let addr = client_addr(handle.local_addr());
    let mut cmd = build_command(command, addr)?;
    debug!("Running {:?} with proxy {}", command, addr);

    let code = match cmd.spawn() {
        Ok(mut child) => {
            // The command receives Ctrl+C as well; keep serving it until it exits
            let status = tokio::select! {
                status = child.wait() => status,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, waiting for the command to exit");
                    child.wait().await
                }
            }
            .with_context(|| format!("Failed to wait for {}", command[0]))?;
            exit_code(status)
        }
        Err(e) => {
            error!("Failed to run {}: {}", command[0], e);
            SPAWN_FAILURE_EXIT_CODE
        }
    };

    let aborted = handle.drain(config.drain_grace()).await;
    if aborted > 0 {
        warn!("{} session(s) closed at exit", aborted);
    }

    Ok(code)
}
