//! Psiphon tunnel lifecycle: workdir preparation, bootstrap, probe
//! through the tunnel's SOCKS5 port, teardown.

use anyhow::Context;
use async_trait::async_trait;
use backend::httpx::{self, HttpDoer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// URL fetched through the tunnel to verify it carries traffic.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/humans.txt";

/// Subdirectory of the workdir handed to the tunnel for its state.
const TUNNEL_WORKDIR_NAME: &str = "tunnelcore";

/// A running tunnel.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local port of the tunnel's SOCKS5 proxy.
    fn socks_proxy_port(&self) -> u16;

    /// Tear the tunnel down.
    async fn stop(&self);
}

/// Capability to bootstrap a tunnel. Production wiring is supplied by
/// the embedder binding the external tunnel library; tests use fakes.
#[async_trait]
pub trait TunnelStarter: Send + Sync {
    /// Start a tunnel, blocking until the bootstrap completes.
    async fn start_tunnel(
        &self,
        token: &CancellationToken,
        config_json: &[u8],
        workdir: &Path,
    ) -> Result<Box<dyn Tunnel>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the external tunnel configuration file.
    pub config_file_path: PathBuf,

    /// Directory the tunnel may keep its state under.
    pub work_dir_path: PathBuf,

    /// URL probed through the tunnel; [`DEFAULT_PROBE_URL`] by default.
    pub probe_url: String,
}

impl Config {
    pub fn new(config_file_path: PathBuf, work_dir_path: PathBuf) -> Config {
        Config {
            config_file_path,
            work_dir_path,
            probe_url: DEFAULT_PROBE_URL.to_string(),
        }
    }
}

/// The experiment result stored in `test_keys`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestKeys {
    /// Empty on success, the error that stopped us otherwise.
    pub failure: String,

    /// Seconds the tunnel took to bootstrap.
    pub bootstrap_time_seconds: f64,
}

/// Prepare a clean tunnel workdir and read the tunnel configuration.
async fn process_config(config: &Config) -> anyhow::Result<(Vec<u8>, PathBuf)> {
    if config.work_dir_path.as_os_str().is_empty() {
        anyhow::bail!("work_dir_path is empty");
    }
    let workdir = config.work_dir_path.join(TUNNEL_WORKDIR_NAME);
    match tokio::fs::remove_dir_all(&workdir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("cannot clear tunnel workdir"),
    }
    tokio::fs::create_dir_all(&workdir)
        .await
        .context("cannot create tunnel workdir")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&workdir, std::fs::Permissions::from_mode(0o700))
            .await
            .context("cannot restrict tunnel workdir permissions")?;
    }
    let config_json = tokio::fs::read(&config.config_file_path)
        .await
        .context("cannot read tunnel configuration")?;
    Ok((config_json, workdir))
}

/// Issue a small GET through the tunnel's SOCKS5 port. Name resolution
/// happens through the proxy; see `httpx`.
async fn use_tunnel(
    doer: &dyn HttpDoer,
    token: &CancellationToken,
    socks_proxy_port: u16,
    probe_url: &str,
) -> anyhow::Result<()> {
    let mut request = httpx::Request::get(probe_url);
    request.socks5_port = Some(socks_proxy_port);
    doer.perform(token, request)
        .await
        .context("probe through tunnel failed")?;
    Ok(())
}

/// Run the experiment. Errors are captured in the returned test keys
/// and are never fatal to the enclosing task.
pub async fn run(
    doer: &dyn HttpDoer,
    starter: &dyn TunnelStarter,
    token: &CancellationToken,
    config: &Config,
) -> TestKeys {
    let mut keys = TestKeys::default();
    let (config_json, workdir) = match process_config(config).await {
        Ok(prepared) => prepared,
        Err(e) => {
            keys.failure = format!("{e:#}");
            return keys;
        }
    };
    let started = tokio::time::Instant::now();
    let tunnel = match starter.start_tunnel(token, &config_json, &workdir).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            keys.failure = e.to_string();
            return keys;
        }
    };
    keys.bootstrap_time_seconds = started.elapsed().as_secs_f64();
    if let Err(e) = use_tunnel(doer, token, tunnel.socks_proxy_port(), &config.probe_url).await {
        keys.failure = format!("{e:#}");
    }
    tunnel.stop().await;
    keys
}
