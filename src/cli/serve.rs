use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use watchfs::WatchFs;

use crate::{
    config::{Config, DEFAULT_CONFIG_FILE},
    daemon::SyncDaemon,
    web::LiveServer,
};

use super::resolve_path;

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Sync a text file with a field on a web page.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// Path to the config file.
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// The file to sync. Overrides `filePath` from the config file.
    #[clap(long)]
    pub file: Option<PathBuf>,

    /// The IP address to listen on. Defaults to `127.0.0.1`.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// The port to listen on. Overrides `port` from the config file, which
    /// defaults to `8080`.
    #[clap(long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let config_path = resolve_path(&self.config);
        let config = Config::load_optional(&config_path, self.file.is_none())?
            .resolve(self.file.as_deref(), self.port)?;

        let (fs, critical_errors) = WatchFs::new_default_with_errors();
        let daemon = SyncDaemon::start(fs, &config.file_path, Some(critical_errors))
            .context("Could not start syncing")?;

        let ip = self.address.unwrap_or(DEFAULT_BIND_ADDRESS.into());
        let address = SocketAddr::from((ip, config.port));
        let host = if ip.is_loopback() {
            "localhost".to_owned()
        } else {
            ip.to_string()
        };

        let server = LiveServer::new(daemon.connection_sender());
        let runtime = tokio::runtime::Runtime::new().context("Could not start async runtime")?;

        runtime.block_on(async {
            let listener = LiveServer::bind(address)
                .await
                .with_context(|| format!("Could not listen on {}", address))?;

            log::info!("Listening: ws://{}:{}", host, config.port);
            log::info!("Syncing: {}", daemon.path().display());

            server.serve(listener, shutdown_signal()).await;
            anyhow::Ok(())
        })?;

        log::info!("Shutting down");
        drop(daemon);

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}
