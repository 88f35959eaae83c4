//! The main server which hosts the configured replicas.

use std::sync::Arc;

use anyhow::Result;
use sharestore::{Backend, MemBackend, RedbBackend};
use tracing::info;

use crate::{
    config::{Config, StorageConfig},
    host::ReplicaHost,
    settings::ServerSettings,
};

/// Spawn the server and run until the `Ctrl-C` signal is received, then shutdown.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let backend: Arc<dyn Backend> = match config.storage {
        StorageConfig::Persistent => {
            let path = config.store_path()?;
            info!("storing replicas in {}", path.display());
            Arc::new(RedbBackend::persistent(path)?)
        }
        StorageConfig::Memory => Arc::new(MemBackend::new()),
    };
    let server = Server::spawn(config, backend).await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown");
    server.shutdown().await?;
    Ok(())
}

/// The sharestore server.
#[derive(Debug)]
pub struct Server {
    host: ReplicaHost,
    settings: Option<ServerSettings>,
}

impl Server {
    /// Spawn the server.
    ///
    /// Opens every statically configured share, then the settings share and the shares
    /// listed in it.
    pub async fn spawn(config: Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let host = ReplicaHost::new(backend, config.driver_options());
        for share in &config.shares {
            host.open(share).await?;
        }
        let settings = config.settings_share.map(ServerSettings::new);
        if let Some(settings) = &settings {
            settings.sync(&host).await?;
        }
        info!(shares = host.shares().len(), "server started");
        Ok(Self { host, settings })
    }

    /// The replicas hosted by this server.
    pub fn host(&self) -> &ReplicaHost {
        &self.host
    }

    /// Host shares newly listed in the settings share.
    pub async fn refresh_settings(&self) -> Result<()> {
        if let Some(settings) = &self.settings {
            settings.sync(&self.host).await?;
        }
        Ok(())
    }

    /// Close every replica and wait for pending writes.
    pub async fn shutdown(self) -> Result<()> {
        self.host.close_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sharestore::{Document, Query, ShareAddress};

    use super::*;
    use crate::{config::FlushConfig, settings::SHARES_PREFIX};

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let backend = MemBackend::new();
        let config = Config {
            settings_share: Some("+settings.abc".parse().unwrap()),
            shares: vec!["+static.abc".parse().unwrap()],
            flush: FlushConfig::Manual,
            storage: StorageConfig::Memory,
            ..Default::default()
        };

        let server = Server::spawn(config.clone(), Arc::new(backend.clone()))
            .await
            .unwrap();
        let settings_share: ShareAddress = "+settings.abc".parse().unwrap();
        assert_eq!(server.host().shares().len(), 2);

        let settings = server.host().get(&settings_share).unwrap();
        settings
            .upsert(Document {
                format: "es.5".into(),
                author: "@suzy".into(),
                path: format!("{SHARES_PREFIX}h/+listed.abc"),
                share: settings_share.clone(),
                timestamp: 1,
                text: "true".into(),
                text_hash: "hash".into(),
                signature: "sig".into(),
                delete_after: None,
                local_index: 0,
            })
            .await
            .unwrap();
        server.refresh_settings().await.unwrap();
        assert_eq!(server.host().shares().len(), 3);

        // manual flush: nothing is written before shutdown
        assert!(backend.is_empty());
        server.shutdown().await.unwrap();

        let server = Server::spawn(config, Arc::new(backend)).await.unwrap();
        assert_eq!(server.host().shares().len(), 3);
        let settings = server.host().get(&settings_share).unwrap();
        assert_eq!(settings.query_docs(&Query::all().build()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            shares: vec!["+static.abc".parse().unwrap()],
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let backend = RedbBackend::persistent(config.store_path().unwrap()).unwrap();
        let server = Server::spawn(config, Arc::new(backend)).await.unwrap();
        server.shutdown().await.unwrap();
        assert!(dir.path().join("shares-1.db").exists());
    }
}
