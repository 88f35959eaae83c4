//! Hosting shares listed in a settings share.
//!
//! Each latest document under [`SHARES_PREFIX`] with non-empty text names one share to
//! host by its last path segment, e.g. `/server-settings/1.0/shares/<hash>/+gardening.abc`.
//! A document with empty text withdraws the share.

use std::collections::BTreeSet;

use anyhow::Result;
use sharestore::{Driver, DriverError, Query, ShareAddress};
use tracing::{debug, warn};

use crate::host::ReplicaHost;

/// Path prefix of the documents listing hosted shares.
pub const SHARES_PREFIX: &str = "/server-settings/1.0/shares/";

/// Read the shares listed in the settings share served by `driver`.
pub fn listed_shares(driver: &Driver) -> Result<BTreeSet<ShareAddress>, DriverError> {
    let query = Query::latest().path_prefix(SHARES_PREFIX).build();
    let mut shares = BTreeSet::new();
    for doc in driver.query_docs(&query)? {
        if doc.text.is_empty() {
            continue;
        }
        let Some(segment) = doc.path.rsplit('/').next() else {
            continue;
        };
        match segment.parse::<ShareAddress>() {
            Ok(share) => {
                shares.insert(share);
            }
            Err(err) => warn!(path = %doc.path, "ignoring share setting: {err}"),
        }
    }
    Ok(shares)
}

/// Hosts the settings share and every share listed in it.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    settings_share: ShareAddress,
}

impl ServerSettings {
    /// Create the extension for `settings_share`.
    pub fn new(settings_share: ShareAddress) -> Self {
        Self { settings_share }
    }

    /// The settings share.
    pub fn settings_share(&self) -> &ShareAddress {
        &self.settings_share
    }

    /// Open the settings share and every share it lists that is not hosted yet.
    ///
    /// Returns the newly opened shares.
    pub async fn sync(&self, host: &ReplicaHost) -> Result<Vec<ShareAddress>> {
        let settings = host.open(&self.settings_share).await?;
        let mut opened = Vec::new();
        for share in listed_shares(&settings)? {
            if host.get(&share).is_some() {
                continue;
            }
            host.open(&share).await?;
            opened.push(share);
        }
        debug!(settings = %self.settings_share, opened = opened.len(), "synced server settings");
        Ok(opened)
    }
}
