//! Reconciliation loop configuration. All fields have the defaults the
//! publisher has always shipped with.

use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Ticker period between reconciliation attempts.
    #[serde(with = "humantime_serde")]
    pub advertisement_interval: Duration,
    /// URL of the indexer's direct-announce endpoint.
    pub indexer_url: url::Url,
    /// If true, advertise to peers regardless of their last-seen timestamp.
    pub advertise_offline: bool,
    /// Window size, in objects, of a single advertised batch.
    pub batch_size: u64,
    /// Location of the engine's own persistent datastore.
    pub data_dir: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            advertisement_interval: Duration::from_secs(15 * 60),
            indexer_url: "https://cid.contact".parse().expect("default indexer URL is valid"),
            advertise_offline: false,
            batch_size: 25_000,
            data_dir: "data".into(),
        }
    }
}

impl Config {
    /// The interval as a `chrono::Duration`, for comparison against
    /// timestamp columns pulled from the database.
    pub fn interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.advertisement_interval)
            .unwrap_or_else(|_| chrono::Duration::max_value())
    }
}
