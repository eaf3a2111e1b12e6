use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::serializer::Serializer;

/// How seeded examples are grouped into buckets when run-time data exists.
///
/// Without a positive `run_time_bucket_maximum` the pending queue always
/// falls back to grouping by file, regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    File,
    #[default]
    Timings,
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(GroupBy::File),
            "timings" => Ok(GroupBy::Timings),
            other => Err(format!("unknown grouping \"{other}\", expected file or timings")),
        }
    }
}

/// Server configuration, built once in `main` and threaded through
/// `AppState`. The core never reads ambient process state.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Storage backend selector, e.g. `memory:///` or `file:///tmp/workpool`.
    pub store_uri: String,
    pub serializer: Serializer,
    /// Directory for per-run report artifacts. None disables report output.
    pub output_dir: Option<PathBuf>,
    pub group_by: GroupBy,
    /// Expected worker check-in cadence. The reclamation window is twice this.
    pub heartbeat_interval: Duration,
    /// Exit after the run is shut down via the shutdown endpoint.
    pub single_run: bool,
    /// Ignore seed requests for a run that already has pending buckets.
    pub single_seed_per_run: bool,
    /// Fixed bucket maximum in seconds. Overridden per seed request; when
    /// both are absent the maximum is derived from historical run times.
    pub run_time_bucket_maximum: Option<f64>,
    /// Worker count used when deriving a bucket maximum from run times.
    pub seed_worker_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5138"
                .parse()
                .expect("default bind address is valid"),
            store_uri: "memory:///".to_string(),
            serializer: Serializer::Json,
            output_dir: None,
            group_by: GroupBy::default(),
            heartbeat_interval: Duration::from_secs(10),
            single_run: false,
            single_seed_per_run: false,
            run_time_bucket_maximum: None,
            seed_worker_count: 1,
        }
    }
}

impl Config {
    /// An example is reclaimable once its lease and its worker's last
    /// check-in are both older than two missed heartbeats.
    pub fn expiry_window(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.store_uri, "memory:///");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.expiry_window(), Duration::from_secs(20));
        assert!(!cfg.single_run);
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn group_by_parses() {
        assert_eq!("file".parse::<GroupBy>().unwrap(), GroupBy::File);
        assert_eq!("timings".parse::<GroupBy>().unwrap(), GroupBy::Timings);
        assert!("size".parse::<GroupBy>().is_err());
    }
}
