use std::{env, fmt::Display, str::FromStr, time::Duration};

use cpg_common::{env_var_parsed, parse_boolean_flag};
use log::*;

use crate::db_types::ConversionError;

const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
const DEFAULT_MAX_RECONCILE_ROUNDS: usize = 5;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;
const REGTEST_SWEEP_INTERVAL_SECS: u64 = 10;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// The kind of chain the deployment runs against. Only the defaults depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainNetwork {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Display for ChainNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainNetwork::Mainnet => write!(f, "mainnet"),
            ChainNetwork::Testnet => write!(f, "testnet"),
            ChainNetwork::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for ChainNetwork {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            s => Err(ConversionError(format!("Invalid network: {s}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub network: ChainNetwork,
    /// How often every pending invoice is re-checked, regardless of chain activity.
    pub sweep_interval: Duration,
    /// How long shutdown waits for in-flight reconciliations before giving up on them.
    pub shutdown_grace: Duration,
    /// Delay before a failed reconciliation is attempted again.
    pub retry_delay: Duration,
    /// Upper bound on the number of rounds a single reconciliation run may take.
    pub max_reconcile_rounds: usize,
    pub event_buffer_size: usize,
    /// Whether chain syncs may block until something changes.
    pub long_poll: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::for_network(ChainNetwork::default())
    }
}

impl WatcherConfig {
    pub fn for_network(network: ChainNetwork) -> Self {
        let sweep = match network {
            ChainNetwork::Regtest => REGTEST_SWEEP_INTERVAL_SECS,
            _ => DEFAULT_SWEEP_INTERVAL_SECS,
        };
        Self {
            network,
            sweep_interval: Duration::from_secs(sweep),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_reconcile_rounds: DEFAULT_MAX_RECONCILE_ROUNDS,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            long_poll: false,
        }
    }

    pub fn from_env_or_default() -> Self {
        let network = env_or("CPG_NETWORK", ChainNetwork::default());
        let defaults = Self::for_network(network);
        let sweep_interval = env_or("CPG_SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs());
        let shutdown_grace = env_or("CPG_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace.as_secs());
        let retry_delay = env_or("CPG_RETRY_DELAY_SECS", defaults.retry_delay.as_secs());
        let max_reconcile_rounds = env_or("CPG_MAX_RECONCILE_ROUNDS", defaults.max_reconcile_rounds).max(1);
        let event_buffer_size = env_or("CPG_EVENT_BUFFER_SIZE", defaults.event_buffer_size).max(1);
        let long_poll = parse_boolean_flag(env::var("CPG_LONG_POLL").ok(), defaults.long_poll);
        let config = Self {
            network,
            sweep_interval: Duration::from_secs(sweep_interval.max(1)),
            shutdown_grace: Duration::from_secs(shutdown_grace),
            retry_delay: Duration::from_secs(retry_delay),
            max_reconcile_rounds,
            event_buffer_size,
            long_poll,
        };
        info!(
            "🪛️ Watcher configured for {network}. Sweeping every {}s, retrying after {}s",
            config.sweep_interval.as_secs(),
            config.retry_delay.as_secs()
        );
        config
    }
}

fn env_or<T: FromStr + Display>(key: &str, default: T) -> T {
    match env_var_parsed::<T>(key) {
        Ok(Some(value)) => {
            debug!("🪛️ {key} is set to {value}");
            value
        },
        Ok(None) => default,
        Err(raw) => {
            warn!("🪛️ {raw} is not a valid value for {key}. Using the default, {default}, instead.");
            default
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_defaults() {
        assert_eq!(WatcherConfig::for_network(ChainNetwork::Regtest).sweep_interval, Duration::from_secs(10));
        assert_eq!(WatcherConfig::for_network(ChainNetwork::Testnet).sweep_interval, Duration::from_secs(60));
        let config = WatcherConfig::default();
        assert_eq!(config.network, ChainNetwork::Mainnet);
        assert_eq!(config.max_reconcile_rounds, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(10));
    }

    #[test]
    fn parse_network() {
        assert_eq!("RegTest".parse::<ChainNetwork>().unwrap(), ChainNetwork::Regtest);
        assert_eq!("main".parse::<ChainNetwork>().unwrap(), ChainNetwork::Mainnet);
        assert!("signet".parse::<ChainNetwork>().is_err());
    }

    #[test]
    fn from_env() {
        env::set_var("CPG_NETWORK", "regtest");
        env::set_var("CPG_RETRY_DELAY_SECS", "3");
        env::set_var("CPG_MAX_RECONCILE_ROUNDS", "lots");
        let config = WatcherConfig::from_env_or_default();
        assert_eq!(config.network, ChainNetwork::Regtest);
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconcile_rounds, 5);
        env::remove_var("CPG_NETWORK");
        env::remove_var("CPG_RETRY_DELAY_SECS");
        env::remove_var("CPG_MAX_RECONCILE_ROUNDS");
    }
}
