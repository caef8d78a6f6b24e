use cpg_common::DEFAULT_DIVISIBILITY;
use serde::{Deserialize, Serialize};

/// Confirmation count past which a payment is considered final and stops being tracked.
pub const DEFAULT_MAX_TRACKED_CONFIRMATION: i64 = 6;

/// Static parameters of a crypto asset network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub crypto_code: String,
    pub display_name: String,
    /// Number of decimal places of the asset's base unit.
    pub divisibility: u32,
    pub max_tracked_confirmation: i64,
}

impl Network {
    pub fn new<S: Into<String>>(crypto_code: S, display_name: S) -> Self {
        Self {
            crypto_code: crypto_code.into().to_ascii_uppercase(),
            display_name: display_name.into(),
            divisibility: DEFAULT_DIVISIBILITY,
            max_tracked_confirmation: DEFAULT_MAX_TRACKED_CONFIRMATION,
        }
    }

    pub fn with_divisibility(mut self, divisibility: u32) -> Self {
        self.divisibility = divisibility;
        self
    }

    pub fn with_max_tracked_confirmation(mut self, confirmations: i64) -> Self {
        self.max_tracked_confirmation = confirmations;
        self
    }

    pub fn bitcoin() -> Self {
        Self::new("BTC", "Bitcoin")
    }

    pub fn litecoin() -> Self {
        Self::new("LTC", "Litecoin")
    }
}
