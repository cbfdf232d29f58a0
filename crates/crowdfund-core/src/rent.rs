use serde::{Deserialize, Serialize};

/// Bytes charged on top of an account's data length.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Rent schedule used to size the lamports deposited into new accounts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Rent {
    pub lamports_per_byte_year: u64,
    pub exemption_threshold: f64,
}

impl Default for Rent {
    fn default() -> Self {
        Self {
            lamports_per_byte_year: 3_480,
            exemption_threshold: 2.0,
        }
    }
}

impl Rent {
    /// Minimum balance for an account holding `data_len` bytes to be exempt.
    /// Saturates at `u64::MAX` for oversized schedules.
    pub fn minimum_balance(&self, data_len: usize) -> u64 {
        let bytes = ACCOUNT_STORAGE_OVERHEAD.saturating_add(data_len as u64);
        let yearly = bytes.saturating_mul(self.lamports_per_byte_year);
        (yearly as f64 * self.exemption_threshold) as u64
    }
}
