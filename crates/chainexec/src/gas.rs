use crate::errors::HostAbort;

/// Strictly monotone gas meter, checked before every metered operation.
///
/// On exhaustion `used` pins to the limit so the receipt's `gas_used`
/// equals `max_gas` exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    /// Charges `amount`, pinning to the limit on exhaustion.
    pub fn charge(&mut self, amount: u64) -> Result<(), HostAbort> {
        match self.used.checked_add(amount) {
            Some(next) if next <= self.limit => {
                self.used = next;
                Ok(())
            }
            _ => {
                self.used = self.limit;
                Err(HostAbort::OutOfGas)
            }
        }
    }
}
