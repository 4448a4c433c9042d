use crate::{consensus::ConsensusParams, error::ConsensusError};

/// Immutable, height-sorted table of consensus parameter sets.
///
/// Built once at boot and shared by reference; `active_at` is a pure
/// lookup with no interior mutability.
#[derive(Debug, Clone)]
pub struct ConsensusRegistry {
    // Sorted ascending by enabled_at_block, validated in new().
    table: Vec<ConsensusParams>,
}

impl ConsensusRegistry {
    /// Builds a registry, validating that activation heights strictly
    /// ascend.
    pub fn new(mut table: Vec<ConsensusParams>) -> Result<Self, ConsensusError> {
        table.sort_by_key(|c| c.enabled_at_block);
        for pair in table.windows(2) {
            if pair[1].enabled_at_block <= pair[0].enabled_at_block {
                return Err(ConsensusError::Downgrade {
                    name: pair[1].name.clone(),
                    enabled_at_block: pair[1].enabled_at_block,
                });
            }
        }
        Ok(Self { table })
    }

    /// Returns the parameter set with the greatest activation height ≤
    /// `height`.
    pub fn active_at(&self, height: u64) -> Result<&ConsensusParams, ConsensusError> {
        self.table
            .iter()
            .rev()
            .find(|c| c.enabled_at_block <= height)
            .ok_or(ConsensusError::NoneActive(height))
    }

    /// Gate check before processing a block at `height`.
    ///
    /// If the active set has expired (the successor's activation height is
    /// reached) and the node is not ready for the successor, this is the
    /// lockdown condition: the caller must halt with a fatal alert, there
    /// is no fallback.
    pub fn check_transition(&self, height: u64) -> Result<(), ConsensusError> {
        let active = self.active_at(height)?;
        if active.is_expired_at(height) && !active.is_ready_for_next {
            return Err(ConsensusError::NotReady {
                current: active.name.clone(),
                next: active
                    .next_consensus
                    .clone()
                    .unwrap_or_else(|| "<unnamed>".to_string()),
                height,
            });
        }
        Ok(())
    }
}
