//! Callback id allocation.

use crate::constants::CALLBACK_ALLOCATION_ATTEMPTS;
use crate::error::{SubmissionError, SubmissionResult};
use crate::store::SubmissionStore;
use ssv_callback_id::CallbackId;

/// Allocates callback ids that are guaranteed unused at the moment they are returned.
///
/// Uniqueness comes from the store's atomic reservation, not from the randomness of the id
/// source, so two concurrent submissions can never be handed the same id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackIdGenerator;

impl CallbackIdGenerator {
    pub fn generate(&self, store: &dyn SubmissionStore) -> SubmissionResult<CallbackId> {
        self.generate_with(store, CallbackId::generate)
    }

    /// Reserves an id drawn from `source`.
    ///
    /// # Arguments
    ///
    /// * `store` - Store performing the insert-if-absent reservation.
    /// * `source` - Candidate source, called once per attempt.
    ///
    /// # Errors
    ///
    /// - [`SubmissionError::CallbackAllocation`] after
    ///   [`CALLBACK_ALLOCATION_ATTEMPTS`] consecutive collisions.
    /// - Any store error, unchanged.
    pub fn generate_with(
        &self,
        store: &dyn SubmissionStore,
        mut source: impl FnMut() -> CallbackId,
    ) -> SubmissionResult<CallbackId> {
        for _attempt in 0..CALLBACK_ALLOCATION_ATTEMPTS {
            let candidate = source();
            if store.reserve_callback(&candidate)? {
                return Ok(candidate);
            }
            tracing::warn!("callback id collision on {}, drawing again", candidate);
        }
        Err(SubmissionError::CallbackAllocation(
            CALLBACK_ALLOCATION_ATTEMPTS,
        ))
    }
}
