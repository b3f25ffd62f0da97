//! Renaming and moving files into their canonical place.
//!
//! Phase A renames a file using the policy registry. Phase B moves files
//! out of drop sources, either where a policy says or next to the other
//! episodes of the same series. Every filesystem step is retried with the
//! configured backoff; waits are cancellable.

pub mod cleanup;
pub mod destination;
pub mod engine;
pub mod retry;

pub use cleanup::{remove_placement, Removal};
pub use destination::{can_receive, default_location, default_target, Target};
pub use engine::{evaluate_and_apply, PhaseOutcome, PlacementEngine, PlacementFailure, PlacementReport};
pub use retry::{RecordingSleeper, RetryError, RetryPolicy, Sleeper, TokenSleeper};
