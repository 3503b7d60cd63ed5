//! Domain layer: reply matching rules, waiter states and cancellation.
//!
//! Pure logic, no broker access.

pub mod cancel;
pub mod matching;
pub mod state;

pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use matching::{evaluate_reply, ReplyMatching, StaleReplyPolicy, Verdict};
pub use state::{WaitOutcome, WaiterState};
