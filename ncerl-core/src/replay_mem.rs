//! Replay memory.
//!
//! [`ReplayMem`] is a fixed-capacity ring buffer implementing
//! [`TransitionStore`](crate::TransitionStore). Whole episodes are appended
//! with `add_batched()`; batches are drawn uniformly without replacement.
//!
//! ```rust
//! use ncerl_core::{replay_mem::{ReplayMem, ReplayMemConfig}, TransitionStore};
//!
//! let config = ReplayMemConfig::default().capacity(10_000).seed(42);
//! let mem = ReplayMem::build(&config);
//! assert!(mem.is_empty());
//! ```
mod base;
mod config;
pub use base::ReplayMem;
pub use config::ReplayMemConfig;
