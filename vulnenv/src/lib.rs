//! Step-wise heuristic vulnerability analysis environment.
//!
//! An [`episode::Episode`] holds one C/C++ function and its ground-truth label.
//! A decision policy submits actions one at a time; each action reveals a
//! lexical fact about the function or ends the episode with a verdict that is
//! scored against the label. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (line store, analyzer, detectors,
//!   action grammar). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, dataset files, prompt
//!   rendering, policy processes, trajectory logs).
//!
//! [`episode`] owns the state machine; [`rollout`] drives an episode with a
//! [`io::policy::Policy`] until it is done.

pub mod core;
pub mod episode;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rollout;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
