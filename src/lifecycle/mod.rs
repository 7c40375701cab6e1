//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load options → Validate → Resolve backend → Acquire credentials → Build registry
//!
//! Runner (runner.rs):
//!     Pre-start hooks (in order) → start → wait for operator or host → stop
//!
//! Signals (signals.rs):
//!     Console line / Ctrl-C → operator quit
//!
//! Shutdown (shutdown.rs):
//!     stop → broadcast to front listener and relays
//! ```
//!
//! # Design Decisions
//! - Ordered startup: options first, then credentials, then listeners
//! - Any start or run error triggers a best-effort stop
//! - No retries

pub mod runner;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use runner::Runner;
pub use shutdown::Shutdown;
pub use startup::AppContext;
