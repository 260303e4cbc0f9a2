//! Genderline Core - Shared infrastructure for author inference pipelines
//!
//! Logging, progress reporting, graceful shutdown, HTTP client setup and
//! the counting limits that bound concurrent inference calls.

pub mod http;
pub mod limits;
pub mod logging;
pub mod progress;
pub mod shutdown;

// Re-exports for convenience
pub use http::{HttpConfig, HttpError, build_http_client};
pub use limits::{ConcurrencyController, DispatchPermit, LimitError, Limits};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num, pct};
pub use shutdown::{ShutdownFlag, install_signal_handlers};
