//! Counting limits for concurrent inference calls.
//!
//! Two independent semaphores bound the run: how many model contexts may be
//! resident at once and how many requests may be in flight. A dispatch must
//! hold one permit of each; both are released together when the
//! [`DispatchPermit`] is dropped, on every exit path.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const ENV_MAX_LOADED_MODELS: &str = "MAX_LOADED_MODELS";
pub const ENV_NUM_PARALLEL: &str = "NUM_PARALLEL";
pub const ENV_MAX_QUEUE: &str = "MAX_QUEUE";

/// Concurrency bounds for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Distinct model contexts allowed to be resident at once
    pub max_loaded_models: usize,
    /// Inference calls allowed in flight at once
    pub num_parallel: usize,
    /// Capacity of the result queue feeding the sink
    pub max_queue: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_loaded_models: 3,
            num_parallel: 4,
            max_queue: 512,
        }
    }
}

#[derive(Debug)]
pub enum LimitError {
    /// Variable set but not a positive integer
    Invalid { var: &'static str, value: String },
    /// Semaphore closed while waiting (only on teardown)
    Closed,
}

impl std::fmt::Display for LimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { var, value } => {
                write!(f, "{var} must be a positive integer, got {value:?}")
            }
            Self::Closed => write!(f, "concurrency limits closed"),
        }
    }
}

impl std::error::Error for LimitError {}

impl Limits {
    /// Override fields from the process environment (unset vars keep current values)
    pub fn apply_env(self) -> Result<Self, LimitError> {
        self.apply_lookup(|var| std::env::var(var).ok())
    }

    /// Override fields from an arbitrary variable source
    pub fn apply_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LimitError> {
        for (var, slot) in [
            (ENV_MAX_LOADED_MODELS, &mut self.max_loaded_models),
            (ENV_NUM_PARALLEL, &mut self.num_parallel),
            (ENV_MAX_QUEUE, &mut self.max_queue),
        ] {
            if let Some(raw) = lookup(var) {
                *slot = parse_positive(var, &raw)?;
            }
        }
        Ok(self)
    }

    /// Reject zero bounds (a zero semaphore would deadlock the dispatch loop)
    pub fn validate(&self) -> Result<(), LimitError> {
        for (var, value) in [
            (ENV_MAX_LOADED_MODELS, self.max_loaded_models),
            (ENV_NUM_PARALLEL, self.num_parallel),
            (ENV_MAX_QUEUE, self.max_queue),
        ] {
            if value == 0 {
                return Err(LimitError::Invalid {
                    var,
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn controller(&self) -> ConcurrencyController {
        ConcurrencyController::new(self)
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, LimitError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(LimitError::Invalid {
            var,
            value: raw.to_string(),
        }),
    }
}

/// Hands out [`DispatchPermit`]s under both bounds.
///
/// Cloning shares the underlying semaphores.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    models: Arc<Semaphore>,
    requests: Arc<Semaphore>,
    num_parallel: usize,
}

/// RAII pair of permits; dropping it releases both.
#[derive(Debug)]
pub struct DispatchPermit {
    _model: OwnedSemaphorePermit,
    _request: OwnedSemaphorePermit,
}

impl ConcurrencyController {
    pub fn new(limits: &Limits) -> Self {
        Self {
            models: Arc::new(Semaphore::new(limits.max_loaded_models)),
            requests: Arc::new(Semaphore::new(limits.num_parallel)),
            num_parallel: limits.num_parallel,
        }
    }

    /// Wait until one permit of each kind is free.
    ///
    /// Always model first, then request, so concurrent callers never hold
    /// one each and wait on the other.
    pub async fn acquire(&self) -> Result<DispatchPermit, LimitError> {
        let model = self
            .models
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimitError::Closed)?;
        let request = self
            .requests
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimitError::Closed)?;
        Ok(DispatchPermit {
            _model: model,
            _request: request,
        })
    }

    /// Requests currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.num_parallel - self.requests.available_permits()
    }
}
