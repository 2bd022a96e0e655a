//! A minimal cooperative cancellation token.
//!
//! The source material uses exception-driven cancellation; this is the
//! explicit, pollable replacement described in the design notes: every
//! suspension point (bulk read, delay, batch emission) checks
//! [`CancelToken::is_cancelled`] and returns [`crate::error::JensenError::Cancelled`]
//! when set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
