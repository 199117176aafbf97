//! Fixed connection strings

use crate::connector::{CredentialError, CredentialSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out a fixed list of connection strings in order
///
/// The cursor persists across connect calls and wraps around, so a call that
/// starts after an earlier success continues with the string after the one
/// that worked.
pub struct StaticSource {
    dsns: Vec<String>,
    budget: usize,
    cursor: AtomicUsize,
}

impl StaticSource {
    /// Rotate through `dsns`; the budget is the list length
    pub fn new<I, D>(dsns: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        let dsns: Vec<String> = dsns.into_iter().map(Into::into).collect();
        Self {
            budget: dsns.len(),
            dsns,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Return the same string on every attempt, up to `budget` times per call
    ///
    /// For secrets refreshed out of band: the string stays the same while the
    /// password behind it changes.
    pub fn repeating(dsn: impl Into<String>, budget: usize) -> Self {
        Self {
            dsns: vec![dsn.into()],
            budget,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl std::fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSource")
            .field("dsns", &self.dsns.len())
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSource for StaticSource {
    async fn next(&self) -> Result<String, CredentialError> {
        if self.dsns.is_empty() {
            return Err(CredentialError::Empty);
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.dsns.len();
        Ok(self.dsns[i].clone())
    }

    fn retry_budget(&self) -> usize {
        self.budget
    }
}
