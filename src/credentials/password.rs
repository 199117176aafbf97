//! Password rotation over a fixed template

use super::dsn::DsnTemplate;
use crate::connector::{CredentialError, CredentialSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fills one [`DsnTemplate`] with each password in turn
///
/// The usual setup during a password change: list the previous and the new
/// password and whichever the server currently accepts wins.
pub struct PasswordRotation {
    template: DsnTemplate,
    passwords: Vec<String>,
    cursor: AtomicUsize,
}

impl PasswordRotation {
    /// Rotate `passwords` through `template`; the budget is the list length
    pub fn new<I, P>(template: DsnTemplate, passwords: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            template,
            passwords: passwords.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// The template passwords are rendered into
    pub fn template(&self) -> &DsnTemplate {
        &self.template
    }
}

impl std::fmt::Debug for PasswordRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRotation")
            .field("template", &self.template)
            .field("passwords", &self.passwords.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSource for PasswordRotation {
    async fn next(&self) -> Result<String, CredentialError> {
        if self.passwords.is_empty() {
            return Err(CredentialError::Empty);
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.passwords.len();
        self.template.render(Some(&self.passwords[i]))
    }

    fn retry_budget(&self) -> usize {
        self.passwords.len()
    }
}
