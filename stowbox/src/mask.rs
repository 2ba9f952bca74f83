//! Secret masking.
//!
//! Archive locations returned by the service are pre-signed URLs. The client
//! registers each one with a [`SecretMasker`] before handing it out, so that
//! whatever renders logs can hide it.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

const REDACTED: &str = "***";

/// Receives values that must never appear verbatim in logs.
pub trait SecretMasker: Send + Sync {
    fn mask(&self, secret: &str);
}

/// Registers secrets with the CI runner through the `::add-mask::` workflow
/// command on standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowCommandMasker;

impl SecretMasker for WorkflowCommandMasker {
    fn mask(&self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        // Best effort, there is no caller to report a closed stdout to.
        let _ = writeln!(stdout, "{}", add_mask_command(secret));
    }
}

fn add_mask_command(secret: &str) -> String {
    let escaped = secret
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A");
    format!("::add-mask::{escaped}")
}

/// In-memory registry of masked values.
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MaskRegistry {
    secrets: Arc<Mutex<Vec<String>>>,
}

impl MaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secrets(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn contains(&self, secret: &str) -> bool {
        self.lock().iter().any(|known| known == secret)
    }

    /// Replaces every registered secret in `text` with `***`.
    pub fn redact(&self, text: &str) -> String {
        let secrets = self.lock();
        let mut redacted = text.to_owned();
        // Longest first, so a secret containing another is replaced whole.
        let mut ordered: Vec<&String> = secrets.iter().collect();
        ordered.sort_by_key(|secret| std::cmp::Reverse(secret.len()));
        for secret in ordered {
            redacted = redacted.replace(secret.as_str(), REDACTED);
        }
        redacted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecretMasker for MaskRegistry {
    fn mask(&self, secret: &str) {
        let mut secrets = self.lock();
        if !secret.is_empty() && !secrets.iter().any(|known| known == secret) {
            secrets.push(secret.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_command_escapes_line_breaks() {
        assert_eq!(
            add_mask_command("https://blob/a?sig=1%2\n"),
            "::add-mask::https://blob/a?sig=1%252%0A"
        );
    }

    #[test]
    fn registry_redacts_registered_values() {
        let registry = MaskRegistry::new();
        registry.mask("https://blob.example.com/a?sig=xyz");
        registry.mask("https://blob.example.com/a?sig=xyz");
        registry.mask("");

        assert_eq!(registry.secrets().len(), 1);
        assert_eq!(
            registry.redact("GET https://blob.example.com/a?sig=xyz failed"),
            "GET *** failed"
        );
    }

    #[test]
    fn registry_clones_share_state() {
        let registry = MaskRegistry::new();
        let shared: Arc<dyn SecretMasker> = Arc::new(registry.clone());
        shared.mask("token");
        assert!(registry.contains("token"));
    }
}
