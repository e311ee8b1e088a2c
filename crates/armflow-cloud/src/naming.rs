//! Name generation for resources declared without a name

use crate::error::{CloudError, Result};
use crate::identity::NamingRule;
use crate::provider::Lookup;
use rand::Rng;
use std::future::Future;

pub const DEFAULT_NAME_ATTEMPTS: u32 = 15;

const COMPACT_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Resolves a declared or generated resource name
#[derive(Debug, Clone, Copy)]
pub struct NameResolver {
    max_attempts: u32,
}

impl Default for NameResolver {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_NAME_ATTEMPTS,
        }
    }
}

impl NameResolver {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Return `declared` unchanged, or find a free generated name
    ///
    /// `probe` is called with each candidate. `NotFound` means the candidate
    /// is free; a found resource or any probe error discards it. Child kinds
    /// put their parent qualifiers into the probe closure.
    pub async fn resolve<F, Fut>(
        &self,
        declared: Option<&str>,
        rule: NamingRule,
        label: &str,
        mut probe: F,
    ) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Lookup<()>>>,
    {
        if let Some(name) = declared.filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }

        for attempt in 1..=self.max_attempts {
            let candidate = generate_candidate(rule);
            match probe(candidate.clone()).await {
                Ok(Lookup::NotFound) => {
                    tracing::info!("Generated name {} for {}", candidate, label);
                    return Ok(candidate);
                }
                Ok(Lookup::Found(())) => {
                    tracing::debug!(
                        "Candidate {} for {} is taken (attempt {}/{})",
                        candidate,
                        label,
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        "Probe for candidate {} failed (attempt {}/{}): {}",
                        candidate,
                        attempt,
                        self.max_attempts,
                        e
                    );
                }
            }
        }

        Err(CloudError::NameExhausted {
            kind: label.to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// Generate one candidate name
pub fn generate_candidate(rule: NamingRule) -> String {
    match rule {
        NamingRule::Compact { max_len } => {
            let mut rng = rand::thread_rng();
            (0..max_len.max(3))
                .map(|_| COMPACT_CHARSET[rng.gen_range(0..COMPACT_CHARSET.len())] as char)
                .collect()
        }
        NamingRule::Token => uuid::Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_declared_name_is_returned_without_probing() {
        let calls = Cell::new(0);
        let name = NameResolver::default()
            .resolve(Some("vm1"), NamingRule::Token, "virtualMachines", |_| {
                calls.set(calls.get() + 1);
                async { Ok(Lookup::Found(())) }
            })
            .await
            .unwrap();

        assert_eq!(name, "vm1");
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn test_first_free_candidate_wins() {
        let calls = Cell::new(0);
        let name = NameResolver::default()
            .resolve(None, NamingRule::Compact { max_len: 24 }, "storageAccounts", |_| {
                calls.set(calls.get() + 1);
                let taken = calls.get() < 3;
                async move {
                    if taken {
                        Ok(Lookup::Found(()))
                    } else {
                        Ok(Lookup::NotFound)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.get(), 3);
        assert_eq!(name.len(), 24);
        assert!(
            name.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn test_exhaustion_after_fixed_attempts() {
        let calls = Cell::new(0);
        let err = NameResolver::default()
            .resolve(None, NamingRule::Token, "subnets", |_| {
                calls.set(calls.get() + 1);
                async { Ok(Lookup::Found(())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.get(), 15);
        assert!(matches!(err, CloudError::NameExhausted { attempts: 15, .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_probe_errors_discard_candidate() {
        let calls = Cell::new(0);
        let name = NameResolver::new(5)
            .resolve(None, NamingRule::Token, "loadBalancers", |_| {
                calls.set(calls.get() + 1);
                let fail = calls.get() == 1;
                async move {
                    if fail {
                        Err(CloudError::Provider {
                            status: 500,
                            message: "boom".into(),
                        })
                    } else {
                        Ok(Lookup::NotFound)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(name.len(), 36);
    }
}
