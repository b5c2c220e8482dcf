//! Fallback planning: which candidates to try, in which order.

use crate::api::{Candidate, Provider};
use crate::catalog::ModelCatalog;
use crate::error::{GenerationError, Result};
use std::collections::BTreeSet;

/// Produces the ordered candidate list for a request: the requested model
/// first, then the configured fallbacks, de-duplicated and limited to
/// available providers.
#[derive(Debug, Clone)]
pub struct FallbackPlanner {
    fallbacks: Vec<Candidate>,
    available: BTreeSet<Provider>,
}

impl FallbackPlanner {
    /// Planner over the providers present in `catalog`.
    pub fn new(catalog: &ModelCatalog, fallbacks: Vec<Candidate>) -> Self {
        Self {
            fallbacks,
            available: catalog.list_providers(),
        }
    }

    /// Further limit planning to `providers`.
    pub fn restrict_to(mut self, providers: &BTreeSet<Provider>) -> Self {
        self.available.retain(|p| providers.contains(p));
        self
    }

    /// Check every fallback whose provider is available against the catalog.
    ///
    /// Fallbacks of unavailable providers are ignored here; they are never
    /// planned.
    pub fn validate(&self, catalog: &ModelCatalog) -> Result<()> {
        for fallback in &self.fallbacks {
            if self.available.contains(&fallback.provider)
                && !catalog.is_valid(fallback.provider, &fallback.model)
            {
                return Err(GenerationError::Config(format!(
                    "Fallback model '{}' is not in the catalog",
                    fallback
                )));
            }
        }
        Ok(())
    }

    pub fn fallbacks(&self) -> &[Candidate] {
        &self.fallbacks
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.available.contains(&provider)
    }

    /// `[requested, fallbacks...]`, keeping the first occurrence of each
    /// candidate and dropping unavailable providers.
    pub fn plan(&self, requested: &Candidate) -> Vec<Candidate> {
        let mut plan: Vec<Candidate> = Vec::new();
        for candidate in std::iter::once(requested).chain(self.fallbacks.iter()) {
            if self.available.contains(&candidate.provider) && !plan.contains(candidate) {
                plan.push(candidate.clone());
            }
        }
        plan
    }
}
