//! The model catalog: which `(provider, model)` pairs exist and what they cost.
//!
//! The catalog is built once at startup and never mutated afterwards. A
//! provider without configured credentials is left out entirely, so the
//! fallback planner can never select it.

use crate::api::Provider;
use crate::config::RelayConfig;
use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Output modality of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Coarse credit-price bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Cheap,
    Expensive,
    Image,
}

impl CostTier {
    /// Credits charged per request in this tier.
    pub fn credits(&self) -> u32 {
        match self {
            Self::Cheap => 1,
            Self::Expensive => 3,
            Self::Image => 5,
        }
    }
}

/// Credits charged for a model id not present in any catalog.
pub const DEFAULT_CREDIT_COST: u32 = 1;

/// Capability metadata of one catalog model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub display_name: String,
    pub modality: Modality,
    pub cost_tier: CostTier,
}

/// One catalog row, as read from JSON.
///
/// ```json
/// { "provider": "openai", "model_id": "gpt-4o", "display_name": "GPT-4o",
///   "modality": "text", "cost_tier": "expensive" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub provider: Provider,
    pub model_id: String,
    pub display_name: String,
    #[serde(default = "default_modality")]
    pub modality: Modality,
    #[serde(default = "default_cost_tier")]
    pub cost_tier: CostTier,
}

fn default_modality() -> Modality {
    Modality::Text
}

fn default_cost_tier() -> CostTier {
    CostTier::Cheap
}

impl CatalogEntry {
    pub fn new(
        provider: Provider,
        model_id: &str,
        display_name: &str,
        modality: Modality,
        cost_tier: CostTier,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.to_string(),
            display_name: display_name.to_string(),
            modality,
            cost_tier,
        }
    }

    /// A cheap text model.
    pub fn text(provider: Provider, model_id: &str, display_name: &str) -> Self {
        Self::new(
            provider,
            model_id,
            display_name,
            Modality::Text,
            CostTier::Cheap,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(GenerationError::Config(format!(
                "Catalog entry for provider '{}' has an empty model id",
                self.provider
            )));
        }
        if self.modality == Modality::Image && self.provider != Provider::OpenAi {
            return Err(GenerationError::Config(format!(
                "Image model '{}' is only supported on openai",
                self.model_id
            )));
        }
        Ok(())
    }
}

/// Models shipped with the relay.
pub fn builtin_entries() -> Vec<CatalogEntry> {
    use CostTier::{Cheap, Expensive};
    use Modality::{Image, Text};
    use Provider::{Anthropic, Google, OpenAi};
    vec![
        CatalogEntry::new(OpenAi, "gpt-4o", "GPT-4o", Text, Expensive),
        CatalogEntry::new(OpenAi, "gpt-4o-mini", "GPT-4o mini", Text, Cheap),
        CatalogEntry::new(OpenAi, "gpt-4-turbo", "GPT-4 Turbo", Text, Expensive),
        CatalogEntry::new(OpenAi, "o3-mini", "o3-mini", Text, Expensive),
        CatalogEntry::new(OpenAi, "dall-e-3", "DALL·E 3", Image, CostTier::Image),
        CatalogEntry::new(OpenAi, "dall-e-2", "DALL·E 2", Image, CostTier::Image),
        CatalogEntry::new(
            Anthropic,
            "claude-3-5-sonnet-latest",
            "Claude 3.5 Sonnet",
            Text,
            Expensive,
        ),
        CatalogEntry::new(
            Anthropic,
            "claude-3-5-haiku-latest",
            "Claude 3.5 Haiku",
            Text,
            Cheap,
        ),
        CatalogEntry::new(
            Anthropic,
            "claude-3-opus-latest",
            "Claude 3 Opus",
            Text,
            Expensive,
        ),
        CatalogEntry::new(Google, "gemini-2.0-flash", "Gemini 2.0 Flash", Text, Cheap),
        CatalogEntry::new(Google, "gemini-1.5-flash", "Gemini 1.5 Flash", Text, Cheap),
        CatalogEntry::new(Google, "gemini-1.5-pro", "Gemini 1.5 Pro", Text, Expensive),
    ]
}

/// Credits charged for `model_id` according to the built-in table, or
/// [`DEFAULT_CREDIT_COST`] when the id is unknown.
pub fn cost_for_model(model_id: &str) -> u32 {
    builtin_entries()
        .iter()
        .find(|e| e.model_id == model_id)
        .map(|e| e.cost_tier.credits())
        .unwrap_or(DEFAULT_CREDIT_COST)
}

/// Read-only registry of available models, keyed by provider then model id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    models: BTreeMap<Provider, BTreeMap<String, ModelInfo>>,
}

impl ModelCatalog {
    /// Build a catalog from explicit entries. Duplicate pairs are rejected.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self> {
        let mut models: BTreeMap<Provider, BTreeMap<String, ModelInfo>> = BTreeMap::new();
        for entry in entries {
            entry.validate()?;
            let info = ModelInfo {
                display_name: entry.display_name,
                modality: entry.modality,
                cost_tier: entry.cost_tier,
            };
            if models
                .entry(entry.provider)
                .or_default()
                .insert(entry.model_id.clone(), info)
                .is_some()
            {
                return Err(GenerationError::Config(format!(
                    "Duplicate catalog entry '{}/{}'",
                    entry.provider, entry.model_id
                )));
            }
        }
        Ok(Self { models })
    }

    /// Every built-in model, regardless of credentials.
    pub fn builtin() -> Self {
        let mut models: BTreeMap<Provider, BTreeMap<String, ModelInfo>> = BTreeMap::new();
        for entry in builtin_entries() {
            models.entry(entry.provider).or_default().insert(
                entry.model_id,
                ModelInfo {
                    display_name: entry.display_name,
                    modality: entry.modality,
                    cost_tier: entry.cost_tier,
                },
            );
        }
        Self { models }
    }

    /// Built-in models of the providers that have credentials configured.
    pub fn from_config(config: &RelayConfig) -> Self {
        let available = config.credentialed_providers();
        let catalog = Self::builtin().restrict_to(&available);
        tracing::info!(
            providers = ?catalog.list_providers(),
            "Model catalog initialised"
        );
        catalog
    }

    /// Drop every provider not in `providers`.
    pub fn restrict_to(mut self, providers: &BTreeSet<Provider>) -> Self {
        self.models.retain(|p, _| providers.contains(p));
        self
    }

    /// Providers with at least one model.
    pub fn list_providers(&self) -> BTreeSet<Provider> {
        self.models
            .iter()
            .filter(|(_, models)| !models.is_empty())
            .map(|(p, _)| *p)
            .collect()
    }

    /// Models of `provider`; empty when the provider is unknown.
    pub fn list_models(&self, provider: Provider) -> BTreeMap<String, ModelInfo> {
        self.models.get(&provider).cloned().unwrap_or_default()
    }

    pub fn get(&self, provider: Provider, model: &str) -> Option<&ModelInfo> {
        self.models.get(&provider).and_then(|models| models.get(model))
    }

    pub fn is_valid(&self, provider: Provider, model: &str) -> bool {
        self.get(provider, model).is_some()
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.models
            .get(&provider)
            .is_some_and(|models| !models.is_empty())
    }

    /// Credits charged for one request to `provider/model_id`: the pair's tier
    /// when catalogued, otherwise the built-in table keyed by model id.
    pub fn cost_credits(&self, provider: Provider, model_id: &str) -> u32 {
        self.get(provider, model_id)
            .map(|info| info.cost_tier.credits())
            .unwrap_or_else(|| cost_for_model(model_id))
    }
}

/// Parse catalog entries from a JSON array.
pub fn catalog_from_str(s: &str) -> Result<ModelCatalog> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(s)
        .map_err(|e| GenerationError::Config(format!("Invalid catalog JSON: {}", e)))?;
    ModelCatalog::from_entries(entries)
}

/// Read and parse a catalog file containing a JSON array of entries.
pub fn catalog_from_file(path: impl AsRef<Path>) -> Result<ModelCatalog> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GenerationError::Config(format!(
            "Failed to read catalog file '{}': {}",
            path.display(),
            e
        ))
    })?;
    catalog_from_str(&contents)
}
