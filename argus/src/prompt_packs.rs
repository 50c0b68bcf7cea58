//! Named prompt suites used by benchmarks and health checks.
//!
//! Each pack is designed to elicit a different response length and style so that
//! metrics stay comparable across runs. Packs are looked up by id; the core treats
//! the id as an opaque key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptPack {
    pub id: String,
    pub name: String,
    pub prompt: String,
    /// Rough response length the prompt should produce
    pub expected_tokens: u32,
}

impl PromptPack {
    fn builtin(id: &str, name: &str, prompt: &str, expected_tokens: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            prompt: prompt.to_string(),
            expected_tokens,
        }
    }
}

/// Lookup table of prompt packs, ordered by id.
#[derive(Debug, Clone)]
pub struct PromptPackCatalog {
    packs: BTreeMap<String, PromptPack>,
}

impl Default for PromptPackCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptPackCatalog {
    /// The packs shipped with argus.
    pub fn builtin() -> Self {
        let packs = [
            PromptPack::builtin(
                "health_check",
                "Health Check",
                "Count from 1 to 20, each number on a new line.",
                30,
            ),
            PromptPack::builtin(
                "shakespeare",
                "Shakespeare",
                "Write a short soliloquy in the style of Shakespeare about the nature of time. \
                 Use iambic pentameter and include at least one metaphor.",
                150,
            ),
            PromptPack::builtin(
                "synthetic_short",
                "Synthetic Short",
                "Explain what an API is in exactly 3 sentences.",
                50,
            ),
            PromptPack::builtin(
                "synthetic_medium",
                "Synthetic Medium",
                "Describe the process of photosynthesis in plants. Include the key molecules involved, \
                 the two main stages (light-dependent and light-independent reactions), and explain \
                 why this process is essential for life on Earth.",
                200,
            ),
            PromptPack::builtin(
                "synthetic_long",
                "Synthetic Long",
                "Write a comprehensive guide on how to start a small business. Cover the following topics:\n\
                 1. Identifying a business idea and validating market demand\n\
                 2. Creating a business plan\n\
                 3. Legal structure and registration\n\
                 4. Funding options\n\
                 5. Setting up operations\n\
                 6. Marketing strategies\n\
                 7. Common mistakes to avoid\n\n\
                 Provide practical advice for each section.",
                500,
            ),
            PromptPack::builtin(
                "code_generation",
                "Code Generation",
                "Write a Python function that implements a binary search algorithm. \
                 Include docstring, type hints, and handle edge cases. \
                 Then show an example of how to use it.",
                150,
            ),
            PromptPack::builtin(
                "reasoning",
                "Reasoning",
                "A farmer has 17 sheep. All but 9 run away. How many sheep does the farmer have left? \
                 Explain your reasoning step by step.",
                100,
            ),
        ];

        Self {
            packs: packs.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Add or replace a pack.
    pub fn with_pack(mut self, pack: PromptPack) -> Self {
        self.packs.insert(pack.id.clone(), pack);
        self
    }

    pub fn get(&self, id: &str) -> Result<&PromptPack> {
        self.packs.get(id).ok_or_else(|| Error::UnknownPromptPack {
            id: id.to_string(),
            valid: self.ids().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.packs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.packs.keys().map(String::as_str)
    }

    pub fn list(&self) -> impl Iterator<Item = &PromptPack> {
        self.packs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_all_packs() {
        let catalog = PromptPackCatalog::builtin();
        let ids: Vec<_> = catalog.ids().collect();
        assert_eq!(
            ids,
            vec![
                "code_generation",
                "health_check",
                "reasoning",
                "shakespeare",
                "synthetic_long",
                "synthetic_medium",
                "synthetic_short"
            ]
        );
        assert_eq!(catalog.get("health_check").unwrap().expected_tokens, 30);
    }

    #[test]
    fn unknown_pack_lists_valid_options() {
        let err = PromptPackCatalog::builtin().get("haiku").unwrap_err();
        assert!(err.is_config_error());
        let message = err.to_string();
        assert!(message.contains("haiku"));
        assert!(message.contains("health_check, reasoning"));
    }

    #[test]
    fn custom_pack_overrides_builtin() {
        let catalog = PromptPackCatalog::builtin().with_pack(PromptPack {
            id: "health_check".into(),
            name: "Ping".into(),
            prompt: "Say ok.".into(),
            expected_tokens: 1,
        });
        assert_eq!(catalog.get("health_check").unwrap().prompt, "Say ok.");
        assert_eq!(catalog.list().count(), 7);
    }
}
