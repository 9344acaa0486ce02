use sha2::{Digest, Sha256};

use super::catalog::{StyleCatalog, StyleProfile};

/// Result of resolving a profile by id. `fallback_reason` is set whenever the
/// requested id was unknown and the catalog's first profile was substituted.
#[derive(Debug, Clone)]
pub struct StyleSelection {
    pub profile: StyleProfile,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StyleSelector {
    pub catalog: StyleCatalog,
}

impl StyleSelector {
    pub fn new(catalog: Option<StyleCatalog>) -> Self {
        Self {
            catalog: catalog.unwrap_or_default(),
        }
    }

    /// Deterministically maps a seed string to a catalog profile.
    ///
    /// The whole seed is hashed, so a change anywhere in the string can move
    /// the selection, and the digest is reduced modulo the catalog size so
    /// selections spread across every entry. Equal seeds always land on the
    /// same profile. An empty seed is valid input.
    pub fn pick(&self, seed: &str) -> &StyleProfile {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let value = digest
            .iter()
            .take(8)
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        let index = (value % self.catalog.len() as u64) as usize;
        self.catalog
            .nth(index)
            .unwrap_or_else(|| self.catalog.first())
    }

    /// Looks a profile up by id. Unknown ids resolve to the catalog's first
    /// profile with an explicit `fallback_reason`; a stale reference is a
    /// soft anomaly here, never an error.
    pub fn resolve(&self, id: &str) -> StyleSelection {
        if let Some(profile) = self.catalog.get(id) {
            return StyleSelection {
                profile: profile.clone(),
                requested: Some(id.to_string()),
                fallback_reason: None,
            };
        }
        let fallback = self.catalog.first();
        StyleSelection {
            profile: fallback.clone(),
            requested: Some(id.to_string()),
            fallback_reason: Some(format!(
                "Unknown style '{}'; falling back to '{}'.",
                id, fallback.id
            )),
        }
    }
}

impl Default for StyleSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Hex digest of a selection seed, for event logs.
pub fn seed_digest(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{seed_digest, StyleSelector};

    #[test]
    fn equal_seeds_pick_the_same_profile() {
        let selector = StyleSelector::new(None);
        for seed in ["red lighthouse at night", "", "a", "  spaces  "] {
            assert_eq!(selector.pick(seed).id, selector.pick(seed).id);
        }
    }

    #[test]
    fn varied_seeds_spread_across_the_catalog() {
        let selector = StyleSelector::new(None);
        let mut seen = HashSet::new();
        for index in 0..256 {
            seen.insert(selector.pick(&format!("seed-{index}")).id.clone());
        }
        assert!(seen.len() > 1, "selection collapsed to a single profile");
    }

    #[test]
    fn empty_seed_resolves_to_a_profile() {
        let selector = StyleSelector::new(None);
        let picked = selector.pick("");
        assert!(selector.catalog.get(&picked.id).is_some());
    }

    #[test]
    fn resolve_known_id_has_no_fallback() {
        let selector = StyleSelector::new(None);
        let id = selector.catalog.first().id.clone();
        let selection = selector.resolve(&id);
        assert_eq!(selection.profile.id, id);
        assert_eq!(selection.requested.as_deref(), Some(id.as_str()));
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn resolve_unknown_id_falls_back_to_first_profile() {
        let selector = StyleSelector::new(None);
        let selection = selector.resolve("missing-style");
        assert_eq!(selection.profile.id, selector.catalog.first().id);
        assert_eq!(selection.requested.as_deref(), Some("missing-style"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some(
                format!(
                    "Unknown style 'missing-style'; falling back to '{}'.",
                    selector.catalog.first().id
                )
                .as_str()
            )
        );
    }

    #[test]
    fn seed_digest_is_stable_hex() {
        let first = seed_digest("lighthouse");
        let second = seed_digest("lighthouse");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(first, seed_digest("lighthouse!"));
    }
}
