use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a profile arranges its prompt-derived forms on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    Orbs,
    Bands,
    Facets,
}

/// Immutable bundle of visual parameters defining one consistent look.
///
/// The orchestrator treats everything past `id` and `label` as opaque; only
/// the compositor interprets the palette and texture fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    pub id: String,
    pub label: String,
    /// Ordered palette; the first two entries anchor the backdrop, the rest
    /// color the forms.
    pub palette: Vec<[u8; 3]>,
    /// Amplitude of the per-pixel grain layer, 0 disables it.
    pub grain: u8,
    /// Strength of the palette wash applied over a base image, 0.0..=1.0.
    pub wash: f32,
    /// Baseline number of forms composed onto a fresh canvas.
    pub density: u8,
    pub form: FormKind,
}

#[derive(Debug, Clone)]
pub struct StyleCatalog {
    profiles: IndexMap<String, StyleProfile>,
}

impl StyleCatalog {
    /// Builds a catalog from the given profiles, or the default table when
    /// `None` or an empty map is supplied. The catalog is never empty.
    pub fn new(profiles: Option<IndexMap<String, StyleProfile>>) -> Self {
        Self {
            profiles: profiles
                .filter(|map| !map.is_empty())
                .unwrap_or_else(default_styles),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StyleProfile> {
        self.profiles.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// First profile in catalog order. The constructor guarantees at least
    /// one entry exists.
    pub fn first(&self) -> &StyleProfile {
        self.profiles
            .first()
            .map(|(_, profile)| profile)
            .expect("catalog is never empty")
    }

    pub fn nth(&self, index: usize) -> Option<&StyleProfile> {
        self.profiles.get_index(index).map(|(_, profile)| profile)
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_styles() -> IndexMap<String, StyleProfile> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str,
                      label: &str,
                      palette: &[[u8; 3]],
                      grain: u8,
                      wash: f32,
                      density: u8,
                      form: FormKind| {
        map.insert(
            id.to_string(),
            StyleProfile {
                id: id.to_string(),
                label: label.to_string(),
                palette: palette.to_vec(),
                grain,
                wash,
                density,
                form,
            },
        );
    };

    insert(
        "ember-noir",
        "Ember Noir",
        &[
            [24, 18, 28],
            [58, 32, 41],
            [201, 74, 42],
            [232, 148, 58],
            [246, 222, 180],
        ],
        14,
        0.72,
        4,
        FormKind::Orbs,
    );
    insert(
        "sunfade-riso",
        "Sunfade Riso",
        &[
            [246, 238, 220],
            [244, 200, 148],
            [226, 104, 84],
            [64, 110, 142],
            [46, 58, 74],
        ],
        22,
        0.64,
        5,
        FormKind::Bands,
    );
    insert(
        "glasswing",
        "Glasswing",
        &[
            [230, 238, 244],
            [206, 222, 236],
            [160, 196, 216],
            [222, 186, 206],
            [120, 144, 178],
        ],
        6,
        0.48,
        6,
        FormKind::Facets,
    );
    insert(
        "meridian-ink",
        "Meridian Ink",
        &[
            [18, 24, 44],
            [34, 48, 82],
            [78, 104, 150],
            [154, 176, 204],
            [228, 232, 238],
        ],
        10,
        0.78,
        3,
        FormKind::Bands,
    );
    insert(
        "cinder-pop",
        "Cinder Pop",
        &[
            [28, 26, 30],
            [52, 46, 56],
            [238, 62, 98],
            [252, 186, 44],
            [58, 196, 182],
        ],
        18,
        0.68,
        5,
        FormKind::Orbs,
    );
    insert(
        "verdant-haze",
        "Verdant Haze",
        &[
            [214, 226, 206],
            [168, 196, 160],
            [96, 140, 104],
            [56, 92, 80],
            [208, 178, 122],
        ],
        12,
        0.56,
        4,
        FormKind::Facets,
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{StyleCatalog, StyleProfile};

    #[test]
    fn default_catalog_is_finite_and_non_empty() {
        let catalog = StyleCatalog::new(None);
        assert!(catalog.len() >= 2);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn catalog_order_is_stable_across_calls() {
        let catalog = StyleCatalog::new(None);
        let first: Vec<String> = catalog.list().map(|profile| profile.id.clone()).collect();
        let second: Vec<String> = catalog.list().map(|profile| profile.id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], catalog.first().id);
    }

    #[test]
    fn catalog_ids_are_unique_and_keyed() {
        let catalog = StyleCatalog::new(None);
        for profile in catalog.list() {
            assert_eq!(catalog.get(&profile.id).map(|found| &found.id), Some(&profile.id));
            assert!(!profile.label.is_empty());
            assert!(profile.palette.len() >= 3);
            assert!((0.0..=1.0).contains(&profile.wash));
        }
    }

    #[test]
    fn empty_map_falls_back_to_defaults() {
        let catalog = StyleCatalog::new(Some(indexmap::IndexMap::new()));
        assert!(!catalog.is_empty());
    }

    #[test]
    fn explicit_profiles_are_kept_in_insertion_order() {
        let mut map = indexmap::IndexMap::new();
        for id in ["zeta", "alpha"] {
            map.insert(
                id.to_string(),
                StyleProfile {
                    id: id.to_string(),
                    label: id.to_uppercase(),
                    palette: vec![[0, 0, 0], [255, 255, 255], [128, 128, 128]],
                    grain: 0,
                    wash: 0.5,
                    density: 2,
                    form: super::FormKind::Orbs,
                },
            );
        }
        let catalog = StyleCatalog::new(Some(map));
        assert_eq!(catalog.first().id, "zeta");
        assert_eq!(catalog.nth(1).map(|profile| profile.id.as_str()), Some("alpha"));
    }
}
