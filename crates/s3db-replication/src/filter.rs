//! `resourcesFilter` (spec §4.9 "Filters by `resourcesFilter` per
//! target").

/// Which resources a replicator mirrors. An empty `include` means "all
/// resources not otherwise excluded".
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourcesFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ResourcesFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { include: names.into_iter().map(Into::into).collect(), exclude: Vec::new() }
    }

    #[must_use]
    pub fn matches(&self, resource: &str) -> bool {
        if self.exclude.iter().any(|n| n == resource) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|n| n == resource)
    }
}
