use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use super::{PackageSpec, Registry};
use crate::error::MipError;

/// Registry backed by an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    specs: HashMap<String, PackageSpec>,
}

impl StaticRegistry {
    pub fn new(specs: impl IntoIterator<Item = PackageSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn insert(&mut self, spec: PackageSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn resolve(&self, name: &str) -> Result<PackageSpec> {
        self.specs
            .get(name)
            .cloned()
            .ok_or_else(|| MipError::NotFound(name.to_string()).into())
    }
}
