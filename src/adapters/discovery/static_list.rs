//! Static target list from configuration.

use async_trait::async_trait;

use crate::domain::target::Target;
use crate::ports::target_provider::{DiscoveryError, TargetProvider};

/// Provider returning a fixed list; never fails.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    targets: Vec<Target>,
}

impl StaticProvider {
    /// Create a provider for the given addresses.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: addresses.into_iter().map(Target::new).collect(),
        }
    }
}

#[async_trait]
impl TargetProvider for StaticProvider {
    async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
        Ok(self.targets.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
