use async_trait::async_trait;

use careloom::directory::{DirectoryError, Provider, ProviderDirectory, ProviderQuery};

/// Directory that returns a fixed provider list.
pub struct CannedDirectory {
    pub providers: Vec<Provider>,
}

impl CannedDirectory {
    pub fn with_one(name: &str, specialty: &str, city: &str) -> Self {
        Self {
            providers: vec![Provider {
                id: "p1".into(),
                name: name.into(),
                specialty: specialty.into(),
                rating: 4.5,
                city: city.into(),
                ..Default::default()
            }],
        }
    }

    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

#[async_trait]
impl ProviderDirectory for CannedDirectory {
    async fn search(&self, _query: &ProviderQuery) -> Result<Vec<Provider>, DirectoryError> {
        Ok(self.providers.clone())
    }
}

/// Directory that always fails (after its own internal retries, notionally).
pub struct FailingDirectory;

#[async_trait]
impl ProviderDirectory for FailingDirectory {
    async fn search(&self, _query: &ProviderQuery) -> Result<Vec<Provider>, DirectoryError> {
        Err(DirectoryError::Exhausted { attempts: 3 })
    }
}
