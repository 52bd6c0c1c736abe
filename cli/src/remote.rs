use anyhow::{Context, Result};
use tracing::debug;

use larder_core::models::Product;
use larder_core::recovery::RemoteCatalog;
use larder_core::remote::parse_shared_catalog;

/// HTTP client for the shared product catalog.
pub struct SharedCatalogClient {
    client: reqwest::Client,
    url: String,
    rt: tokio::runtime::Handle,
}

impl SharedCatalogClient {
    /// Must be called from inside a multi-threaded tokio runtime.
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "larder-cli/{} (meal ledger)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        let rt = tokio::runtime::Handle::try_current()
            .context("Shared catalog client needs a tokio runtime")?;
        Ok(Self {
            client,
            url: url.to_string(),
            rt,
        })
    }

    pub async fn fetch_async(&self) -> Result<Vec<Product>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to reach shared catalog at {}", self.url))?
            .error_for_status()
            .context("Shared catalog returned an error status")?;

        let body = resp
            .text()
            .await
            .context("Failed to read shared catalog response")?;

        let products = parse_shared_catalog(&body)
            .with_context(|| format!("Shared catalog at {} sent an unusable body", self.url))?;
        debug!(count = products.len(), "fetched shared catalog");
        Ok(products)
    }
}

impl RemoteCatalog for SharedCatalogClient {
    fn fetch(&self) -> Result<Vec<Product>> {
        tokio::task::block_in_place(|| self.rt.block_on(self.fetch_async()))
    }
}
