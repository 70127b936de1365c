//! The store client: block fetches with redirect chasing and bounded
//! retry of transient failures.

use bytes::Bytes;
use tracing::debug;

use upspin_core::{
    Config, Endpoint, Error, Fetched, Kind, Location, Reference, Result,
};

use crate::bind;

/// Backoff schedule for `Transient` store errors. Directory writes are
/// never retried: their sequence contract cannot tell a retry from a
/// concurrent writer.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_secs(2),
];

/// How many redirect rounds a single get will follow.
const MAX_REDIRECTS: usize = 4;

/// Store access for one client session.
#[derive(Clone)]
pub struct StoreClient {
    config: std::sync::Arc<Config>,
}

impl StoreClient {
    pub(crate) fn new(config: std::sync::Arc<Config>) -> Self {
        StoreClient { config }
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last = None;
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match call().await {
                Err(e) if e.is(Kind::Transient) => {
                    debug!("transient store error (attempt {}): {e}", attempt + 1);
                    last = Some(e);
                    tokio::time::sleep(*delay).await;
                }
                other => return other,
            }
        }
        match call().await {
            Err(e) if e.is(Kind::Transient) => Err(last.unwrap_or(e)),
            other => other,
        }
    }

    /// Deposits one block at the given store.
    pub async fn put(&self, endpoint: &Endpoint, block: Bytes) -> Result<Reference> {
        let server = bind::store_server(&self.config, endpoint)?;
        self.with_retry(|| {
            let server = server.clone();
            let block = block.clone();
            async move { server.put(block).await }
        })
        .await
    }

    /// Fetches one block, following redirects in order.
    pub async fn get(&self, location: &Location) -> Result<Bytes> {
        let mut candidates = vec![location.clone()];
        for _ in 0..=MAX_REDIRECTS {
            let mut redirected = Vec::new();
            for location in &candidates {
                let server = match bind::store_server(&self.config, &location.endpoint) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("cannot reach store {}: {e}", location.endpoint);
                        continue;
                    }
                };
                let reference = location.reference.clone();
                let fetched = self
                    .with_retry(|| {
                        let server = server.clone();
                        let reference = reference.clone();
                        async move { server.get(&reference).await }
                    })
                    .await;
                match fetched {
                    Ok(Fetched::Bytes(bytes)) => return Ok(bytes),
                    Ok(Fetched::Redirect(locations)) => redirected.extend(locations),
                    Err(e) if e.is(Kind::NotExist) => continue,
                    Err(e) => return Err(e),
                }
            }
            if redirected.is_empty() {
                break;
            }
            candidates = redirected;
        }
        Err(Error::new(Kind::NotExist)
            .op("store.Get")
            .msg(format!("block {} not found at any location", location.reference)))
    }

    /// Removes one block. Physical deletion only; directory entries that
    /// reference the block are untouched.
    pub async fn delete(&self, endpoint: &Endpoint, reference: &Reference) -> Result<()> {
        let server = bind::store_server(&self.config, endpoint)?;
        self.with_retry(|| {
            let server = server.clone();
            let reference = reference.clone();
            async move { server.delete(&reference).await }
        })
        .await
    }
}
