//! Remote lookup service and the batching client built on it.

mod client;

use std::sync::Arc;

use async_trait::async_trait;
use oagr_core::{Identifier, LookupResult};

use crate::config::OagrConfig;
use crate::http::{HttpTransport, TransportError};

pub use client::{BatchClient, CycleReport};

/// Resolves one batch of identifiers.
///
/// Implementations return either a structured result or a transport error;
/// they never hand back partial JSON.
#[async_trait]
pub trait LookupService: Send + Sync {
    async fn lookup(&self, identifiers: &[Identifier]) -> Result<LookupResult, TransportError>;
}

#[async_trait]
impl<T: LookupService + ?Sized> LookupService for Arc<T> {
    async fn lookup(&self, identifiers: &[Identifier]) -> Result<LookupResult, TransportError> {
        (**self).lookup(identifiers).await
    }
}

/// `POST <url>` with a JSON array of identifiers.
#[derive(Debug, Clone)]
pub struct HttpLookup {
    url: String,
    transport: HttpTransport,
}

impl HttpLookup {
    pub fn new(url: impl Into<String>, transport: HttpTransport) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    pub fn from_config(config: &OagrConfig) -> Result<Self, TransportError> {
        Ok(Self::new(
            config.lookup_url.clone(),
            HttpTransport::new(config.http.clone())?,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LookupService for HttpLookup {
    async fn lookup(&self, identifiers: &[Identifier]) -> Result<LookupResult, TransportError> {
        self.transport.post_json(&self.url, identifiers).await
    }
}
