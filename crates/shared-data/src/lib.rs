//! Shared data between services.
//!
//! A service exposes keyed data through a [`SharedDataProvider`] whose
//! [`SharedDataDescriptor`] lists the keys it answers to. Other services
//! reach providers through the [`SharedDataExchange`]:
//!
//! - [`SharedDataExchange::query`] is all-or-nothing: one unknown key fails
//!   the call.
//! - [`SharedDataExchange::subscribe`] answers per key: unknown or already
//!   subscribed keys fail on their own, the others get a [`KeyStream`].

mod error;
mod publisher;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use auto_impl::auto_impl;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_primitives::ServiceName;
use tracing::debug;

pub use error::SharedDataError;
pub use publisher::{KeyPublisher, KeyStream};

/// Keys a provider serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedDataDescriptor {
    /// Keys answered by [`SharedDataProvider::query`].
    pub aggregated: BTreeSet<String>,
    /// Keys answered by [`SharedDataProvider::subscribe`].
    pub subscribable: BTreeSet<String>,
}

impl SharedDataDescriptor {
    pub fn new<A, S>(aggregated: A, subscribable: S) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            aggregated: aggregated.into_iter().map(Into::into).collect(),
            subscribable: subscribable.into_iter().map(Into::into).collect(),
        }
    }
}

/// Service side of the exchange.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait SharedDataProvider: Send + Sync + Debug {
    /// Must list exactly the keys the provider answers to.
    fn descriptor(&self) -> SharedDataDescriptor;

    /// Current values of `keys`. Keys the provider cannot answer are left
    /// out of the result.
    async fn query(
        &self,
        consumer: &str,
        keys: &[String],
    ) -> Result<BTreeMap<String, Bytes>, SharedDataError>;

    /// Open a stream of `key` for `consumer`, usually via [`KeyPublisher`].
    async fn subscribe(&self, consumer: &str, key: &str) -> Result<KeyStream, SharedDataError>;
}

/// Per-key results of [`SharedDataExchange::subscribe`].
pub type SubscribeResults = BTreeMap<String, Result<KeyStream, SharedDataError>>;

/// Providers by service name.
#[derive(Debug, Default)]
pub struct SharedDataExchange {
    providers: RwLock<HashMap<ServiceName, Arc<dyn SharedDataProvider>>>,
}

impl SharedDataExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider of `service`, replacing any previous one.
    pub fn register(&self, service: impl Into<ServiceName>, provider: Arc<dyn SharedDataProvider>) {
        let service = service.into();
        debug!(%service, "shared data provider registered");
        self.providers.write().insert(service, provider);
    }

    pub fn unregister(&self, service: &str) -> bool {
        self.providers.write().remove(service).is_some()
    }

    fn provider(&self, service: &str) -> Result<Arc<dyn SharedDataProvider>, SharedDataError> {
        self.providers
            .read()
            .get(service)
            .cloned()
            .ok_or_else(|| SharedDataError::ServiceNotFound(service.into()))
    }

    pub fn descriptor(&self, service: &str) -> Result<SharedDataDescriptor, SharedDataError> {
        Ok(self.provider(service)?.descriptor())
    }

    /// Values of every key in `keys`, or `KeyNotFound` naming the missing ones.
    pub async fn query<K: AsRef<str>>(
        &self,
        consumer: &str,
        service: &str,
        keys: &[K],
    ) -> Result<BTreeMap<String, Bytes>, SharedDataError> {
        let provider = self.provider(service)?;
        let descriptor = provider.descriptor();
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_owned()).collect();

        let unknown: Vec<&String> = keys
            .iter()
            .filter(|k| !descriptor.aggregated.contains(*k))
            .collect();
        if !unknown.is_empty() {
            return Err(SharedDataError::key_not_found(unknown.into_iter().cloned()));
        }

        let values = provider.query(consumer, &keys).await?;
        let missing: Vec<&String> = keys.iter().filter(|k| !values.contains_key(*k)).collect();
        if !missing.is_empty() {
            return Err(SharedDataError::key_not_found(missing.into_iter().cloned()));
        }
        Ok(values)
    }

    /// Subscribe `consumer` to each of `keys` independently.
    pub async fn subscribe<K: AsRef<str>>(
        &self,
        consumer: &str,
        service: &str,
        keys: &[K],
    ) -> Result<SubscribeResults, SharedDataError> {
        let provider = self.provider(service)?;
        let descriptor = provider.descriptor();

        let mut results = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if results.contains_key(key) {
                continue;
            }
            let result = if descriptor.subscribable.contains(key) {
                provider.subscribe(consumer, key).await
            } else {
                Err(SharedDataError::key_not_found([key]))
            };
            results.insert(key.to_owned(), result);
        }
        debug!(
            %consumer,
            %service,
            ok = results.values().filter(|r| r.is_ok()).count(),
            failed = results.values().filter(|r| r.is_err()).count(),
            "shared data subscribe"
        );
        Ok(results)
    }
}
