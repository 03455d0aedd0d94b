use strata_primitives::ServiceName;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SharedDataError {
    #[error("keys not found: {}", .0.join(", "))]
    KeyNotFound(Vec<String>),
    #[error("{consumer} already subscribed to {key}")]
    AlreadySubscribed { consumer: String, key: String },
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceName),
}

impl SharedDataError {
    pub fn key_not_found<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::KeyNotFound(keys.into_iter().map(Into::into).collect())
    }
}
