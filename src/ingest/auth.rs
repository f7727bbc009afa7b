//! API-key authentication for ingest streams.
//!
//! Keys arrive in the `x-api-key` request metadata entry. An empty key list
//! disables authentication entirely, which is the development default.

use std::collections::HashSet;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// Metadata entry carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Validates ingest API keys from request metadata.
#[derive(Debug, Clone)]
pub struct ApiKeyAuthenticator {
    keys: HashSet<String>,
}

impl ApiKeyAuthenticator {
    /// Build an authenticator from the configured key list. Blank entries are
    /// ignored; an empty result disables authentication.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let keys: HashSet<String> = keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        if keys.is_empty() {
            tracing::info!("ingest authentication disabled (no API keys configured)");
        } else {
            tracing::info!(keys = keys.len(), "ingest authentication enabled");
        }

        ApiKeyAuthenticator { keys }
    }

    /// Whether any keys are configured
    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Validate the API key carried in `metadata`.
    pub fn authenticate(&self, metadata: &MetadataMap) -> Result<(), Status> {
        if !self.enabled() {
            return Ok(());
        }

        let key = metadata
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("missing API key"))?;

        if self.keys.contains(key) {
            Ok(())
        } else {
            Err(Status::permission_denied("invalid API key"))
        }
    }

    /// A tonic interceptor enforcing the key check on every call.
    pub fn interceptor(&self) -> impl tonic::service::Interceptor + Clone {
        let auth = self.clone();
        move |request: Request<()>| -> Result<Request<()>, Status> {
            auth.authenticate(request.metadata())?;
            Ok(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with_key(key: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(API_KEY_HEADER, key.parse().unwrap());
        metadata
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let auth = ApiKeyAuthenticator::new(Vec::new());
        assert!(!auth.enabled());
        assert!(auth.authenticate(&MetadataMap::new()).is_ok());
        assert!(auth.authenticate(&metadata_with_key("anything")).is_ok());
    }

    #[test]
    fn test_missing_key_is_unauthenticated() {
        let auth = ApiKeyAuthenticator::new(vec!["secret".to_string()]);
        let err = auth.authenticate(&MetadataMap::new()).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_wrong_key_is_permission_denied() {
        let auth = ApiKeyAuthenticator::new(vec!["secret".to_string()]);
        let err = auth.authenticate(&metadata_with_key("wrong")).unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn test_valid_key_passes() {
        let auth = ApiKeyAuthenticator::new(vec!["secret".to_string(), "other".to_string()]);
        assert!(auth.authenticate(&metadata_with_key("secret")).is_ok());
        assert!(auth.authenticate(&metadata_with_key("other")).is_ok());
    }

    #[test]
    fn test_blank_entries_ignored() {
        let auth = ApiKeyAuthenticator::new(vec!["  ".to_string(), String::new()]);
        assert!(!auth.enabled());
    }
}
