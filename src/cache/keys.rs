//! Request signatures and cache key normalization.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use url::Url;

use crate::config::NormalizationConfig;
use crate::error::{EngineError, Result};
use crate::http::Method;

/// Identity of a cached response: method plus normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
  pub method: Method,
  pub url: String,
}

impl RequestSignature {
  /// SHA256 of the signature for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestSignature {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Resolves request URLs against the origin and strips volatile parts.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
  origin: Url,
  ignored_params: BTreeSet<String>,
  ignore_query: bool,
}

impl KeyNormalizer {
  pub fn new(origin: &str, config: &NormalizationConfig) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| EngineError::InvalidRequest {
      message: format!("invalid origin {}: {}", origin, e),
    })?;

    Ok(Self {
      origin,
      ignored_params: config.ignored_query_params.clone(),
      ignore_query: config.ignore_query,
    })
  }

  /// Parse a request URL, resolving paths against the origin.
  pub fn resolve(&self, raw: &str) -> Result<Url> {
    self
      .origin
      .join(raw)
      .map_err(|e| EngineError::InvalidRequest {
        message: format!("invalid url {}: {}", raw, e),
      })
  }

  pub fn signature(&self, method: Method, raw: &str) -> Result<RequestSignature> {
    let url = self.normalize(self.resolve(raw)?);
    Ok(RequestSignature {
      method,
      url: url.to_string(),
    })
  }

  fn normalize(&self, mut url: Url) -> Url {
    url.set_fragment(None);

    if self.ignore_query {
      url.set_query(None);
      return url;
    }

    if url.query().is_none() || self.ignored_params.is_empty() {
      return url;
    }

    let kept: Vec<(String, String)> = url
      .query_pairs()
      .filter(|(k, _)| !self.ignored_params.contains(k.as_ref()))
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();

    if kept.is_empty() {
      url.set_query(None);
    } else {
      url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
  }
}
