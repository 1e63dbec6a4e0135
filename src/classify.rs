//! Mapping of GET requests to resource classes.

use regex::Regex;
use std::collections::BTreeSet;
use url::Url;

use crate::config::ClassifierConfig;
use crate::error::{EngineError, Result};
use crate::http::Request;

/// Resource class of a GET request; selects the caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
  /// Build-versioned assets: cache-first
  Static,
  /// Data endpoints: network-first, empty offline payload on miss
  Api,
  /// Application routes: network-first, offline document on miss
  Page,
  /// Everything else: cache-first into the dynamic partition
  Other,
}

/// Pure, deterministic classifier built once from configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
  static_extensions: BTreeSet<String>,
  api_prefix: String,
  data_endpoints: Vec<Regex>,
  page_routes: Vec<String>,
}

impl Classifier {
  pub fn new(config: &ClassifierConfig) -> Result<Self> {
    let data_endpoints = config
      .data_endpoints
      .iter()
      .map(|pattern| {
        Regex::new(pattern).map_err(|e| EngineError::InvalidRequest {
          message: format!("invalid data endpoint pattern {}: {}", pattern, e),
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      static_extensions: config.static_extensions.clone(),
      api_prefix: config.api_prefix.clone(),
      data_endpoints,
      page_routes: config.page_routes.clone(),
    })
  }

  /// Classify a request whose URL has already been resolved.
  pub fn classify(&self, request: &Request, url: &Url) -> ResourceClass {
    let path = url.path();

    if request.destination.is_asset() || self.has_static_extension(path) {
      return ResourceClass::Static;
    }

    if path.starts_with(&self.api_prefix) || self.data_endpoints.iter().any(|re| re.is_match(path))
    {
      return ResourceClass::Api;
    }

    if path == "/" || self.page_routes.iter().any(|route| path.starts_with(route)) {
      return ResourceClass::Page;
    }

    ResourceClass::Other
  }

  fn has_static_extension(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => {
        self.static_extensions.contains(&ext.to_ascii_lowercase())
      }
      _ => false,
    }
  }
}
