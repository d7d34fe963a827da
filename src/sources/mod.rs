//! Static registry of mirrored sources.
//!
//! Every configured slug maps to a [`RegisteredSource`]: its settings plus the
//! [`SourceDescriptor`] of its [`SourceKind`], which fixes the fetch mode,
//! how to read an item's index and date, and how to present a cached item.
//! The registry is built and validated once at startup; unknown slugs are an
//! explicit [`RegistryError::UnknownSource`].

mod comics;
mod launches;
mod view;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{Config, SourceSettings};
use crate::storage::{CacheEntry, SourceSeed};
use crate::util::{join_path, validate_base_url, UrlValidationError};

pub use view::ItemView;
pub(crate) use view::parse_index;

/// Placeholder replaced by the item index in templated item paths.
pub const INDEX_PLACEHOLDER: &str = "{index}";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} is an invalid source")]
    UnknownSource(String),

    #[error("Source '{slug}' has an invalid base URL: {source}")]
    InvalidBaseUrl {
        slug: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("Source '{0}' item_path must contain {{index}}")]
    MissingIndexPlaceholder(String),

    #[error("Source '{0}' batch_size must be greater than zero")]
    ZeroBatchSize(String),
}

/// How a source exposes its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One request per missing index, built from an `{index}` path template.
    TemplatedPerIndex,
    /// One request per offset/limit window, each returning an array of items.
    PaginatedRange,
}

/// Kind of remote API a configured source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Comics,
    Launches,
}

impl SourceKind {
    pub fn descriptor(self) -> &'static SourceDescriptor {
        match self {
            SourceKind::Comics => &comics::DESCRIPTOR,
            SourceKind::Launches => &launches::DESCRIPTOR,
        }
    }
}

/// Extraction and presentation rules for one [`SourceKind`].
pub struct SourceDescriptor {
    pub fetch_mode: FetchMode,
    /// Top-level field carrying the item index, in items and in the
    /// latest-index document alike
    pub index_field: &'static str,
    pub default_batch_size: usize,
    date_of: fn(&Value) -> Option<NaiveDate>,
    view_of: fn(&CacheEntry) -> ItemView,
}

impl SourceDescriptor {
    pub fn index_of(&self, item: &Value) -> Option<i64> {
        item.get(self.index_field).and_then(parse_index)
    }

    pub fn date_of(&self, item: &Value) -> Option<NaiveDate> {
        (self.date_of)(item)
    }

    pub fn view(&self, entry: &CacheEntry) -> ItemView {
        (self.view_of)(entry)
    }

    /// Remote latest index from the latest-index document.
    ///
    /// Some APIs answer with a one-element array instead of an object; the
    /// last element is used then.
    pub fn latest_index_of(&self, document: &Value) -> Option<i64> {
        match document {
            Value::Array(items) => items.last().and_then(|item| self.index_of(item)),
            other => self.index_of(other),
        }
    }
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("fetch_mode", &self.fetch_mode)
            .field("index_field", &self.index_field)
            .field("default_batch_size", &self.default_batch_size)
            .finish_non_exhaustive()
    }
}

/// A validated, configured source.
#[derive(Debug, Clone)]
pub struct RegisteredSource {
    pub slug: String,
    pub name: String,
    pub descriptor: &'static SourceDescriptor,
    base_url: Url,
    item_path: String,
    index_path: String,
    query: BTreeMap<String, String>,
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub cycle_timeout: Duration,
    pub default_limit: u32,
}

impl RegisteredSource {
    fn from_settings(slug: &str, settings: &SourceSettings) -> Result<Self, RegistryError> {
        let descriptor = settings.kind.descriptor();
        let base_url =
            validate_base_url(&settings.base_url).map_err(|source| RegistryError::InvalidBaseUrl {
                slug: slug.to_string(),
                source,
            })?;

        if descriptor.fetch_mode == FetchMode::TemplatedPerIndex
            && !settings.item_path.contains(INDEX_PLACEHOLDER)
        {
            return Err(RegistryError::MissingIndexPlaceholder(slug.to_string()));
        }

        let batch_size = settings
            .batch_size
            .unwrap_or(descriptor.default_batch_size);
        if batch_size == 0 {
            return Err(RegistryError::ZeroBatchSize(slug.to_string()));
        }

        Ok(Self {
            slug: slug.to_string(),
            name: settings.name.clone(),
            descriptor,
            base_url,
            item_path: settings.item_path.clone(),
            index_path: settings.index_path.clone(),
            query: settings.query.clone(),
            batch_size,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            cycle_timeout: Duration::from_secs(settings.cycle_timeout_secs),
            default_limit: settings.default_limit,
        })
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.descriptor.fetch_mode
    }

    /// URL of the document carrying the remote latest index.
    pub fn latest_index_url(&self) -> String {
        join_path(self.base_url.as_str(), &self.index_path)
    }

    /// URL of a single item (templated sources).
    pub fn item_url(&self, index: i64) -> String {
        let path = self
            .item_path
            .replace(INDEX_PLACEHOLDER, &index.to_string());
        join_path(self.base_url.as_str(), &path)
    }

    /// URL of one `offset`/`limit` window (paginated sources), followed by
    /// the configured static query parameters.
    pub fn window_url(&self, offset: i64, limit: usize) -> String {
        let joined = join_path(self.base_url.as_str(), &self.item_path);
        match Url::parse(&joined) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("offset", &offset.to_string())
                    .append_pair("limit", &limit.to_string())
                    .extend_pairs(self.query.iter());
                url.to_string()
            }
            // base_url is validated, so only a malformed item_path lands here
            Err(_) => format!("{joined}?offset={offset}&limit={limit}"),
        }
    }
}

/// Mapping from slug to validated source, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, RegisteredSource>,
}

impl SourceRegistry {
    /// Validate every configured source.
    ///
    /// # Errors
    ///
    /// The first invalid source aborts construction.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut sources = BTreeMap::new();
        for (slug, settings) in &config.sources {
            let registered = RegisteredSource::from_settings(slug, settings)?;
            tracing::debug!(
                source = %slug,
                kind = ?settings.kind,
                batch_size = registered.batch_size,
                "Registered source"
            );
            sources.insert(slug.clone(), registered);
        }
        Ok(Self { sources })
    }

    pub fn get(&self, slug: &str) -> Result<&RegisteredSource, RegistryError> {
        self.sources
            .get(slug)
            .ok_or_else(|| RegistryError::UnknownSource(slug.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Rows to seed into the `sources` table.
    pub fn seeds(&self) -> Vec<SourceSeed> {
        self.sources
            .values()
            .map(|s| SourceSeed {
                slug: s.slug.clone(),
                name: s.name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SourceRegistry {
        SourceRegistry::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_default_registry_has_both_sources() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("comics").unwrap().fetch_mode(),
            FetchMode::TemplatedPerIndex
        );
        assert_eq!(
            registry.get("space").unwrap().fetch_mode(),
            FetchMode::PaginatedRange
        );
    }

    #[test]
    fn test_unknown_source() {
        let err = registry().get("weather").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownSource(ref s) if s == "weather"));
        assert_eq!(err.to_string(), "weather is an invalid source");
    }

    #[test]
    fn test_comics_urls() {
        let registry = registry();
        let comics = registry.get("comics").unwrap();
        assert_eq!(comics.latest_index_url(), "https://xkcd.com/info.0.json");
        assert_eq!(comics.item_url(353), "https://xkcd.com/353/info.0.json");
        assert_eq!(comics.batch_size, 20);
    }

    #[test]
    fn test_space_window_url_carries_filter() {
        let registry = registry();
        let space = registry.get("space").unwrap();
        assert_eq!(
            space.latest_index_url(),
            "https://api.spacexdata.com/v3/launches/latest"
        );
        let url = Url::parse(&space.window_url(20, 10)).unwrap();
        assert_eq!(url.path(), "/v3/launches");
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["offset"], "20");
        assert_eq!(pairs["limit"], "10");
        assert!(pairs["filter"].contains("flight_number"));
    }

    #[test]
    fn test_templated_source_requires_placeholder() {
        let mut config = Config::default();
        config.sources.get_mut("comics").unwrap().item_path = "/info.0.json".into();
        let err = SourceRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, RegistryError::MissingIndexPlaceholder(_)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = Config::default();
        config.sources.get_mut("space").unwrap().base_url = "ftp://api.example.com".into();
        let err = SourceRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.sources.get_mut("space").unwrap().batch_size = Some(0);
        let err = SourceRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, RegistryError::ZeroBatchSize(_)));
    }

    #[test]
    fn test_latest_index_from_object_or_array() {
        let comics = SourceKind::Comics.descriptor();
        assert_eq!(comics.latest_index_of(&json!({ "num": 2200 })), Some(2200));
        assert_eq!(comics.latest_index_of(&json!({ "num": "2200" })), Some(2200));
        assert_eq!(comics.latest_index_of(&json!({ "title": "x" })), None);

        let launches = SourceKind::Launches.descriptor();
        assert_eq!(
            launches.latest_index_of(&json!([{ "flight_number": 3 }, { "flight_number": 4 }])),
            Some(4)
        );
        assert_eq!(launches.latest_index_of(&json!([])), None);
    }

    #[test]
    fn test_seeds_match_registry() {
        let seeds = registry().seeds();
        let slugs: Vec<&str> = seeds.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["comics", "space"]);
        assert_eq!(seeds[0].name, "XKCD");
    }
}
