//! Catalog service client boundary
//!
//! The rest of the crate talks to the remote catalog through the
//! [`CatalogClient`] trait and the wire-level record types here; the HTTP
//! implementation lives in [`http`]. Conversion into model entities applies
//! the catalog's metadata fallbacks (placeholder names, zero sizes, DOI
//! assembly) so the model never sees raw optionals.

use crate::model::{Collection, Granule, PolyPoint};
use crate::query::{BoundingBox, DatasetQuery};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

pub mod http;

pub use http::HttpCatalogClient;

/// Errors from the catalog service boundary. Opaque to callers: every
/// variant is handled the same way (per-dataset skip with a warning).
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Transport-level failure reaching the service
    #[error("catalog network error: {0}")]
    Network(String),

    /// Service answered with a non-success status
    #[error("catalog http error: {0}")]
    Http(String),

    /// Response body could not be interpreted
    #[error("catalog response parse error: {0}")]
    Parse(String),
}

/// Abstract catalog query interface.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve a dataset query to its matching collections.
    async fn dataset_query(
        &self,
        query: &DatasetQuery,
    ) -> Result<Vec<CollectionRecord>, CatalogError>;

    /// Enumerate the granules of a collection matching the query's spatial
    /// and temporal criteria. Implementations must return an empty list with
    /// a warning when the service reports more hits than `page_size`; a
    /// truncated page must never be mistaken for a complete result.
    async fn granule_query(
        &self,
        collection_id: &str,
        query: &DatasetQuery,
        page_size: usize,
    ) -> Result<Vec<GranuleRecord>, CatalogError>;
}

/// Collection metadata as returned by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionRecord {
    /// Catalog collection id
    pub id: String,
    /// Dataset short name
    #[serde(default)]
    pub short_name: Option<String>,
    /// Archive center
    #[serde(default)]
    pub archive_center: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Coverage start datetime
    #[serde(default)]
    pub begin_date_time: Option<String>,
    /// Coverage end datetime
    #[serde(default)]
    pub end_date_time: Option<String>,
    /// DOI authority
    #[serde(default)]
    pub doi_authority: Option<String>,
    /// DOI name
    #[serde(default)]
    pub doi_name: Option<String>,
}

/// Granule metadata as returned by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct GranuleRecord {
    /// Catalog granule id
    pub id: String,
    /// Human-readable unit representation
    #[serde(default)]
    pub unit_representation: Option<String>,
    /// Size estimate in MB
    #[serde(default)]
    pub size_mb: Option<f64>,
    /// Coverage start datetime
    #[serde(default)]
    pub begin_date_time: Option<String>,
    /// Coverage end datetime
    #[serde(default)]
    pub end_date_time: Option<String>,
    /// Polygon vertices as (latitude, longitude) pairs
    #[serde(default)]
    pub polygon: Vec<(f64, f64)>,
    /// Bounding box as (west, south, east, north), when no polygon is given
    #[serde(default)]
    pub bounding_box: Option<(f64, f64, f64, f64)>,
    /// Download URLs; only the first is used
    #[serde(default)]
    pub access_urls: Vec<String>,
}

/// Strip a trailing `Z` so catalog datetimes match the naive local format
/// used everywhere else.
fn normalize_datetime(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim_end_matches('Z').to_string())
}

impl From<CollectionRecord> for Collection {
    fn from(record: CollectionRecord) -> Collection {
        let doi = format!(
            "{}/{}",
            record.doi_authority.as_deref().unwrap_or("NoDOIauth"),
            record.doi_name.as_deref().unwrap_or("NoDOI")
        );
        Collection::new(
            record.id,
            record.short_name.unwrap_or_else(|| "NoShortName".to_string()),
            record
                .archive_center
                .unwrap_or_else(|| "NoArchiveCenter".to_string()),
            record
                .description
                .unwrap_or_else(|| "NoDescription".to_string()),
            normalize_datetime(record.begin_date_time),
            normalize_datetime(record.end_date_time),
            doi,
        )
    }
}

impl From<GranuleRecord> for Granule {
    fn from(record: GranuleRecord) -> Granule {
        if record.access_urls.len() > 1 {
            warn!(
                granule = %record.id,
                urls = record.access_urls.len(),
                "granule has multiple access URLs, using the first"
            );
        }
        let access_url = record.access_urls.first().cloned().unwrap_or_default();
        let has_polygon = !record.polygon.is_empty();
        let bbox = match record.bounding_box {
            Some((west, south, east, north)) => BoundingBox {
                west,
                south,
                east,
                north,
            },
            None => BoundingBox::GLOBAL,
        };
        let mut granule = Granule::new(
            record.id,
            record
                .unit_representation
                .unwrap_or_else(|| "NoGranuleUR".to_string()),
            record.size_mb.unwrap_or(0.0),
            normalize_datetime(record.begin_date_time),
            normalize_datetime(record.end_date_time),
            has_polygon,
            bbox,
            access_url,
        );
        for (latitude, longitude) in record.polygon {
            granule.push_point(PolyPoint::new(latitude, longitude));
        }
        granule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_record_fallbacks() {
        let record = CollectionRecord {
            id: "C1".to_string(),
            short_name: None,
            archive_center: None,
            description: None,
            begin_date_time: Some("2000-02-24T00:00:00Z".to_string()),
            end_date_time: None,
            doi_authority: None,
            doi_name: Some("10.5067/TEST".to_string()),
        };
        let collection: Collection = record.into();
        assert_eq!(collection.short_name, "NoShortName");
        assert_eq!(collection.archive_center, "NoArchiveCenter");
        assert_eq!(collection.doi, "NoDOIauth/10.5067/TEST");
        assert_eq!(
            collection.begin_date_time.as_deref(),
            Some("2000-02-24T00:00:00")
        );
        assert!(collection.end_date_time.is_none());
    }

    #[test]
    fn test_granule_record_defaults_and_polygon() {
        let record = GranuleRecord {
            id: "G1".to_string(),
            unit_representation: None,
            size_mb: None,
            begin_date_time: None,
            end_date_time: None,
            polygon: vec![(45.0, -70.0), (46.0, -70.0)],
            bounding_box: None,
            access_urls: vec![
                "https://a.example/g1".to_string(),
                "https://b.example/g1".to_string(),
            ],
        };
        let granule: Granule = record.into();
        assert_eq!(granule.unit_representation, "NoGranuleUR");
        assert_eq!(granule.size_mb, 0.0);
        assert!(granule.has_polygon);
        assert_eq!(granule.polygon().len(), 2);
        assert_eq!(granule.access_url, "https://a.example/g1");
        assert_eq!(granule.bbox, BoundingBox::GLOBAL);
    }

    #[test]
    fn test_granule_record_empty_urls() {
        let record = GranuleRecord {
            id: "G1".to_string(),
            unit_representation: Some("g1.hdf".to_string()),
            size_mb: Some(12.5),
            begin_date_time: None,
            end_date_time: None,
            polygon: vec![],
            bounding_box: Some((-80.0, 40.0, -70.0, 46.0)),
            access_urls: vec![],
        };
        let granule: Granule = record.into();
        assert!(granule.access_url.is_empty());
        assert!(!granule.has_polygon);
        assert_eq!(granule.bbox.west, -80.0);
    }
}
