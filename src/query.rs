//! Dataset query construction
//!
//! Turns the dataset specifications of a download request into catalog query
//! descriptors. Recurring temporal criteria (a month/day window repeated over
//! a span of years) are normalized here into the day-of-year envelope the
//! catalog service expects; all criteria validation lives here too, so the
//! rest of the pipeline only ever sees well-formed queries.

use crate::request::{
    BoundingBoxSpec, DatasetSpec, DownloadRequest, RecurringEdgeSpec, RequestError, TemporalSpec,
};
use chrono::{Datelike, NaiveDate};
use tracing::debug;

/// Spatial bounding box, west/south/east/north in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// West boundary
    pub west: f64,
    /// South boundary
    pub south: f64,
    /// East boundary
    pub east: f64,
    /// North boundary
    pub north: f64,
}

impl BoundingBox {
    /// Whole-globe extent, the default when a dataset gives no spatial
    /// criteria.
    pub const GLOBAL: BoundingBox = BoundingBox {
        west: -180.0,
        south: -90.0,
        east: 180.0,
        north: 90.0,
    };
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

/// Normalized temporal criteria for one dataset query.
#[derive(Debug, Clone, PartialEq)]
pub enum TemporalQuery {
    /// Fixed start/end datetime window
    Static {
        /// Window start datetime
        start: String,
        /// Window end datetime
        end: String,
    },
    /// Yearly recurring window, normalized to a day-of-year envelope
    Recurring {
        /// Envelope start, `{yearStart}-01-01T{time}`
        start: String,
        /// Envelope end, `{yearEnd}-12-31T{time}`
        end: String,
        /// Minimum start day-of-year over the year range
        start_day: u32,
        /// Maximum end day-of-year over the year range
        end_day: u32,
    },
}

/// One fully-validated dataset query.
#[derive(Debug, Clone)]
pub struct DatasetQuery {
    /// Dataset short name
    pub short_name: String,
    /// Dataset version
    pub version: String,
    /// Spatial constraint
    pub bbox: BoundingBox,
    /// Temporal constraint
    pub temporal: TemporalQuery,
}

impl DatasetQuery {
    /// Full dataset query string,
    /// `?shortName=…&version=…&bounding_box=…&temporal=…`.
    pub fn query_string(&self) -> String {
        format!(
            "?shortName={}&version={}{}{}",
            self.short_name,
            self.version,
            self.spatial_param(),
            self.temporal_param()
        )
    }

    /// Spatial query parameter, `&bounding_box=w,s,e,n`.
    pub fn spatial_param(&self) -> String {
        format!("&bounding_box={}", self.bbox)
    }

    /// Temporal query parameter. Recurring queries carry the day-of-year
    /// envelope as a third and fourth component.
    pub fn temporal_param(&self) -> String {
        match &self.temporal {
            TemporalQuery::Static { start, end } => format!("&temporal={start},{end}"),
            TemporalQuery::Recurring {
                start,
                end,
                start_day,
                end_day,
            } => format!("&temporal={start},{end},{start_day},{end_day}"),
        }
    }
}

/// Validate every dataset specification in a request and build its queries.
///
/// Any invalid dataset aborts the whole request. A dataset with no bounding
/// box searches the whole globe; the temporal criteria are mandatory.
pub fn build_queries(request: &DownloadRequest) -> Result<Vec<DatasetQuery>, RequestError> {
    let mut queries = Vec::with_capacity(request.datasets.len());
    for spec in &request.datasets {
        let query = build_query(spec)?;
        debug!(query = %query.query_string(), "dataset query built");
        queries.push(query);
    }
    Ok(queries)
}

fn build_query(spec: &DatasetSpec) -> Result<DatasetQuery, RequestError> {
    let bbox = match &spec.bounding_box {
        Some(b) => validate_bbox(&spec.short_name, b)?,
        None => BoundingBox::GLOBAL,
    };

    let temporal = match &spec.temporal {
        Some(t) => validate_temporal(&spec.short_name, t)?,
        None => {
            return Err(RequestError::MissingCriteria {
                dataset: spec.short_name.clone(),
                criteria: "temporal",
            })
        }
    };

    Ok(DatasetQuery {
        short_name: spec.short_name.clone(),
        version: spec.version.clone().unwrap_or_default(),
        bbox,
        temporal,
    })
}

fn validate_bbox(dataset: &str, spec: &BoundingBoxSpec) -> Result<BoundingBox, RequestError> {
    match (spec.w, spec.s, spec.e, spec.n) {
        (Some(west), Some(south), Some(east), Some(north)) => Ok(BoundingBox {
            west,
            south,
            east,
            north,
        }),
        _ => Err(RequestError::InvalidCriteria {
            dataset: dataset.to_string(),
            reason: "bounding box requires all of w, s, e, n".to_string(),
        }),
    }
}

fn validate_temporal(dataset: &str, spec: &TemporalSpec) -> Result<TemporalQuery, RequestError> {
    match spec {
        TemporalSpec::Static {
            start_date_time,
            end_date_time,
        } => {
            let (Some(start), Some(end)) = (start_date_time, end_date_time) else {
                return Err(RequestError::MissingCriteria {
                    dataset: dataset.to_string(),
                    criteria: "static temporal start/end datetime",
                });
            };
            Ok(TemporalQuery::Static {
                start: start.clone(),
                end: end.clone(),
            })
        }
        TemporalSpec::Recurring {
            year_start,
            year_end,
            start,
            end,
        } => validate_recurring(dataset, *year_start, *year_end, start.as_ref(), end.as_ref()),
    }
}

fn validate_recurring(
    dataset: &str,
    year_start: Option<i32>,
    year_end: Option<i32>,
    start: Option<&RecurringEdgeSpec>,
    end: Option<&RecurringEdgeSpec>,
) -> Result<TemporalQuery, RequestError> {
    let invalid = |reason: String| RequestError::InvalidCriteria {
        dataset: dataset.to_string(),
        reason,
    };
    let missing = |criteria: &'static str| RequestError::MissingCriteria {
        dataset: dataset.to_string(),
        criteria,
    };

    let (Some(year_start), Some(year_end)) = (year_start, year_end) else {
        return Err(missing("recurring temporal year range"));
    };
    if year_start > year_end {
        return Err(invalid(format!(
            "recurring year range is reversed ({year_start} > {year_end})"
        )));
    }

    let start = start.ok_or_else(|| missing("recurring temporal start"))?;
    let end = end.ok_or_else(|| missing("recurring temporal end"))?;
    let (start_month, start_day, start_time) = validate_edge(dataset, "start", start)?;
    let (end_month, end_day, end_time) = validate_edge(dataset, "end", end)?;

    if start_month > end_month {
        return Err(invalid(format!(
            "recurring month range is reversed ({start_month} > {end_month})"
        )));
    }

    let start_doy = recurring_day_bounds(year_start, year_end, start_month, start_day)
        .map(|b| b.0)
        .ok_or_else(|| {
            invalid(format!(
                "recurring start {start_month:02}-{start_day:02} is not a date in any year of {year_start}-{year_end}"
            ))
        })?;
    let end_doy = recurring_day_bounds(year_start, year_end, end_month, end_day)
        .map(|b| b.1)
        .ok_or_else(|| {
            invalid(format!(
                "recurring end {end_month:02}-{end_day:02} is not a date in any year of {year_start}-{year_end}"
            ))
        })?;

    Ok(TemporalQuery::Recurring {
        start: format!("{year_start}-01-01T{start_time}"),
        end: format!("{year_end}-12-31T{end_time}"),
        start_day: start_doy,
        end_day: end_doy,
    })
}

fn validate_edge(
    dataset: &str,
    which: &str,
    edge: &RecurringEdgeSpec,
) -> Result<(u32, u32, String), RequestError> {
    let invalid = |reason: String| RequestError::InvalidCriteria {
        dataset: dataset.to_string(),
        reason,
    };

    let month = edge
        .month
        .ok_or_else(|| invalid(format!("recurring {which} month is missing")))?;
    let day = edge
        .day
        .ok_or_else(|| invalid(format!("recurring {which} day is missing")))?;
    if !(1..=12).contains(&month) {
        return Err(invalid(format!("recurring {which} month {month} not in 1-12")));
    }
    // Day is checked against 1-31 only; per-year calendar validity is handled
    // by the day-of-year scan, which skips years lacking the date.
    if !(1..=31).contains(&day) {
        return Err(invalid(format!("recurring {which} day {day} not in 1-31")));
    }
    let time = edge.time.clone().unwrap_or_else(|| "00:00:00".to_string());
    Ok((month, day, time))
}

/// Day-of-year extremes of a (month, day) pair over an inclusive year range:
/// `(min, max)` across the years in which the date exists. Feb 29 in a
/// non-leap year contributes nothing. `None` when the date exists in no year.
pub fn recurring_day_bounds(
    year_start: i32,
    year_end: i32,
    month: u32,
    day: u32,
) -> Option<(u32, u32)> {
    let mut bounds: Option<(u32, u32)> = None;
    for year in year_start..=year_end {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let doy = date.ordinal();
        bounds = Some(match bounds {
            Some((min, max)) => (min.min(doy), max.max(doy)),
            None => (doy, doy),
        });
    }
    bounds
}
