//! Core domain model, scoring heuristic, and geospatial query planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "upside-core";

/// Default market vacancy assumption (percent) when no market signal is known.
pub const MARKET_VACANCY_DEFAULT: f64 = 10.0;

/// Mean Earth radius in miles, used for great-circle distance.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Approximate miles spanned by one degree of latitude.
pub const MILES_PER_DEGREE_LAT: f64 = 69.0;

/// Default result limit for property searches.
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Canonical persisted property record.
///
/// `price_per_sqft` is always derived from `price / sqft` at read time;
/// it is never an independent stored truth. `distance` is populated only
/// when a search carried an origin point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: i32,
    pub external_id: Option<String>,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub latitude: f64,
    pub longitude: f64,
    pub price: f64,
    pub sqft: i32,
    pub price_per_sqft: f64,
    pub vacancy_rate: Option<f64>,
    pub cap_rate: Option<f64>,
    pub upside_score: i32,
    pub property_type: String,
    pub year_built: Option<i32>,
    pub lot_size: Option<f64>,
    pub tenant_count: Option<i32>,
    pub listing_url: Option<String>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub google_place_id: Option<String>,
    pub google_rating: Option<f64>,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub distance: Option<f64>,
}

impl Property {
    pub fn recompute_price_per_sqft(&mut self) {
        self.price_per_sqft = price_per_sqft(self.price, self.sqft);
    }
}

/// Normalizer output: a canonical-shape record before persistence.
///
/// Unknown numerics stay `None`; the normalizer never synthesizes
/// placeholder values for fields a source did not provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDraft {
    pub external_id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Option<f64>,
    pub sqft: Option<i32>,
    pub vacancy_rate: Option<f64>,
    pub cap_rate: Option<f64>,
    pub property_type: String,
    pub year_built: Option<i32>,
    pub lot_size: Option<f64>,
    pub tenant_count: Option<i32>,
    pub listing_url: Option<String>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub google_place_id: Option<String>,
    pub google_rating: Option<f64>,
    pub source: String,
}

impl PropertyDraft {
    /// Derived price-per-square-foot, zero-safe.
    pub fn price_per_sqft(&self) -> f64 {
        price_per_sqft(self.price.unwrap_or(0.0), self.sqft.unwrap_or(0))
    }

    /// Upside score for this draft, treating absent inputs as zero and
    /// the market vacancy as the documented default.
    pub fn upside_score(&self) -> i32 {
        upside_score(
            self.vacancy_rate.unwrap_or(0.0),
            self.cap_rate.unwrap_or(0.0),
            self.price_per_sqft(),
            MARKET_VACANCY_DEFAULT,
        )
    }
}

pub fn price_per_sqft(price: f64, sqft: i32) -> f64 {
    if price > 0.0 && sqft > 0 {
        price / sqft as f64
    } else {
        0.0
    }
}

/// Investment-opportunity score in `[0, 100]`.
///
/// Additive heuristic over a base of 50:
/// - +20 when vacancy sits in the open interval (5, 40) — there is space
///   to fill, but the property is neither dead nor fully leased.
/// - up to +20 as the property's vacancy undercuts the market rate.
/// - up to +15 for cap rates above 7.
/// - +10 for a price per square foot under 150.
///
/// Pure function of its four inputs; callers with no market signal pass
/// [`MARKET_VACANCY_DEFAULT`].
pub fn upside_score(vacancy_rate: f64, cap_rate: f64, price_per_sqft: f64, market_vacancy: f64) -> i32 {
    let mut score = 50.0;

    if vacancy_rate > 5.0 && vacancy_rate < 40.0 {
        score += 20.0;
    }

    let vacancy_delta = market_vacancy - vacancy_rate;
    if vacancy_delta > 0.0 {
        score += (vacancy_delta * 2.0).min(20.0);
    }

    if cap_rate > 7.0 {
        score += ((cap_rate - 7.0) * 5.0).min(15.0);
    }

    if price_per_sqft > 0.0 && price_per_sqft < 150.0 {
        score += 10.0;
    }

    (score.round() as i32).clamp(0, 100)
}

/// Lifecycle states for an ingestion job.
///
/// Jobs move `Pending -> Running -> Completed | Failed`; the two terminal
/// states are never left once entered and there are no automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Persisted record of one ingestion invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperJob {
    pub id: i32,
    pub job_id: uuid::Uuid,
    pub source: String,
    pub location: Option<String>,
    pub radius_miles: Option<i32>,
    pub status: JobStatus,
    pub properties_found: i32,
    pub properties_added: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Rectangular search area, south-west and north-east corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
}

impl BoundingBox {
    /// Coarse box around `center` that fully contains a circle of
    /// `radius_miles`. Longitude degrees shrink with latitude, so the
    /// longitudinal half-width is scaled by `cos(lat)`.
    pub fn around(center: LatLng, radius_miles: f64) -> Self {
        let lat_delta = radius_miles / MILES_PER_DEGREE_LAT;
        let lng_scale = center.lat.to_radians().cos().abs().max(1e-6);
        let lng_delta = radius_miles / (MILES_PER_DEGREE_LAT * lng_scale);
        Self {
            sw_lat: center.lat - lat_delta,
            sw_lng: center.lng - lng_delta,
            ne_lat: center.lat + lat_delta,
            ne_lng: center.lng + lng_delta,
        }
    }

    pub fn contains(&self, point: LatLng) -> bool {
        point.lat >= self.sw_lat
            && point.lat <= self.ne_lat
            && point.lng >= self.sw_lng
            && point.lng <= self.ne_lng
    }
}

/// Great-circle distance between two points, in miles.
pub fn haversine_miles(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().asin()
}

/// Sort order for property searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    UpsideScore,
    Price,
    CapRate,
    Vacancy,
    Distance,
}

impl SortKey {
    /// Lenient parse accepting both snake_case and camelCase spellings.
    /// Unknown keys fall back to the default ranking.
    pub fn parse(input: &str) -> Self {
        match input {
            "price" => SortKey::Price,
            "cap_rate" | "capRate" => SortKey::CapRate,
            "vacancy" | "vacancy_rate" | "vacancyRate" => SortKey::Vacancy,
            "distance" => SortKey::Distance,
            _ => SortKey::UpsideScore,
        }
    }
}

/// Filter criteria for a property search. Absent keys mean "no
/// constraint", never "zero". All present filters compose with AND
/// semantics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyFilters {
    pub city: Option<String>,
    pub state: Option<String>,
    pub min_upside_score: Option<f64>,
    pub min_cap_rate: Option<f64>,
    pub min_vacancy: Option<f64>,
    pub max_vacancy: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub bounds: Option<BoundingBox>,
    pub origin: Option<LatLng>,
    pub radius_miles: Option<f64>,
    pub sort: SortKey,
    pub limit: Option<i64>,
}

/// Executable query plan: the coarse SQL-stage constraints plus the exact
/// in-layer post-filter parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub city: Option<String>,
    pub state: Option<String>,
    pub min_upside_score: Option<f64>,
    pub min_cap_rate: Option<f64>,
    pub min_vacancy: Option<f64>,
    pub max_vacancy: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Coarse pre-filter: explicit bounds, or a box derived from the
    /// requested radius.
    pub bbox: Option<BoundingBox>,
    /// Origin for distance attachment and exact radius filtering.
    pub origin: Option<LatLng>,
    pub radius_miles: Option<f64>,
    pub sort: SortKey,
    pub limit: i64,
}

impl QueryPlan {
    pub fn from_filters(filters: &PropertyFilters) -> Self {
        let bbox = filters.bounds.or_else(|| {
            match (filters.origin, filters.radius_miles) {
                (Some(origin), Some(radius)) if radius > 0.0 => {
                    Some(BoundingBox::around(origin, radius))
                }
                _ => None,
            }
        });

        // Distance ordering is meaningless without an origin; fall back to
        // the default ranking instead of erroring.
        let sort = if filters.sort == SortKey::Distance && filters.origin.is_none() {
            SortKey::UpsideScore
        } else {
            filters.sort
        };

        Self {
            city: filters.city.clone(),
            state: filters.state.clone(),
            min_upside_score: filters.min_upside_score,
            min_cap_rate: filters.min_cap_rate,
            min_vacancy: filters.min_vacancy,
            max_vacancy: filters.max_vacancy,
            min_price: filters.min_price,
            max_price: filters.max_price,
            bbox,
            origin: filters.origin,
            radius_miles: filters.radius_miles.filter(|r| *r > 0.0),
            sort,
            limit: filters.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_QUERY_LIMIT),
        }
    }

    /// Exact post-filter stage: attach haversine distances, discard
    /// candidates outside the true radius, apply distance ordering, and
    /// enforce the row limit. Rows arrive already ordered by the SQL
    /// stage for every non-distance sort key.
    pub fn finalize(&self, mut rows: Vec<Property>) -> Vec<Property> {
        if let Some(origin) = self.origin {
            for row in &mut rows {
                row.distance = Some(haversine_miles(
                    origin,
                    LatLng {
                        lat: row.latitude,
                        lng: row.longitude,
                    },
                ));
            }
            if let Some(radius) = self.radius_miles {
                rows.retain(|r| r.distance.map(|d| d <= radius).unwrap_or(false));
            }
            if self.sort == SortKey::Distance {
                // Null distances sort last, like every other ordering.
                rows.sort_by(|a, b| match (a.distance, b.distance) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
        }
        rows.truncate(self.limit as usize);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mk_property(id: i32, lat: f64, lng: f64) -> Property {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().unwrap();
        Property {
            id,
            external_id: Some(format!("test-{id}")),
            name: format!("Property {id}"),
            address: "100 Main St".into(),
            city: "Denver".into(),
            state: "CO".into(),
            zip: "80202".into(),
            latitude: lat,
            longitude: lng,
            price: 1_000_000.0,
            sqft: 10_000,
            price_per_sqft: 100.0,
            vacancy_rate: Some(12.0),
            cap_rate: Some(7.5),
            upside_score: 80,
            property_type: "strip-center".into(),
            year_built: Some(1998),
            lot_size: Some(2.5),
            tenant_count: Some(6),
            listing_url: None,
            image_url: None,
            images: vec![],
            google_place_id: None,
            google_rating: None,
            source: "test".into(),
            scraped_at: ts,
            created_at: ts,
            updated_at: ts,
            distance: None,
        }
    }

    #[test]
    fn vacancy_sweet_spot_scores_at_least_70() {
        for v in [6.0, 10.0, 15.0, 25.0, 39.0] {
            assert!(
                upside_score(v, 0.0, 0.0, MARKET_VACANCY_DEFAULT) >= 70,
                "vacancy {v} should earn the fill bonus"
            );
        }
    }

    #[test]
    fn dead_and_distressed_properties_get_no_vacancy_bonus() {
        assert_eq!(upside_score(0.0, 0.0, 0.0, MARKET_VACANCY_DEFAULT), 70); // delta bonus only
        assert_eq!(upside_score(5.0, 0.0, 0.0, MARKET_VACANCY_DEFAULT), 60);
        assert_eq!(upside_score(40.0, 0.0, 0.0, MARKET_VACANCY_DEFAULT), 50);
        assert_eq!(upside_score(95.0, 0.0, 0.0, MARKET_VACANCY_DEFAULT), 50);
    }

    #[test]
    fn score_is_monotonic_in_market_delta_up_to_cap() {
        let fixed_vacancy = 8.0;
        let mut last = 0;
        for market in [8.0, 10.0, 12.0, 15.0, 18.0, 30.0, 60.0] {
            let s = upside_score(fixed_vacancy, 0.0, 0.0, market);
            assert!(s >= last, "score should not decrease as market vacancy rises");
            last = s;
        }
        // Delta bonus caps at +20.
        assert_eq!(
            upside_score(fixed_vacancy, 0.0, 0.0, 30.0),
            upside_score(fixed_vacancy, 0.0, 0.0, 60.0)
        );
    }

    #[test]
    fn score_is_clamped_for_extreme_inputs() {
        for (v, c, p) in [
            (-50.0, -10.0, -5.0),
            (1e9, 1e9, 1e9),
            (12.0, 50.0, 1.0),
            (f64::MAX, f64::MIN, 0.0),
        ] {
            let s = upside_score(v, c, p, MARKET_VACANCY_DEFAULT);
            assert!((0..=100).contains(&s), "score {s} out of range for ({v}, {c}, {p})");
        }
    }

    #[test]
    fn cap_rate_and_price_bonuses_stack() {
        // 50 base + 20 vacancy + 16 delta-capped... delta = 10 - 12 < 0, no delta bonus.
        // cap 9 -> +10, ppsf 120 -> +10.
        assert_eq!(upside_score(12.0, 9.0, 120.0, 10.0), 90);
        // cap bonus caps at +15 even for absurd cap rates.
        assert_eq!(upside_score(12.0, 50.0, 120.0, 10.0), 95);
    }

    #[test]
    fn price_per_sqft_is_zero_safe() {
        assert_eq!(price_per_sqft(0.0, 1000), 0.0);
        assert_eq!(price_per_sqft(500_000.0, 0), 0.0);
        assert_eq!(price_per_sqft(500_000.0, 5_000), 100.0);
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_self() {
        let ny = LatLng { lat: 40.7128, lng: -74.0060 };
        let la = LatLng { lat: 34.0522, lng: -118.2437 };
        assert_eq!(haversine_miles(ny, ny), 0.0);
        let ab = haversine_miles(ny, la);
        let ba = haversine_miles(la, ny);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn haversine_new_york_to_los_angeles() {
        let ny = LatLng { lat: 40.7128, lng: -74.0060 };
        let la = LatLng { lat: 34.0522, lng: -118.2437 };
        let d = haversine_miles(ny, la);
        assert!((d - 2445.0).abs() < 20.0, "NY-LA distance was {d}");
    }

    #[test]
    fn radius_results_are_subset_of_bounding_box_prefilter() {
        let center = LatLng { lat: 39.7392, lng: -104.9903 };
        let radius = 10.0;
        let bbox = BoundingBox::around(center, radius);

        let candidates: Vec<LatLng> = (0..40)
            .map(|i| LatLng {
                lat: center.lat + (i as f64 - 20.0) * 0.02,
                lng: center.lng + (i as f64 - 20.0) * 0.025,
            })
            .collect();

        for p in candidates {
            if haversine_miles(center, p) <= radius {
                assert!(bbox.contains(p), "in-radius point must be inside the coarse box");
            }
        }
    }

    #[test]
    fn plan_derives_bbox_from_radius() {
        let filters = PropertyFilters {
            origin: Some(LatLng { lat: 39.7392, lng: -104.9903 }),
            radius_miles: Some(25.0),
            ..Default::default()
        };
        let plan = QueryPlan::from_filters(&filters);
        let bbox = plan.bbox.expect("radius search derives a coarse box");
        assert!(bbox.sw_lat < 39.7392 && bbox.ne_lat > 39.7392);
        // Longitude half-width exceeds latitude half-width away from the equator.
        assert!((bbox.ne_lng - bbox.sw_lng) > (bbox.ne_lat - bbox.sw_lat));
    }

    #[test]
    fn distance_sort_without_origin_falls_back_to_upside() {
        let filters = PropertyFilters {
            sort: SortKey::Distance,
            ..Default::default()
        };
        let plan = QueryPlan::from_filters(&filters);
        assert_eq!(plan.sort, SortKey::UpsideScore);
    }

    #[test]
    fn finalize_attaches_distance_and_enforces_radius() {
        let origin = LatLng { lat: 39.7392, lng: -104.9903 };
        let filters = PropertyFilters {
            origin: Some(origin),
            radius_miles: Some(15.0),
            sort: SortKey::Distance,
            ..Default::default()
        };
        let plan = QueryPlan::from_filters(&filters);

        let rows = vec![
            mk_property(1, 39.75, -104.99),   // ~0.7 mi
            mk_property(2, 39.85, -104.85),   // ~11 mi
            mk_property(3, 40.50, -104.00),   // far outside
        ];
        let out = plan.finalize(rows);
        assert_eq!(out.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        for p in &out {
            let d = p.distance.expect("distance attached for origin searches");
            assert!(d <= 15.0);
        }
        assert!(out[0].distance.unwrap() <= out[1].distance.unwrap());
    }

    #[test]
    fn finalize_truncates_to_limit() {
        let filters = PropertyFilters {
            limit: Some(2),
            ..Default::default()
        };
        let plan = QueryPlan::from_filters(&filters);
        let rows = vec![
            mk_property(1, 39.7, -104.9),
            mk_property(2, 39.7, -104.9),
            mk_property(3, 39.7, -104.9),
        ];
        assert_eq!(plan.finalize(rows).len(), 2);
    }

    #[test]
    fn sort_key_parses_both_spellings() {
        assert_eq!(SortKey::parse("cap_rate"), SortKey::CapRate);
        assert_eq!(SortKey::parse("capRate"), SortKey::CapRate);
        assert_eq!(SortKey::parse("price"), SortKey::Price);
        assert_eq!(SortKey::parse("bogus"), SortKey::UpsideScore);
    }
}
