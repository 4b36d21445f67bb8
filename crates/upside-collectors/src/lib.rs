//! Source collectors + the record normalizer.
//!
//! Each collector yields best-effort [`SourceRecord`]s from one external
//! origin; listing-page markup drift produces an empty set, never an
//! error for the whole ingestion job. The [`Normalizer`] maps every
//! source shape into the canonical [`PropertyDraft`].

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use upside_core::{LatLng, PropertyDraft};
use upside_storage::{FetchError, HttpFetcher};
use uuid::Uuid;

pub const CRATE_NAME: &str = "upside-collectors";

/// Listing cap per collector run, to stay polite with upstream sites
/// and the geocoder.
pub const MAX_LISTINGS_PER_RUN: usize = 20;

/// Place types queried for retail inventory.
pub const RETAIL_PLACE_TYPES: [&str; 4] =
    ["shopping_mall", "department_store", "store", "supermarket"];

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Raw card scraped from a listing search page; all fields are the
/// free-text strings the DOM carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedListing {
    pub name: String,
    pub address: String,
    pub price: String,
    pub sqft: String,
    pub cap_rate: String,
    pub listing_url: String,
    pub image_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source: String,
}

/// One result from the nearby-places API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub types: Vec<String>,
    pub rating: Option<f64>,
    pub photo_urls: Vec<String>,
}

/// User-submitted property fields from the create endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManualProperty {
    pub external_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Option<f64>,
    pub sqft: Option<i32>,
    pub vacancy_rate: Option<f64>,
    pub cap_rate: Option<f64>,
    pub property_type: Option<String>,
    pub year_built: Option<i32>,
    pub lot_size: Option<f64>,
    pub tenant_count: Option<i32>,
    pub listing_url: Option<String>,
    pub image_url: Option<String>,
    pub source: Option<String>,
}

/// Tagged union over every source shape the normalizer understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRecord {
    Listing(ScrapedListing),
    Place(PlaceRecord),
    Manual(ManualProperty),
}

/// Shared inputs for one collector invocation.
#[derive(Debug, Clone)]
pub struct CollectContext {
    pub location: String,
    pub coords: Option<LatLng>,
    pub radius_miles: f64,
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Collectors that search around a point are skipped when geocoding
    /// the requested location failed.
    fn requires_coordinates(&self) -> bool;

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<SourceRecord>, CollectorError>;
}

// ---------------------------------------------------------------------------
// Parsing helpers

/// Parse a price string, honoring a trailing "M" unit marker
/// ("$4.5M" -> 4_500_000). Unparseable input degrades to 0.
pub fn parse_price(input: &str) -> f64 {
    let multiplier = if input.to_ascii_lowercase().contains('m') {
        1_000_000.0
    } else {
        1.0
    };
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse::<f64>().map(|v| v * multiplier).unwrap_or(0.0)
}

/// Parse a square-footage string by stripping everything non-numeric.
pub fn parse_sqft(input: &str) -> i32 {
    let cleaned: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    cleaned.parse().unwrap_or(0)
}

/// Extract the first decimal number from a cap-rate string
/// ("Cap Rate: 6.5%" -> 6.5).
pub fn parse_cap_rate(input: &str) -> f64 {
    first_number(input).unwrap_or(0.0)
}

fn first_number(text: &str) -> Option<f64> {
    let mut current = String::new();
    let mut seen_dot = false;
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
        } else if !current.is_empty() {
            break;
        }
    }
    current.trim_end_matches('.').parse().ok()
}

/// Split address components out of a free-text formatted address.
///
/// Best-effort comma heuristic: first segment is the street address,
/// second the city, and the final segment is scanned for a `STATE ZIP`
/// pair. Unmatched parts come back as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAddress {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

pub fn parse_address(full: &str) -> ParsedAddress {
    let parts: Vec<&str> = full.split(',').map(str::trim).collect();
    let address = parts.first().copied().unwrap_or(full).to_string();
    let city = parts.get(1).copied().unwrap_or("").to_string();

    let mut state = String::new();
    let mut zip = String::new();
    if let Some(last) = parts.last() {
        let mut tokens = last.split_whitespace().peekable();
        while let Some(token) = tokens.next() {
            let is_state = token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase());
            if is_state {
                state = token.to_string();
                if let Some(next) = tokens.peek() {
                    if next.len() == 5 && next.chars().all(|c| c.is_ascii_digit()) {
                        zip = (*next).to_string();
                    }
                }
                break;
            }
        }
    }

    ParsedAddress {
        address,
        city,
        state,
        zip,
    }
}

/// Deterministic external id for a scraped listing, derived from its
/// listing URL so repeated ingestion resolves to the same canonical row.
pub fn listing_external_id(source_slug: &str, listing_url: &str) -> String {
    let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, listing_url.as_bytes());
    format!("{source_slug}-{key}")
}

fn manual_external_id(record: &ManualProperty) -> String {
    let seed = format!("{}|{}|{}", record.name, record.address, record.city);
    let key = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    format!("manual-{key}")
}

fn map_place_property_type(types: &[String]) -> &'static str {
    if types.iter().any(|t| t == "shopping_mall") {
        "mall"
    } else if types
        .iter()
        .any(|t| t == "department_store" || t == "supermarket" || t == "grocery_or_supermarket")
    {
        "standalone"
    } else {
        "strip-center"
    }
}

// ---------------------------------------------------------------------------
// Normalizer

/// Maps heterogeneous source records into the canonical property shape.
///
/// Missing numerics stay `None`; the normalizer never invents data for a
/// field a source did not provide. A record is dropped only when it has
/// neither a name nor an identifiable location.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    street_view_key: Option<String>,
}

impl Normalizer {
    pub fn new(street_view_key: Option<String>) -> Self {
        Self { street_view_key }
    }

    pub fn normalize(&self, record: SourceRecord) -> Option<PropertyDraft> {
        let mut draft = match record {
            SourceRecord::Listing(listing) => self.normalize_listing(listing),
            SourceRecord::Place(place) => self.normalize_place(place),
            SourceRecord::Manual(manual) => self.normalize_manual(manual),
        }?;
        self.apply_image_fallback(&mut draft);
        Some(draft)
    }

    fn normalize_listing(&self, listing: ScrapedListing) -> Option<PropertyDraft> {
        let has_location = listing.latitude.is_some() || !listing.address.trim().is_empty();
        if listing.name.trim().is_empty() && !has_location {
            return None;
        }

        let parsed = parse_address(&listing.address);
        let slug = listing.source.to_ascii_lowercase();
        let price = parse_price(&listing.price);
        let sqft = parse_sqft(&listing.sqft);
        let cap_rate = parse_cap_rate(&listing.cap_rate);

        Some(PropertyDraft {
            external_id: listing_external_id(&slug, &listing.listing_url),
            name: if listing.name.trim().is_empty() {
                "Retail Property".to_string()
            } else {
                listing.name.trim().to_string()
            },
            address: parsed.address,
            city: parsed.city,
            state: parsed.state,
            zip: parsed.zip,
            latitude: listing.latitude,
            longitude: listing.longitude,
            price: (price > 0.0).then_some(price),
            sqft: (sqft > 0).then_some(sqft),
            // Listing sites rarely publish vacancy; absence stays absent.
            vacancy_rate: None,
            cap_rate: (cap_rate > 0.0).then_some(cap_rate),
            property_type: "retail".to_string(),
            year_built: None,
            lot_size: None,
            tenant_count: None,
            listing_url: Some(listing.listing_url),
            image_url: listing.image_url.clone(),
            images: listing.image_url.into_iter().collect(),
            google_place_id: None,
            google_rating: None,
            source: listing.source,
        })
    }

    fn normalize_place(&self, place: PlaceRecord) -> Option<PropertyDraft> {
        if place.name.trim().is_empty() {
            return None;
        }

        let parsed = parse_address(&place.formatted_address);
        Some(PropertyDraft {
            external_id: format!("google-{}", place.place_id),
            name: place.name,
            address: parsed.address,
            city: parsed.city,
            state: parsed.state,
            zip: parsed.zip,
            latitude: Some(place.latitude),
            longitude: Some(place.longitude),
            price: None,
            sqft: None,
            vacancy_rate: None,
            cap_rate: None,
            property_type: map_place_property_type(&place.types).to_string(),
            year_built: None,
            lot_size: None,
            tenant_count: None,
            listing_url: Some(format!(
                "https://www.google.com/maps/place/?q=place_id:{}",
                place.place_id
            )),
            image_url: place.photo_urls.first().cloned(),
            images: place.photo_urls,
            google_place_id: Some(place.place_id),
            google_rating: place.rating,
            source: "GooglePlaces".to_string(),
        })
    }

    fn normalize_manual(&self, manual: ManualProperty) -> Option<PropertyDraft> {
        let has_location = manual.latitude.is_some()
            || !manual.address.trim().is_empty()
            || !manual.city.trim().is_empty();
        if manual.name.trim().is_empty() && !has_location {
            return None;
        }

        let external_id = manual
            .external_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| manual_external_id(&manual));

        Some(PropertyDraft {
            external_id,
            name: manual.name,
            address: manual.address,
            city: manual.city,
            state: manual.state,
            zip: manual.zip,
            latitude: manual.latitude,
            longitude: manual.longitude,
            price: manual.price,
            sqft: manual.sqft,
            vacancy_rate: manual.vacancy_rate,
            cap_rate: manual.cap_rate,
            property_type: manual
                .property_type
                .unwrap_or_else(|| "strip-center".to_string()),
            year_built: manual.year_built,
            lot_size: manual.lot_size,
            tenant_count: manual.tenant_count,
            listing_url: manual.listing_url,
            image_url: manual.image_url.clone(),
            images: manual.image_url.into_iter().collect(),
            google_place_id: None,
            google_rating: None,
            source: manual.source.unwrap_or_else(|| "manual".to_string()),
        })
    }

    /// When a record has coordinates but no media, fall back to a
    /// street-level imagery URL keyed by those coordinates.
    fn apply_image_fallback(&self, draft: &mut PropertyDraft) {
        if draft.image_url.is_some() {
            return;
        }
        let (Some(lat), Some(lng)) = (draft.latitude, draft.longitude) else {
            return;
        };
        let Some(key) = &self.street_view_key else {
            return;
        };
        let url = street_view_url(key, lat, lng, 600, 400);
        draft.image_url = Some(url.clone());
        if draft.images.is_empty() {
            draft.images.push(url);
        }
    }
}

pub fn street_view_url(api_key: &str, lat: f64, lng: f64, width: u32, height: u32) -> String {
    format!(
        "https://maps.googleapis.com/maps/api/streetview?size={width}x{height}&location={lat},{lng}&key={api_key}"
    )
}

// ---------------------------------------------------------------------------
// Geocoding client

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: GeocodeLocation,
}

#[derive(Debug, Deserialize)]
struct GeocodeLocation {
    lat: f64,
    lng: f64,
}

/// Forward geocoder over the Google geocoding API. A missing key or an
/// upstream miss resolves to `Ok(None)`; callers degrade gracefully.
#[derive(Debug, Clone)]
pub struct GeocodingClient {
    http: Arc<HttpFetcher>,
    api_key: Option<String>,
}

impl GeocodingClient {
    pub fn new(http: Arc<HttpFetcher>, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    pub async fn geocode(&self, query: &str) -> Result<Option<LatLng>, FetchError> {
        let Some(key) = &self.api_key else {
            warn!("geocoding skipped: no API key configured");
            return Ok(None);
        };
        let url = format!(
            "https://maps.googleapis.com/maps/api/geocode/json?address={}&key={key}",
            urlencode(query)
        );
        let resp: GeocodeResponse = self.http.fetch_json("geocode", &url).await?;
        if resp.status != "OK" {
            return Ok(None);
        }
        Ok(resp
            .results
            .first()
            .map(|r| LatLng {
                lat: r.geometry.location.lat,
                lng: r.geometry.location.lng,
            }))
    }
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Google Places collector

#[derive(Debug, Deserialize)]
pub struct NearbySearchResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<NearbyPlace>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyPlace {
    pub place_id: String,
    pub name: String,
    #[serde(default)]
    pub vicinity: Option<String>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    pub geometry: GeocodeGeometryPublic,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub photos: Vec<PlacePhoto>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeGeometryPublic {
    pub location: GeocodeLocationPublic,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeLocationPublic {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct PlacePhoto {
    pub photo_reference: String,
}

pub fn place_photo_url(api_key: &str, photo_reference: &str, max_width: u32) -> String {
    format!(
        "https://maps.googleapis.com/maps/api/place/photo?maxwidth={max_width}&photo_reference={photo_reference}&key={api_key}"
    )
}

/// Convert a nearby-search payload into deduplicated [`PlaceRecord`]s,
/// appending onto `seen` so multiple type queries merge cleanly.
pub fn places_from_response(
    api_key: &str,
    resp: &NearbySearchResponse,
    seen: &mut Vec<PlaceRecord>,
) {
    for place in &resp.results {
        if seen.iter().any(|p| p.place_id == place.place_id) {
            continue;
        }
        let photo_urls = place
            .photos
            .iter()
            .take(5)
            .map(|p| place_photo_url(api_key, &p.photo_reference, 400))
            .collect();
        seen.push(PlaceRecord {
            place_id: place.place_id.clone(),
            name: place.name.clone(),
            formatted_address: place
                .formatted_address
                .clone()
                .or_else(|| place.vicinity.clone())
                .unwrap_or_default(),
            latitude: place.geometry.location.lat,
            longitude: place.geometry.location.lng,
            types: place.types.clone(),
            rating: place.rating,
            photo_urls,
        });
    }
}

pub struct GooglePlacesCollector {
    http: Arc<HttpFetcher>,
    api_key: Option<String>,
}

impl GooglePlacesCollector {
    pub fn new(http: Arc<HttpFetcher>, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl Collector for GooglePlacesCollector {
    fn source_id(&self) -> &'static str {
        "google-places"
    }

    fn requires_coordinates(&self) -> bool {
        true
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<SourceRecord>, CollectorError> {
        let Some(key) = &self.api_key else {
            return Err(CollectorError::Message(
                "places API key not configured".to_string(),
            ));
        };
        let Some(coords) = ctx.coords else {
            return Err(CollectorError::Message(
                "places collector requires resolved coordinates".to_string(),
            ));
        };

        let radius_meters = (ctx.radius_miles * 1609.34).round() as i64;
        let mut places = Vec::new();

        for place_type in RETAIL_PLACE_TYPES {
            let url = format!(
                "https://maps.googleapis.com/maps/api/place/nearbysearch/json?location={},{}&radius={}&type={}&key={}",
                coords.lat, coords.lng, radius_meters, place_type, key
            );
            let resp: NearbySearchResponse = self.http.fetch_json(self.source_id(), &url).await?;
            if resp.status != "OK" && resp.status != "ZERO_RESULTS" {
                warn!(status = %resp.status, place_type, "nearby search returned non-OK status");
                continue;
            }
            places_from_response(key, &resp, &mut places);
        }

        info!(count = places.len(), "places collection complete");
        Ok(places.into_iter().map(SourceRecord::Place).collect())
    }
}

// ---------------------------------------------------------------------------
// Listing-page collectors (LoopNet, CREXi)

fn select_first_text(card: ElementRef<'_>, selector: &Selector) -> String {
    card.select(selector)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn select_first_attr(card: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    card.select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

struct CardSelectors {
    card: Selector,
    name: Selector,
    address: Selector,
    price: Selector,
    sqft: Selector,
    cap_rate: Selector,
    link: Selector,
    image: Selector,
}

impl CardSelectors {
    fn parse(
        card: &str,
        name: &str,
        address: &str,
        price: &str,
        sqft: &str,
        cap_rate: &str,
        link: &str,
        image: &str,
    ) -> Result<Self, CollectorError> {
        let sel = |s: &str| {
            Selector::parse(s).map_err(|e| CollectorError::Message(format!("selector {s}: {e}")))
        };
        Ok(Self {
            card: sel(card)?,
            name: sel(name)?,
            address: sel(address)?,
            price: sel(price)?,
            sqft: sel(sqft)?,
            cap_rate: sel(cap_rate)?,
            link: sel(link)?,
            image: sel(image)?,
        })
    }
}

fn extract_listing_cards(
    html: &str,
    selectors: &CardSelectors,
    base_url: &str,
    source: &str,
) -> Vec<ScrapedListing> {
    let document = Html::parse_document(html);
    let mut listings = Vec::new();

    for card in document.select(&selectors.card) {
        let name = select_first_text(card, &selectors.name);
        let address = select_first_text(card, &selectors.address);
        if name.is_empty() && address.is_empty() {
            continue;
        }

        let listing_url = select_first_attr(card, &selectors.link, "href")
            .map(|href| {
                if href.starts_with("http") {
                    href
                } else {
                    format!("{base_url}{href}")
                }
            })
            .unwrap_or_default();
        let image_url = select_first_attr(card, &selectors.image, "src")
            .or_else(|| select_first_attr(card, &selectors.image, "data-src"));

        listings.push(ScrapedListing {
            name,
            address,
            price: select_first_text(card, &selectors.price),
            sqft: select_first_text(card, &selectors.sqft),
            cap_rate: select_first_text(card, &selectors.cap_rate),
            listing_url,
            image_url,
            latitude: None,
            longitude: None,
            source: source.to_string(),
        });
    }

    listings.truncate(MAX_LISTINGS_PER_RUN);
    listings
}

/// Parse LoopNet search-result markup into raw listing cards. Selector
/// lists cover the markup variants the site rotates through; a full
/// structural change yields an empty set.
pub fn parse_loopnet_listings(html: &str) -> Result<Vec<ScrapedListing>, CollectorError> {
    let selectors = CardSelectors::parse(
        ".placard, .property-card",
        ".placard-title, .property-name, h4, h3",
        ".placard-address, .property-address",
        ".placard-price, .property-price",
        ".placard-specs",
        ".placard-cap-rate",
        "a[href*='/Listing/']",
        "img",
    )?;
    Ok(extract_listing_cards(
        html,
        &selectors,
        "https://www.loopnet.com",
        "LoopNet",
    ))
}

/// Parse CREXi search-result markup into raw listing cards.
pub fn parse_crexi_listings(html: &str) -> Result<Vec<ScrapedListing>, CollectorError> {
    let selectors = CardSelectors::parse(
        ".property-card, .listing-card",
        ".property-name, .listing-title, h3, h4",
        ".property-address, .listing-address",
        ".property-price, .listing-price",
        ".property-size, .listing-size",
        ".property-cap-rate, .listing-cap-rate",
        "a[href*='/properties/']",
        "img",
    )?;
    Ok(extract_listing_cards(
        html,
        &selectors,
        "https://www.crexi.com",
        "CREXi",
    ))
}

async fn geocode_listings(
    listings: &mut [ScrapedListing],
    geocoder: &GeocodingClient,
    fallback_location: &str,
) {
    for listing in listings {
        if listing.address.trim().is_empty() {
            continue;
        }
        let query = format!("{}, {}", listing.address, fallback_location);
        match geocoder.geocode(&query).await {
            Ok(Some(coords)) => {
                listing.latitude = Some(coords.lat);
                listing.longitude = Some(coords.lng);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, address = %listing.address, "geocoding listing failed");
            }
        }
    }
}

pub struct LoopNetCollector {
    http: Arc<HttpFetcher>,
    geocoder: GeocodingClient,
}

impl LoopNetCollector {
    pub fn new(http: Arc<HttpFetcher>, geocoder: GeocodingClient) -> Self {
        Self { http, geocoder }
    }
}

#[async_trait]
impl Collector for LoopNetCollector {
    fn source_id(&self) -> &'static str {
        "loopnet"
    }

    fn requires_coordinates(&self) -> bool {
        false
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<SourceRecord>, CollectorError> {
        let url = format!(
            "https://www.loopnet.com/search/retail-properties/{}/for-sale/",
            urlencode(&ctx.location)
        );
        let html = self.http.fetch_text(self.source_id(), &url).await?;
        let mut listings = parse_loopnet_listings(&html)?;
        info!(count = listings.len(), "loopnet listings extracted");
        geocode_listings(&mut listings, &self.geocoder, &ctx.location).await;
        Ok(listings.into_iter().map(SourceRecord::Listing).collect())
    }
}

pub struct CrexiCollector {
    http: Arc<HttpFetcher>,
    geocoder: GeocodingClient,
}

impl CrexiCollector {
    pub fn new(http: Arc<HttpFetcher>, geocoder: GeocodingClient) -> Self {
        Self { http, geocoder }
    }
}

#[async_trait]
impl Collector for CrexiCollector {
    fn source_id(&self) -> &'static str {
        "crexi"
    }

    fn requires_coordinates(&self) -> bool {
        false
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<SourceRecord>, CollectorError> {
        let url = format!(
            "https://www.crexi.com/properties?propertyTypes=retail&q={}",
            urlencode(&ctx.location)
        );
        let html = self.http.fetch_text(self.source_id(), &url).await?;
        let mut listings = parse_crexi_listings(&html)?;
        info!(count = listings.len(), "crexi listings extracted");
        geocode_listings(&mut listings, &self.geocoder, &ctx.location).await;
        Ok(listings.into_iter().map(SourceRecord::Listing).collect())
    }
}
