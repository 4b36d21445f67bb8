//! Property store (Postgres via sqlx) + shared HTTP fetch utilities.
//!
//! The [`Db`] handle is constructed once at process start and passed down
//! explicitly; nothing in this crate keeps process-wide connection state.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use thiserror::Error;
use tracing::info_span;
use upside_core::{JobStatus, Property, PropertyDraft, QueryPlan, ScraperJob, SortKey};
use uuid::Uuid;

pub const CRATE_NAME: &str = "upside-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only audit row for one ingestion invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperRun {
    pub id: i32,
    pub source: String,
    pub status: JobStatus,
    pub properties_found: i32,
    pub properties_added: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedProperty {
    pub id: i32,
    pub property_id: i32,
    pub user_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Explicitly constructed storage handle. Created at process start,
/// closed at shutdown, never re-initialized per request.
#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to Postgres")?;
        Ok(Self { pool })
    }

    /// Pool that defers connecting until first use. Handler tests use this
    /// to exercise request-validation paths without a live database.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .context("building lazy Postgres pool")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// One-time idempotent schema setup. Run before serving traffic,
    /// never on the request hot path.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS properties (
                id SERIAL PRIMARY KEY,
                external_id VARCHAR(255) UNIQUE,
                name VARCHAR(500) NOT NULL,
                address VARCHAR(500),
                city VARCHAR(100),
                state VARCHAR(50),
                zip VARCHAR(20),
                lat DOUBLE PRECISION,
                lng DOUBLE PRECISION,
                price DOUBLE PRECISION,
                sqft INTEGER,
                vacancy_rate DOUBLE PRECISION,
                cap_rate DOUBLE PRECISION,
                upside_score INTEGER,
                property_type VARCHAR(50),
                year_built INTEGER,
                lot_size DOUBLE PRECISION,
                tenant_count INTEGER,
                listing_url TEXT,
                image_url TEXT,
                images TEXT[],
                google_place_id VARCHAR(255),
                google_rating DOUBLE PRECISION,
                source VARCHAR(50),
                scraped_at TIMESTAMPTZ DEFAULT NOW(),
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_properties_location ON properties(lat, lng)",
            "CREATE INDEX IF NOT EXISTS idx_properties_upside ON properties(upside_score DESC)",
            "CREATE INDEX IF NOT EXISTS idx_properties_source ON properties(source)",
            "CREATE INDEX IF NOT EXISTS idx_properties_city_state ON properties(city, state)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_properties (
                id SERIAL PRIMARY KEY,
                property_id INTEGER REFERENCES properties(id),
                user_id VARCHAR(255),
                notes TEXT,
                created_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraper_runs (
                id SERIAL PRIMARY KEY,
                source VARCHAR(50),
                status VARCHAR(20),
                properties_found INTEGER DEFAULT 0,
                properties_added INTEGER DEFAULT 0,
                error_message TEXT,
                started_at TIMESTAMPTZ DEFAULT NOW(),
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraper_jobs (
                id SERIAL PRIMARY KEY,
                job_id UUID UNIQUE NOT NULL,
                source VARCHAR(50),
                location VARCHAR(255),
                radius_miles INTEGER,
                status VARCHAR(20) DEFAULT 'pending',
                properties_found INTEGER DEFAULT 0,
                properties_added INTEGER DEFAULT 0,
                error_message TEXT,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert-or-update keyed on `external_id`. On conflict the volatile
    /// fields are refreshed, previously stored media survives a null
    /// incoming value, and `created_at` is never touched.
    pub async fn upsert_property(
        &self,
        draft: &PropertyDraft,
        upside_score: i32,
    ) -> Result<Option<Property>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO properties (
                external_id, name, address, city, state, zip, lat, lng,
                price, sqft, vacancy_rate, cap_rate, upside_score,
                property_type, year_built, lot_size, tenant_count,
                listing_url, image_url, images, google_place_id,
                google_rating, source
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            ON CONFLICT (external_id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                sqft = EXCLUDED.sqft,
                vacancy_rate = EXCLUDED.vacancy_rate,
                cap_rate = EXCLUDED.cap_rate,
                upside_score = EXCLUDED.upside_score,
                image_url = COALESCE(EXCLUDED.image_url, properties.image_url),
                images = CASE
                    WHEN COALESCE(array_length(EXCLUDED.images, 1), 0) > 0
                    THEN EXCLUDED.images
                    ELSE properties.images
                END,
                google_rating = COALESCE(EXCLUDED.google_rating, properties.google_rating),
                updated_at = NOW(),
                scraped_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&draft.external_id)
        .bind(&draft.name)
        .bind(&draft.address)
        .bind(&draft.city)
        .bind(&draft.state)
        .bind(&draft.zip)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.price)
        .bind(draft.sqft)
        .bind(draft.vacancy_rate)
        .bind(draft.cap_rate)
        .bind(upside_score)
        .bind(&draft.property_type)
        .bind(draft.year_built)
        .bind(draft.lot_size)
        .bind(draft.tenant_count)
        .bind(&draft.listing_url)
        .bind(&draft.image_url)
        .bind(&draft.images)
        .bind(&draft.google_place_id)
        .bind(draft.google_rating)
        .bind(&draft.source)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| property_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Coarse SQL stage of a property search. Threshold filters and the
    /// bounding-box pre-filter run here with `NULLS LAST` ordering; the
    /// caller finishes with [`QueryPlan::finalize`] for exact radius
    /// filtering, distance attachment, and the row limit.
    pub async fn search_properties(&self, plan: &QueryPlan) -> Result<Vec<Property>, StoreError> {
        let mut qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM properties WHERE 1=1");

        if let Some(city) = &plan.city {
            qb.push(" AND LOWER(city) LIKE LOWER(");
            qb.push_bind(format!("%{city}%"));
            qb.push(")");
        }
        if let Some(state) = &plan.state {
            qb.push(" AND UPPER(state) = UPPER(");
            qb.push_bind(state.clone());
            qb.push(")");
        }
        if let Some(v) = plan.min_upside_score {
            qb.push(" AND upside_score >= ");
            qb.push_bind(v);
        }
        if let Some(v) = plan.min_cap_rate {
            qb.push(" AND cap_rate >= ");
            qb.push_bind(v);
        }
        if let Some(v) = plan.min_vacancy {
            qb.push(" AND vacancy_rate >= ");
            qb.push_bind(v);
        }
        if let Some(v) = plan.max_vacancy {
            qb.push(" AND vacancy_rate <= ");
            qb.push_bind(v);
        }
        if let Some(v) = plan.min_price {
            qb.push(" AND price >= ");
            qb.push_bind(v);
        }
        if let Some(v) = plan.max_price {
            qb.push(" AND price <= ");
            qb.push_bind(v);
        }
        if let Some(bbox) = &plan.bbox {
            qb.push(" AND lat BETWEEN ");
            qb.push_bind(bbox.sw_lat);
            qb.push(" AND ");
            qb.push_bind(bbox.ne_lat);
            qb.push(" AND lng BETWEEN ");
            qb.push_bind(bbox.sw_lng);
            qb.push(" AND ");
            qb.push_bind(bbox.ne_lng);
        }

        qb.push(" ORDER BY ");
        qb.push(order_by_clause(plan.sort));

        if sql_stage_applies_limit(plan) {
            qb.push(" LIMIT ");
            qb.push_bind(plan.limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(property_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn get_property(&self, id: i32) -> Result<Option<Property>, StoreError> {
        let row = sqlx::query("SELECT * FROM properties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| property_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn create_job(
        &self,
        job_id: Uuid,
        source: &str,
        location: Option<&str>,
        radius_miles: Option<i32>,
    ) -> Result<ScraperJob, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO scraper_jobs (job_id, source, location, radius_miles, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(source)
        .bind(location)
        .bind(radius_miles)
        .fetch_one(&self.pool)
        .await?;
        job_from_row(&row).map_err(Into::into)
    }

    pub async fn mark_job_running(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scraper_jobs SET status = 'running', started_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_job(&self, job_id: Uuid, found: i32, added: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scraper_jobs
               SET status = 'completed',
                   properties_found = $2,
                   properties_added = $3,
                   completed_at = NOW()
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(found)
        .bind(added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(&self, job_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scraper_jobs
               SET status = 'failed',
                   error_message = $2,
                   completed_at = NOW()
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<ScraperJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM scraper_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| job_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn start_run(&self, source: &str) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "INSERT INTO scraper_runs (source, status) VALUES ($1, 'running') RETURNING id",
        )
        .bind(source)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn complete_run(&self, run_id: i32, found: i32, added: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scraper_runs
               SET status = 'completed',
                   properties_found = $2,
                   properties_added = $3,
                   completed_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(found)
        .bind(added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_run(&self, run_id: i32, error_message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scraper_runs
               SET status = 'failed',
                   error_message = $2,
                   completed_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<ScraperRun>, StoreError> {
        let rows = sqlx::query("SELECT * FROM scraper_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(run_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn save_property(
        &self,
        property_id: i32,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<SavedProperty, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO saved_properties (property_id, user_id, notes)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(property_id)
        .bind(user_id)
        .bind(notes)
        .fetch_one(&self.pool)
        .await?;
        saved_from_row(&row).map_err(Into::into)
    }

    pub async fn list_saved(&self, user_id: &str) -> Result<Vec<Property>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM properties p
              JOIN saved_properties s ON s.property_id = p.id
             WHERE s.user_id = $1
             ORDER BY s.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(property_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

/// The SQL stage may only truncate when its ordering is final. Radius
/// filtering and distance ordering both re-rank rows in
/// [`QueryPlan::finalize`], so those plans enforce the limit there; a
/// premature SQL `LIMIT` would cut rows the finalize stage would have
/// ranked nearest.
fn sql_stage_applies_limit(plan: &QueryPlan) -> bool {
    plan.radius_miles.is_none() && !(plan.sort == SortKey::Distance && plan.origin.is_some())
}

/// `ORDER BY` clause for a sort key. Null-valued sort columns go last in
/// every ordering. Distance ordering happens after the exact haversine
/// stage, so its SQL stage uses the default ranking.
pub fn order_by_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::UpsideScore | SortKey::Distance => "upside_score DESC NULLS LAST",
        SortKey::Price => "price ASC NULLS LAST",
        SortKey::CapRate => "cap_rate DESC NULLS LAST",
        SortKey::Vacancy => "vacancy_rate DESC NULLS LAST",
    }
}

fn property_from_row(row: &PgRow) -> Result<Property, sqlx::Error> {
    let price: Option<f64> = row.try_get("price")?;
    let sqft: Option<i32> = row.try_get("sqft")?;
    let price = price.unwrap_or(0.0);
    let sqft = sqft.unwrap_or(0);
    let images: Option<Vec<String>> = row.try_get("images")?;
    let now = Utc::now();

    let mut property = Property {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        address: row.try_get::<Option<String>, _>("address")?.unwrap_or_default(),
        city: row.try_get::<Option<String>, _>("city")?.unwrap_or_default(),
        state: row.try_get::<Option<String>, _>("state")?.unwrap_or_default(),
        zip: row.try_get::<Option<String>, _>("zip")?.unwrap_or_default(),
        latitude: row.try_get::<Option<f64>, _>("lat")?.unwrap_or(0.0),
        longitude: row.try_get::<Option<f64>, _>("lng")?.unwrap_or(0.0),
        price,
        sqft,
        price_per_sqft: 0.0,
        vacancy_rate: row.try_get("vacancy_rate")?,
        cap_rate: row.try_get("cap_rate")?,
        upside_score: row.try_get::<Option<i32>, _>("upside_score")?.unwrap_or(50),
        property_type: row
            .try_get::<Option<String>, _>("property_type")?
            .unwrap_or_else(|| "strip-center".to_string()),
        year_built: row.try_get("year_built")?,
        lot_size: row.try_get("lot_size")?,
        tenant_count: row.try_get("tenant_count")?,
        listing_url: row.try_get("listing_url")?,
        image_url: row.try_get("image_url")?,
        images: images.unwrap_or_default(),
        google_place_id: row.try_get("google_place_id")?,
        google_rating: row.try_get("google_rating")?,
        source: row
            .try_get::<Option<String>, _>("source")?
            .unwrap_or_else(|| "manual".to_string()),
        scraped_at: row
            .try_get::<Option<DateTime<Utc>>, _>("scraped_at")?
            .unwrap_or(now),
        created_at: row
            .try_get::<Option<DateTime<Utc>>, _>("created_at")?
            .unwrap_or(now),
        updated_at: row
            .try_get::<Option<DateTime<Utc>>, _>("updated_at")?
            .unwrap_or(now),
        distance: None,
    };
    property.recompute_price_per_sqft();
    Ok(property)
}

fn job_from_row(row: &PgRow) -> Result<ScraperJob, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(ScraperJob {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        source: row.try_get::<Option<String>, _>("source")?.unwrap_or_default(),
        location: row.try_get("location")?,
        radius_miles: row.try_get("radius_miles")?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Pending),
        properties_found: row.try_get::<Option<i32>, _>("properties_found")?.unwrap_or(0),
        properties_added: row.try_get::<Option<i32>, _>("properties_added")?.unwrap_or(0),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<ScraperRun, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(ScraperRun {
        id: row.try_get("id")?,
        source: row.try_get::<Option<String>, _>("source")?.unwrap_or_default(),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Pending),
        properties_found: row.try_get::<Option<i32>, _>("properties_found")?.unwrap_or(0),
        properties_added: row.try_get::<Option<i32>, _>("properties_added")?.unwrap_or(0),
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn saved_from_row(row: &PgRow) -> Result<SavedProperty, sqlx::Error> {
    Ok(SavedProperty {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        user_id: row.try_get::<Option<String>, _>("user_id")?.unwrap_or_default(),
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout. Unbounded waits against remote services are a
    /// defect; every outbound call goes through this client.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Shared outbound HTTP client for collectors: timeout, retry with
/// exponential backoff on retryable failures, gzip/brotli decoding.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, source: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop captures a request error"),
        ))
    }

    pub async fn fetch_text(&self, source: &str, url: &str) -> Result<String, FetchError> {
        let resp = self.fetch_bytes(source, url).await?;
        String::from_utf8(resp.body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &str,
    ) -> Result<T, FetchError> {
        let resp = self.fetch_bytes(source, url).await?;
        serde_json::from_slice(&resp.body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn every_sort_key_orders_nulls_last() {
        for sort in [
            SortKey::UpsideScore,
            SortKey::Price,
            SortKey::CapRate,
            SortKey::Vacancy,
            SortKey::Distance,
        ] {
            assert!(order_by_clause(sort).ends_with("NULLS LAST"));
        }
    }

    #[test]
    fn plans_that_rerank_in_finalize_defer_the_sql_limit() {
        use upside_core::{LatLng, PropertyFilters};

        let origin = LatLng {
            lat: 39.7392,
            lng: -104.9903,
        };

        // Distance ordering without a radius still re-ranks in finalize;
        // truncating on the default SQL ordering would drop near rows.
        let distance_sorted = QueryPlan::from_filters(&PropertyFilters {
            origin: Some(origin),
            sort: SortKey::Distance,
            ..Default::default()
        });
        assert!(!sql_stage_applies_limit(&distance_sorted));

        let radius_search = QueryPlan::from_filters(&PropertyFilters {
            origin: Some(origin),
            radius_miles: Some(10.0),
            ..Default::default()
        });
        assert!(!sql_stage_applies_limit(&radius_search));

        // An origin alone only attaches distances; the SQL ordering is
        // final and the limit applies there.
        let origin_only = QueryPlan::from_filters(&PropertyFilters {
            origin: Some(origin),
            ..Default::default()
        });
        assert!(sql_stage_applies_limit(&origin_only));

        let default_plan = QueryPlan::from_filters(&PropertyFilters::default());
        assert!(sql_stage_applies_limit(&default_plan));
    }

    // The remaining tests run against a live database and no-op when
    // DATABASE_URL is unset.
    async fn test_db() -> Option<Db> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let db = Db::connect(&url).await.ok()?;
        db.migrate().await.ok()?;
        Some(db)
    }

    fn test_draft(external_id: &str, city: &str) -> PropertyDraft {
        PropertyDraft {
            external_id: external_id.to_string(),
            name: "Test Commons".to_string(),
            address: "1 Test Way".to_string(),
            city: city.to_string(),
            state: "CO".to_string(),
            zip: "80202".to_string(),
            latitude: Some(39.74),
            longitude: Some(-104.99),
            price: Some(1_200_000.0),
            sqft: Some(10_000),
            vacancy_rate: Some(12.0),
            cap_rate: Some(8.5),
            property_type: "strip-center".to_string(),
            source: "test".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_same_external_id_twice_keeps_one_row_and_created_at() {
        let Some(db) = test_db().await else { return };

        let ext = format!("test-{}", Uuid::new_v4());
        let draft = test_draft(&ext, "Denver");

        let first = db.upsert_property(&draft, 80).await.unwrap().unwrap();
        let second = db.upsert_property(&draft, 80).await.unwrap().unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.scraped_at >= first.scraped_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn upsert_with_null_media_preserves_stored_image() {
        let Some(db) = test_db().await else { return };

        let ext = format!("test-{}", Uuid::new_v4());
        let mut draft = test_draft(&ext, "Denver");
        draft.image_url = Some("https://images.example.com/first.jpg".to_string());
        draft.images = vec!["https://images.example.com/first.jpg".to_string()];
        draft.google_rating = Some(4.2);
        db.upsert_property(&draft, 80).await.unwrap();

        let mut rescrape = test_draft(&ext, "Denver");
        rescrape.image_url = None;
        rescrape.images = Vec::new();
        rescrape.google_rating = None;
        rescrape.price = Some(1_350_000.0);
        let row = db.upsert_property(&rescrape, 80).await.unwrap().unwrap();

        assert_eq!(
            row.image_url.as_deref(),
            Some("https://images.example.com/first.jpg")
        );
        assert_eq!(row.images.len(), 1);
        assert_eq!(row.google_rating, Some(4.2));
        // Volatile fields still refresh.
        assert_eq!(row.price, 1_350_000.0);
    }

    #[tokio::test]
    async fn cap_rate_threshold_with_price_sort_orders_nulls_last() {
        use upside_core::PropertyFilters;

        let Some(db) = test_db().await else { return };

        // Unique city keeps this scenario isolated from other rows.
        let city = format!("Testville-{}", Uuid::new_v4());
        let mut low_cap = test_draft(&format!("test-{}", Uuid::new_v4()), &city);
        low_cap.cap_rate = Some(5.0);
        low_cap.price = Some(500_000.0);
        let mut mid = test_draft(&format!("test-{}", Uuid::new_v4()), &city);
        mid.cap_rate = Some(8.5);
        mid.price = Some(1_000_000.0);
        let mut high = test_draft(&format!("test-{}", Uuid::new_v4()), &city);
        high.cap_rate = Some(9.0);
        high.price = Some(2_000_000.0);
        let mut unpriced = test_draft(&format!("test-{}", Uuid::new_v4()), &city);
        unpriced.cap_rate = Some(8.2);
        unpriced.price = None;

        for draft in [&low_cap, &mid, &high, &unpriced] {
            db.upsert_property(draft, 60).await.unwrap();
        }

        let plan = QueryPlan::from_filters(&PropertyFilters {
            city: Some(city),
            min_cap_rate: Some(8.0),
            sort: SortKey::Price,
            ..Default::default()
        });
        let rows = db.search_properties(&plan).await.unwrap();

        assert_eq!(rows.len(), 3, "cap rate 5.0 must be filtered out");
        assert_eq!(rows[0].external_id, Some(mid.external_id.clone()));
        assert_eq!(rows[1].external_id, Some(high.external_id.clone()));
        assert_eq!(rows[2].external_id, Some(unpriced.external_id.clone()));
    }
}
