//! PostgreSQL-backed store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;

use coverage_common::{CatalogError, CatalogResult};

use crate::{CoverageRow, DataConnection, ExtentRow, LayerRow, QueryWindow, SeriesRow};

/// Database connection pool and catalog queries.
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Connect from a database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CatalogError::Database(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> CatalogResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| CatalogError::Database(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DataConnection for PostgresConnection {
    async fn coverage_rows(
        &self,
        layer: &str,
        window: &QueryWindow,
    ) -> CatalogResult<Vec<CoverageRow>> {
        debug!(layer, ?window.time, "querying coverage rows");

        // The ORDER BY clause is load-bearing: the selection scan assumes
        // same-cell rows are adjacent in end-time order.
        let mut sql = String::from(
            "SELECT c.series, c.filename, c.slice_index, c.band, \
             c.start_time, c.end_time, c.extent_id, c.visible \
             FROM coverages c \
             JOIN series s ON s.name = c.series \
             WHERE s.layer = $1 \
             AND (c.end_time IS NULL OR c.end_time > $2) \
             AND (c.start_time IS NULL OR c.start_time < $3)",
        );
        if window.visible_only {
            sql.push_str(" AND c.visible");
        }
        if window.bbox.is_some() {
            sql.push_str(
                " AND c.extent_id IN (SELECT id FROM extents e \
                 WHERE e.bbox_min_x < $6 AND e.bbox_max_x > $4 \
                 AND e.bbox_min_y < $7 AND e.bbox_max_y > $5)",
            );
        }
        sql.push_str(" ORDER BY c.end_time ASC NULLS LAST, c.series ASC");

        let start = window
            .time
            .start
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = window.time.end.unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut query = sqlx::query_as::<_, CoverageDbRow>(&sql)
            .bind(layer)
            .bind(start)
            .bind(end);
        if let Some(bbox) = &window.bbox {
            query = query
                .bind(bbox.min_x)
                .bind(bbox.min_y)
                .bind(bbox.max_x)
                .bind(bbox.max_y);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn extent(&self, id: &str) -> CatalogResult<ExtentRow> {
        let row = sqlx::query_as::<_, ExtentDbRow>(
            "SELECT id, width, height, depth, \
             scale_x, shear_x, translate_x, shear_y, scale_y, translate_y, \
             horizontal_srid, vertical_srid, vertical_ordinates \
             FROM extents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        row.map(|r| r.into())
            .ok_or_else(|| CatalogError::ExtentNotFound(id.to_string()))
    }

    async fn layer(&self, name: &str) -> CatalogResult<LayerRow> {
        let row = sqlx::query_as::<_, LayerDbRow>(
            "SELECT name, thematic, procedure, period_seconds, fallback \
             FROM layers WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        row.map(|r| r.into())
            .ok_or_else(|| CatalogError::LayerNotFound(name.to_string()))
    }

    async fn series_for_layer(&self, layer: &str) -> CatalogResult<Vec<SeriesRow>> {
        let rows = sqlx::query_as::<_, SeriesDbRow>(
            "SELECT layer, name, format, root, subdirectory, extension, host \
             FROM series WHERE layer = $1 ORDER BY name",
        )
        .bind(layer)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn distinct_times(&self, layer: &str) -> CatalogResult<Vec<DateTime<Utc>>> {
        let rows = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT DISTINCT c.start_time FROM coverages c \
             JOIN series s ON s.name = c.series \
             WHERE s.layer = $1 AND c.start_time IS NOT NULL \
             ORDER BY c.start_time ASC",
        )
        .bind(layer)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        Ok(rows)
    }

    async fn distinct_elevations(&self, layer: &str) -> CatalogResult<Vec<f64>> {
        let rows = sqlx::query_scalar::<_, Vec<f64>>(
            "SELECT e.vertical_ordinates FROM extents e \
             WHERE e.id IN (SELECT DISTINCT c.extent_id FROM coverages c \
             JOIN series s ON s.name = c.series WHERE s.layer = $1)",
        )
        .bind(layer)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Database(format!("Query failed: {}", e)))?;

        let mut ordinates: Vec<f64> = rows.into_iter().flatten().collect();
        ordinates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        ordinates.dedup();
        Ok(ordinates)
    }
}

#[derive(FromRow)]
struct CoverageDbRow {
    series: String,
    filename: String,
    slice_index: i32,
    band: i32,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    extent_id: String,
    visible: bool,
}

impl From<CoverageDbRow> for CoverageRow {
    fn from(row: CoverageDbRow) -> Self {
        CoverageRow {
            series: row.series,
            filename: row.filename,
            slice_index: row.slice_index.max(1) as u32,
            band: row.band.max(0) as u32,
            start_time: row.start_time,
            end_time: row.end_time,
            extent_id: row.extent_id,
            visible: row.visible,
        }
    }
}

#[derive(FromRow)]
struct ExtentDbRow {
    id: String,
    width: i64,
    height: i64,
    depth: Option<i64>,
    scale_x: f64,
    shear_x: f64,
    translate_x: f64,
    shear_y: f64,
    scale_y: f64,
    translate_y: f64,
    horizontal_srid: i32,
    vertical_srid: Option<i32>,
    vertical_ordinates: Vec<f64>,
}

impl From<ExtentDbRow> for ExtentRow {
    fn from(row: ExtentDbRow) -> Self {
        ExtentRow {
            id: row.id,
            width: row.width.max(0) as usize,
            height: row.height.max(0) as usize,
            depth: row.depth.map(|d| d.max(0) as usize),
            scale_x: row.scale_x,
            shear_x: row.shear_x,
            translate_x: row.translate_x,
            shear_y: row.shear_y,
            scale_y: row.scale_y,
            translate_y: row.translate_y,
            horizontal_srid: row.horizontal_srid,
            vertical_srid: row.vertical_srid,
            vertical_ordinates: row.vertical_ordinates,
        }
    }
}

#[derive(FromRow)]
struct LayerDbRow {
    name: String,
    thematic: Option<String>,
    procedure: Option<String>,
    period_seconds: Option<i64>,
    fallback: Option<String>,
}

impl From<LayerDbRow> for LayerRow {
    fn from(row: LayerDbRow) -> Self {
        LayerRow {
            name: row.name,
            thematic: row.thematic,
            procedure: row.procedure,
            period_seconds: row.period_seconds,
            fallback: row.fallback,
        }
    }
}

#[derive(FromRow)]
struct SeriesDbRow {
    layer: String,
    name: String,
    format: String,
    root: String,
    subdirectory: String,
    extension: String,
    host: Option<String>,
}

impl From<SeriesDbRow> for SeriesRow {
    fn from(row: SeriesDbRow) -> Self {
        SeriesRow {
            layer: row.layer,
            name: row.name,
            format: row.format,
            root: row.root,
            subdirectory: row.subdirectory,
            extension: row.extension,
            host: row.host,
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS layers (
    name VARCHAR(100) PRIMARY KEY,
    thematic VARCHAR(200),
    procedure VARCHAR(200),
    period_seconds BIGINT,
    fallback VARCHAR(100)
);

CREATE TABLE IF NOT EXISTS series (
    name VARCHAR(100) PRIMARY KEY,
    layer VARCHAR(100) NOT NULL REFERENCES layers(name),
    format VARCHAR(100) NOT NULL,
    root TEXT NOT NULL,
    subdirectory TEXT NOT NULL DEFAULT '',
    extension VARCHAR(20) NOT NULL DEFAULT '',
    host TEXT
);

CREATE TABLE IF NOT EXISTS extents (
    id VARCHAR(100) PRIMARY KEY,
    width BIGINT NOT NULL,
    height BIGINT NOT NULL,
    depth BIGINT,
    scale_x DOUBLE PRECISION NOT NULL,
    shear_x DOUBLE PRECISION NOT NULL DEFAULT 0,
    translate_x DOUBLE PRECISION NOT NULL,
    shear_y DOUBLE PRECISION NOT NULL DEFAULT 0,
    scale_y DOUBLE PRECISION NOT NULL,
    translate_y DOUBLE PRECISION NOT NULL,
    horizontal_srid INTEGER NOT NULL,
    vertical_srid INTEGER,
    vertical_ordinates DOUBLE PRECISION[] NOT NULL DEFAULT '{}',
    bbox_min_x DOUBLE PRECISION NOT NULL,
    bbox_min_y DOUBLE PRECISION NOT NULL,
    bbox_max_x DOUBLE PRECISION NOT NULL,
    bbox_max_y DOUBLE PRECISION NOT NULL
);

CREATE TABLE IF NOT EXISTS coverages (
    id BIGSERIAL PRIMARY KEY,
    series VARCHAR(100) NOT NULL REFERENCES series(name),
    filename TEXT NOT NULL,
    slice_index INTEGER NOT NULL DEFAULT 1,
    band INTEGER NOT NULL DEFAULT 0,
    start_time TIMESTAMPTZ,
    end_time TIMESTAMPTZ,
    extent_id VARCHAR(100) NOT NULL REFERENCES extents(id),
    visible BOOLEAN NOT NULL DEFAULT TRUE,

    UNIQUE(series, filename, slice_index, band)
);

CREATE INDEX IF NOT EXISTS idx_coverages_series ON coverages(series);
CREATE INDEX IF NOT EXISTS idx_coverages_end_time ON coverages(end_time ASC NULLS LAST);
CREATE INDEX IF NOT EXISTS idx_series_layer ON series(layer);
"#;
