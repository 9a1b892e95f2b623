//! Store row builders and a seeded in-memory catalog.

use chrono::{DateTime, TimeZone, Utc};

use coverage_store::{CoverageRow, ExtentRow, LayerRow, MemoryConnection, SeriesRow};

/// Midnight UTC of a day in June 2019, the fixture month.
pub fn june_day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 6, day, 0, 0, 0).unwrap()
}

/// Global axis-aligned EPSG:4326 extent with the given grid size.
pub fn global_extent(id: &str, width: usize, height: usize) -> ExtentRow {
    ExtentRow {
        id: id.to_string(),
        width,
        height,
        depth: None,
        scale_x: 360.0 / width as f64,
        shear_x: 0.0,
        translate_x: -180.0,
        shear_y: 0.0,
        scale_y: -180.0 / height as f64,
        translate_y: 90.0,
        horizontal_srid: 4326,
        vertical_srid: None,
        vertical_ordinates: Vec::new(),
    }
}

/// Regional extent: `width x height` pixels of `pixel` degrees starting at
/// the given upper-left corner.
pub fn regional_extent(
    id: &str,
    upper_left: (f64, f64),
    width: usize,
    height: usize,
    pixel: f64,
) -> ExtentRow {
    ExtentRow {
        id: id.to_string(),
        width,
        height,
        depth: None,
        scale_x: pixel,
        shear_x: 0.0,
        translate_x: upper_left.0,
        shear_y: 0.0,
        scale_y: -pixel,
        translate_y: upper_left.1,
        horizontal_srid: 4326,
        vertical_srid: None,
        vertical_ordinates: Vec::new(),
    }
}

/// Layer row without a fallback.
pub fn layer_row(name: &str) -> LayerRow {
    LayerRow {
        name: name.to_string(),
        thematic: None,
        procedure: None,
        period_seconds: Some(86_400),
        fallback: None,
    }
}

/// Series row with a plain local naming convention.
pub fn series_row(layer: &str, name: &str, format: &str) -> SeriesRow {
    SeriesRow {
        layer: layer.to_string(),
        name: name.to_string(),
        format: format.to_string(),
        root: "/data".to_string(),
        subdirectory: layer.to_lowercase(),
        extension: "bin".to_string(),
        host: None,
    }
}

/// Daily coverage row valid for `[day, day+1)`.
pub fn daily_coverage(series: &str, filename: &str, day: u32, extent_id: &str) -> CoverageRow {
    CoverageRow {
        series: series.to_string(),
        filename: filename.to_string(),
        slice_index: 1,
        band: 0,
        start_time: Some(june_day(day)),
        end_time: Some(june_day(day + 1)),
        extent_id: extent_id.to_string(),
        visible: true,
    }
}

/// In-memory store with an `SST` layer carrying two detail levels.
///
/// Layout:
/// - extent `sst-fine`: 1440x720 global grid (0.25 degrees)
/// - extent `sst-coarse`: 360x180 global grid (1 degree)
/// - series `sst-fine` and `sst-coarse`, both format `raw`
/// - days 1..=3 of June 2019, one coverage per series per day
pub fn seeded_sst_store() -> MemoryConnection {
    let store = MemoryConnection::new();

    store.insert_layer(layer_row("SST"));
    store.insert_series(series_row("SST", "sst-fine", "raw"));
    store.insert_series(series_row("SST", "sst-coarse", "raw"));
    store.insert_extent(global_extent("sst-fine", 1440, 720));
    store.insert_extent(global_extent("sst-coarse", 360, 180));

    for day in 1..=3 {
        store.insert_coverage(daily_coverage(
            "sst-fine",
            &format!("sst_fine_201906{:02}", day),
            day,
            "sst-fine",
        ));
        store.insert_coverage(daily_coverage(
            "sst-coarse",
            &format!("sst_coarse_201906{:02}", day),
            day,
            "sst-coarse",
        ));
    }

    store
}
