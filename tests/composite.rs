mod common;

use bandwise::backend::memory::{GridTransform, MemoryBackend};
use bandwise::backend::RasterImage;
use bandwise::core::processing::composite::apply_scale_factors;
use bandwise::{
    CompositeRequest, DateRange, Error, SensorProduct, SensorVariant, build_composite,
    resolve_variant,
};
use serde_json::json;

use common::*;

const L9_SR: &str = "LANDSAT/LC09/C02/T1_L2";
const L8_TOA: &str = "LANDSAT/LC08/C02/T1_TOA";
const S2_SR: &str = "COPERNICUS/S2_SR_HARMONIZED";
const S2_CLOUDS: &str = "COPERNICUS/S2_CLOUD_PROBABILITY";

fn landsat_sr_scene(id: &str, date: &str, sr_b4: f64, st_b10: f64, qa: f64) -> bandwise::MemoryImage {
    let image = uniform(
        landsat_grid(),
        &L89_SR_BANDS,
        10000.0,
        &[("SR_B4", sr_b4), ("ST_B10", st_b10), ("QA_PIXEL", qa)],
    );
    scene(
        image,
        id,
        date,
        &[
            ("SPACECRAFT_ID", json!("LANDSAT_9")),
            ("LANDSAT_PRODUCT_ID", json!(format!("{id}_PRODUCT"))),
        ],
    )
}

fn landsat_backend() -> MemoryBackend {
    let far = GridTransform::new(50_000.0, 50_300.0, 30.0);
    let outside = scene(
        uniform(far, &L89_SR_BANDS, 1.0, &[("QA_PIXEL", 0.0)]),
        "LC09_E",
        "2023-06-10",
        &[],
    );
    let mut backend = MemoryBackend::new();
    backend.insert_collection(
        L9_SR,
        vec![
            landsat_sr_scene("LC09_A", "2023-06-05", 10000.0, 40000.0, 0.0),
            landsat_sr_scene("LC09_B", "2023-06-20", 20000.0, 42000.0, 0.0),
            // Cloud bit set everywhere.
            landsat_sr_scene("LC09_C", "2023-07-01", 60000.0, 50000.0, 8.0),
            landsat_sr_scene("LC09_D", "2024-01-01", 99999.0, 50000.0, 0.0),
            outside,
        ],
    );
    backend
}

fn request(product: SensorProduct, start: &str, end: &str, grid: GridTransform) -> CompositeRequest {
    CompositeRequest {
        product,
        region: footprint(grid),
        dates: DateRange::parse(start, end).unwrap(),
        max_cloud_probability: 20.0,
    }
}

#[test]
fn landsat_sr_composite_masks_clouds_then_rescales() {
    let backend = landsat_backend();
    let composite = build_composite(
        &backend,
        &request(SensorProduct::Landsat9Sr, "2023-06-01", "2023-08-01", landsat_grid()),
    )
    .unwrap()
    .expect("scenes in range");

    assert_eq!(composite.scene_count, 3);
    let image = &composite.image;
    // Median of the two clear scenes, then the optical scale factor.
    assert_close(image.value("SR_B4", 0, 0).unwrap(), 15000.0 * 0.0000275 - 0.2);
    assert_close(image.value("SR_B1", 5, 5).unwrap(), 10000.0 * 0.0000275 - 0.2);
    assert_close(image.value("ST_B10", 9, 9).unwrap(), 41000.0 * 0.00341802 + 149.0);
    assert_close(image.value("QA_PIXEL", 0, 0).unwrap(), 0.0);

    assert_eq!(
        resolve_variant(Some(composite.source()), &composite.bands()),
        SensorVariant::Landsat89Sr
    );
}

#[test]
fn landsat_composite_carries_first_scene_metadata() {
    let backend = landsat_backend();
    let composite = build_composite(
        &backend,
        &request(SensorProduct::Landsat9Sr, "2023-06-01", "2023-08-01", landsat_grid()),
    )
    .unwrap()
    .unwrap();

    assert_eq!(composite.metadata.spacecraft_id.as_deref(), Some("LANDSAT_9"));
    assert_eq!(composite.metadata.product_id.as_deref(), Some("LC09_A_PRODUCT"));
    assert_eq!(composite.metadata.asset_id, None);
    assert_eq!(
        composite.image.property_str("SPACECRAFT_ID").as_deref(),
        Some("LANDSAT_9")
    );
}

#[test]
fn composite_is_clipped_to_the_region() {
    let backend = landsat_backend();
    let mut req = request(SensorProduct::Landsat9Sr, "2023-06-01", "2023-08-01", landsat_grid());
    // Left half of the grid only.
    req.region = bandwise::Geometry::rectangle(bandwise::backend::Bounds::new(0.0, 0.0, 150.0, 300.0));
    let composite = build_composite(&backend, &req).unwrap().unwrap();

    assert!(composite.image.value("SR_B4", 0, 0).is_some());
    assert!(composite.image.value("SR_B4", 0, 9).is_none());
    assert_eq!(composite.image.valid_pixel_count(), ROWS * COLS / 2);
}

#[test]
fn toa_composite_is_not_rescaled() {
    let mut backend = MemoryBackend::new();
    let toa = |id: &str, date: &str, b4: f64| {
        scene(
            uniform(landsat_grid(), &L89_TOA_BANDS, 0.2, &[("B4", b4), ("QA_PIXEL", 0.0)]),
            id,
            date,
            &[("SPACECRAFT_ID", json!("LANDSAT_8"))],
        )
    };
    backend.insert_collection(
        L8_TOA,
        vec![toa("LC08_A", "2023-05-01", 0.1), toa("LC08_B", "2023-05-17", 0.3)],
    );

    let composite = build_composite(
        &backend,
        &request(SensorProduct::Landsat8Toa, "2023-05-01", "2023-06-01", landsat_grid()),
    )
    .unwrap()
    .unwrap();

    assert_close(composite.image.value("B4", 3, 3).unwrap(), 0.2);
    assert_close(composite.image.value("B10", 3, 3).unwrap(), 0.2);
    assert_eq!(
        resolve_variant(Some(composite.source()), &composite.bands()),
        SensorVariant::Landsat89Toa
    );
}

#[test]
fn empty_collection_is_no_image_not_an_error() {
    let backend = landsat_backend();
    let result = build_composite(
        &backend,
        &request(SensorProduct::Landsat9Sr, "2020-01-01", "2020-02-01", landsat_grid()),
    )
    .unwrap();
    assert!(result.is_none());
}

#[test]
fn missing_collection_is_reported_verbatim() {
    let backend = MemoryBackend::new();
    let err = build_composite(
        &backend,
        &request(SensorProduct::Landsat7Sr, "2023-01-01", "2023-02-01", landsat_grid()),
    )
    .unwrap_err();
    match err {
        Error::Backend(message) => assert!(message.contains("LANDSAT/LE07/C02/T1_L2")),
        other => panic!("unexpected error {other:?}"),
    }
}

fn sentinel_backend() -> MemoryBackend {
    let grid = sentinel_grid();
    let optical = |id: &str, b4: f64| {
        scene(
            uniform(grid, &S2_BANDS, 0.1, &[("B4", b4)]),
            id,
            "2023-06-15",
            &[("CLOUDY_PIXEL_PERCENTAGE", json!(12.0))],
        )
    };
    let clouds = |id: &str, probability: f64| {
        scene(
            constant(grid, &[("probability", probability)]),
            id,
            "2023-06-15",
            &[],
        )
    };
    let mut backend = MemoryBackend::new();
    backend.insert_collection(
        S2_SR,
        vec![
            optical("s1", 100.0),
            optical("s2", 300.0),
            optical("s3", 700.0),
            // No probability image, so never part of the composite.
            optical("s4", 9999.0),
        ],
    );
    backend.insert_collection(
        S2_CLOUDS,
        vec![clouds("s1", 10.0), clouds("s2", 80.0), clouds("s3", 5.0)],
    );
    backend
}

#[test]
fn sentinel2_composite_masks_by_joined_cloud_probability() {
    let backend = sentinel_backend();
    let composite = build_composite(
        &backend,
        &request(SensorProduct::Sentinel2, "2023-06-01", "2023-07-01", sentinel_grid()),
    )
    .unwrap()
    .unwrap();

    // s2 is cloudy and s4 has no partner; median of s1 and s3.
    assert_eq!(composite.scene_count, 3);
    assert_close(composite.image.value("B4", 4, 4).unwrap(), 400.0);
    assert!(!composite.bands().contains("probability"));
    assert_eq!(composite.metadata, Default::default());
    assert_eq!(
        resolve_variant(Some(composite.source()), &composite.bands()),
        SensorVariant::Sentinel2
    );
}

#[test]
fn cloud_probability_threshold_is_strict() {
    let backend = sentinel_backend();
    let mut req = request(SensorProduct::Sentinel2, "2023-06-01", "2023-07-01", sentinel_grid());
    req.max_cloud_probability = 10.0;
    let composite = build_composite(&backend, &req).unwrap().unwrap();

    // s1 sits exactly at the threshold and is masked too.
    assert_close(composite.image.value("B4", 0, 0).unwrap(), 700.0);
}

#[test]
fn sentinel2_scenes_without_cloud_probability_are_dropped() {
    let grid = sentinel_grid();
    let mut backend = MemoryBackend::new();
    backend.insert_collection(
        S2_SR,
        vec![scene(
            uniform(grid, &S2_BANDS, 0.1, &[("B4", 9999.0)]),
            "s_alone",
            "2023-06-15",
            &[],
        )],
    );
    backend.insert_collection(S2_CLOUDS, vec![]);

    let result = build_composite(
        &backend,
        &request(SensorProduct::Sentinel2, "2023-06-01", "2023-07-01", grid),
    )
    .unwrap();
    assert!(result.is_none());
}

#[test]
fn scale_factors_touch_only_level2_bands() {
    let image = constant(
        landsat_grid(),
        &[("SR_B5", 20000.0), ("ST_B10", 30000.0), ("QA_PIXEL", 21824.0)],
    );
    let scaled = apply_scale_factors(&image).unwrap();
    assert_close(scaled.value("SR_B5", 0, 0).unwrap(), 0.35);
    assert_close(scaled.value("ST_B10", 0, 0).unwrap(), 30000.0 * 0.00341802 + 149.0);
    assert_close(scaled.value("QA_PIXEL", 0, 0).unwrap(), 21824.0);
    assert_eq!(scaled.band_names(), image.band_names());
}
