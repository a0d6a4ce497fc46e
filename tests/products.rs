mod common;

use bandwise::backend::memory::{CentroidClassifier, ClassCentroid, MemoryBackend};
use bandwise::backend::RasterImage;
use bandwise::{
    ClusterAlgorithm, Error, FalseColorComposite, Formula, ImageSource, MemoryImage,
    PcaBandPolicy, ProductKind, ProductRequest, RecipeRegistry, SelectedImage, SensorVariant,
    Settings, SpectralIndex, SupervisedAlgorithm, get_recipe, run_product,
};
use serde_json::json;

use common::*;

fn run(
    backend: &MemoryBackend,
    selected: &SelectedImage<MemoryImage>,
    request: ProductRequest,
) -> bandwise::Result<bandwise::ProductOutput<MemoryImage>> {
    let settings = Settings::default();
    let registry = RecipeRegistry::new(settings.model_root.clone());
    run_product(backend, &registry, &settings, selected, &request)
}

/// Landsat 8/9 SR image whose bands vary independently across the grid.
fn textured_l89_sr() -> MemoryImage {
    from_fn(landsat_grid(), &L89_SR_BANDS, |b, r, c| {
        let (r, c) = (r as f64, c as f64);
        match b {
            0 => 0.05 + 0.01 * r,
            1 => 0.04 + 0.02 * c,
            2 => 0.03 + 0.001 * r * c,
            3 => 0.02 + 0.003 * r * r,
            4 => 0.3 + 0.01 * (r + 2.0 * c).sin(),
            5 => 0.2 + 0.004 * c * c,
            6 => 0.1 + 0.002 * (r - c).abs(),
            7 => 300.0 + r,
            _ => 0.0,
        }
    })
}

#[test]
fn false_color_selects_variant_triple_and_shared_stretch() {
    let backend = MemoryBackend::new();
    let selected = SelectedImage::new(textured_l89_sr());
    let out = run(
        &backend,
        &selected,
        ProductRequest::FalseColor {
            composite: FalseColorComposite::Agriculture,
        },
    )
    .unwrap();

    assert_eq!(out.kind, ProductKind::FalseColor);
    assert_eq!(out.variant, SensorVariant::Landsat89Sr);
    assert_eq!(out.image.band_names(), ["SR_B6", "SR_B5", "SR_B2"]);
    assert_eq!(out.vis.bands, ["SR_B6", "SR_B5", "SR_B2"]);
    let (min, max) = (out.vis.min.unwrap(), out.vis.max.unwrap());
    assert!(min < max);
    // SR_B2 holds the smallest values, SR_B6 the largest.
    assert!(min <= 0.04 + 1e-9);
    assert!(max >= 0.3);
}

#[test]
fn false_color_name_missing_for_variant_is_an_error() {
    let backend = MemoryBackend::new();
    let selected = SelectedImage::new(textured_l89_sr());
    let err = run(
        &backend,
        &selected,
        ProductRequest::FalseColor {
            composite: FalseColorComposite::Geology,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedCombination { .. }));
}

#[test]
fn sentinel2_ndvi_uses_b8_and_b4() {
    let backend = MemoryBackend::new();
    let image = uniform(sentinel_grid(), &S2_BANDS, 0.2, &[("B8", 0.5), ("B4", 0.1)]);
    let selected = SelectedImage::new(image).with_source(ImageSource::Sentinel2);
    let out = run(
        &backend,
        &selected,
        ProductRequest::SpectralIndex {
            index: SpectralIndex::Ndvi,
        },
    )
    .unwrap();

    assert_eq!(out.variant, SensorVariant::Sentinel2);
    assert_eq!(out.recipe.input_bands(), ["B8", "B4"]);
    assert_eq!(out.image.band_names(), ["NDVI"]);
    assert_close(out.image.value("NDVI", 2, 7).unwrap(), 0.4 / 0.6);
    assert_close(out.vis.min.unwrap(), 0.4 / 0.6);
    assert_close(out.vis.max.unwrap(), 0.4 / 0.6);
    assert_eq!(
        out.vis.palette,
        Some(vec!["blue".to_string(), "white".to_string(), "green".to_string()])
    );
}

#[test]
fn rvi_is_a_band_ratio() {
    let backend = MemoryBackend::new();
    let image = uniform(landsat_grid(), &L89_SR_BANDS, 0.1, &[("SR_B5", 0.4), ("SR_B4", 0.2)]);
    let out = run(
        &backend,
        &SelectedImage::new(image),
        ProductRequest::SpectralIndex {
            index: SpectralIndex::Rvi,
        },
    )
    .unwrap();
    assert_eq!(out.image.band_names(), ["RVI"]);
    assert_close(out.image.value("RVI", 0, 0).unwrap(), 2.0);
}

#[test]
fn index_stretch_falls_back_when_region_is_empty() {
    let backend = MemoryBackend::new();
    let image = uniform(landsat_grid(), &L89_SR_BANDS, 0.1, &[("SR_B5", 0.4)]);
    let selected = SelectedImage::new(image).with_region(far_away());
    let out = run(
        &backend,
        &selected,
        ProductRequest::SpectralIndex {
            index: SpectralIndex::Ndwi,
        },
    )
    .unwrap();
    assert_eq!(out.vis.min, Some(-1.0));
    assert_eq!(out.vis.max, Some(1.0));
}

#[test]
fn unknown_layout_blocks_every_product() {
    let backend = MemoryBackend::new();
    let image = constant(landsat_grid(), &[("VV", 0.1), ("VH", 0.2)]);
    let err = run(
        &backend,
        &SelectedImage::new(image),
        ProductRequest::Pca {
            policy: PcaBandPolicy::Recipe,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnrecognizedSensorFormat { .. }));
}

#[test]
fn pca_yields_one_unit_variance_component_per_input_band() {
    let backend = MemoryBackend::new();
    let out = run(
        &backend,
        &SelectedImage::new(textured_l89_sr()),
        ProductRequest::Pca {
            policy: PcaBandPolicy::Recipe,
        },
    )
    .unwrap();

    assert_eq!(out.recipe.input_bands().len(), 4);
    assert_eq!(out.image.band_names(), ["pc1", "pc2", "pc3", "pc4"]);
    assert_eq!(out.vis.bands, ["pc1", "pc2", "pc3"]);
    assert_eq!((out.vis.min, out.vis.max), (Some(-2.0), Some(2.0)));

    let eigenvalues: Vec<f64> = ["pc1", "pc2", "pc3", "pc4"]
        .iter()
        .map(|pc| out.summary[&format!("{pc}_eigenvalue")])
        .collect();
    assert!(eigenvalues.windows(2).all(|w| w[0] >= w[1]));

    let pc1 = out.image.band("pc1").unwrap();
    let n = pc1.len() as f64;
    let mean = pc1.sum() / n;
    let variance = pc1.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    assert!(mean.abs() < 1e-9);
    assert!((variance - 1.0).abs() < 1e-6, "variance {variance}");
}

#[test]
fn pca_over_all_bands_only_on_request() {
    let backend = MemoryBackend::new();
    let out = run(
        &backend,
        &SelectedImage::new(textured_l89_sr()),
        ProductRequest::Pca {
            policy: PcaBandPolicy::AllBands,
        },
    )
    .unwrap();
    assert_eq!(out.image.band_names().len(), L89_SR_BANDS.len());
}

#[test]
fn pansharpen_replaces_value_with_panchromatic_band() {
    let backend = MemoryBackend::new();
    let image = uniform(
        landsat_grid(),
        &L89_TOA_BANDS,
        0.1,
        &[("B4", 0.2), ("B3", 0.1), ("B2", 0.05), ("B8", 0.4)],
    );
    let out = run(&backend, &SelectedImage::new(image), ProductRequest::Pansharpen).unwrap();

    assert_eq!(out.variant, SensorVariant::Landsat89Toa);
    assert_eq!(out.image.band_names(), ["red", "green", "blue"]);
    assert_close(out.image.value("red", 1, 1).unwrap(), 0.4);
    assert_close(out.image.value("green", 1, 1).unwrap(), 0.2);
    assert_close(out.image.value("blue", 1, 1).unwrap(), 0.1);
    assert_eq!(out.vis.bands, ["red", "green", "blue"]);
    assert_close(out.vis.min.unwrap(), 0.1);
    assert_close(out.vis.max.unwrap(), 0.4);
}

#[test]
fn pansharpen_needs_a_panchromatic_layout() {
    let backend = MemoryBackend::new();
    let err = run(
        &backend,
        &SelectedImage::new(textured_l89_sr()),
        ProductRequest::Pansharpen,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedCombination {
            kind: ProductKind::Pansharpen,
            ..
        }
    ));
}

/// Left half dark, right half bright in every band.
fn two_halves(names: &[&str]) -> MemoryImage {
    from_fn(landsat_grid(), names, |_, _, c| if c < COLS / 2 { 0.1 } else { 0.5 })
}

#[test]
fn kmeans_separates_two_surfaces() {
    let backend = MemoryBackend::new();
    let out = run(
        &backend,
        &SelectedImage::new(two_halves(&L89_SR_BANDS)),
        ProductRequest::UnsupervisedClassify {
            algorithm: ClusterAlgorithm::KMeans,
            clusters: 2,
        },
    )
    .unwrap();

    assert_eq!(out.image.band_names(), ["cluster"]);
    let left = out.image.value("cluster", 0, 0).unwrap();
    let right = out.image.value("cluster", 0, COLS - 1).unwrap();
    assert_ne!(left, right);
    for r in 0..ROWS {
        for c in 0..COLS {
            let expected = if c < COLS / 2 { left } else { right };
            assert_eq!(out.image.value("cluster", r, c), Some(expected));
        }
    }

    let display = out.display.expect("random colour rendering");
    assert_eq!(display.band_names(), ["vis-red", "vis-green", "vis-blue"]);
    assert_eq!(out.vis.bands, ["vis-red", "vis-green", "vis-blue"]);
    assert_eq!(out.vis.min, None);
    assert_eq!(out.summary["samples"], (ROWS * COLS) as f64);
}

#[test]
fn cascade_and_xmeans_produce_cluster_ids() {
    let backend = MemoryBackend::new();
    for algorithm in [ClusterAlgorithm::CascadeKMeans, ClusterAlgorithm::XMeans] {
        let out = run(
            &backend,
            &SelectedImage::new(two_halves(&L89_TOA_BANDS)),
            ProductRequest::UnsupervisedClassify {
                algorithm,
                clusters: 2,
            },
        )
        .unwrap();
        assert_eq!(out.image.band_names(), ["cluster"]);
        assert_ne!(
            out.image.value("cluster", 0, 0),
            out.image.value("cluster", 0, COLS - 1)
        );
    }
}

#[test]
fn cluster_count_outside_range_is_rejected() {
    let backend = MemoryBackend::new();
    let err = run(
        &backend,
        &SelectedImage::new(two_halves(&L89_SR_BANDS)),
        ProductRequest::UnsupervisedClassify {
            algorithm: ClusterAlgorithm::KMeans,
            clusters: 1,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { arg: "clusters", .. }));
}

const L8_SR_FEATURES: [&str; 7] = ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"];

fn landsat8_scene() -> MemoryImage {
    let mut props = std::collections::BTreeMap::new();
    props.insert("SPACECRAFT_ID".to_string(), json!("LANDSAT_8"));
    two_halves(&L89_SR_BANDS).with_properties(props)
}

fn classifier_backend() -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    let model = CentroidClassifier {
        features: L8_SR_FEATURES.iter().map(|b| b.to_string()).collect(),
        classes: vec![
            ClassCentroid {
                class: 0,
                centroid: vec![0.9; 7],
            },
            ClassCentroid {
                class: 1,
                centroid: vec![0.12; 7],
            },
            ClassCentroid {
                class: 2,
                centroid: vec![0.45; 7],
            },
        ],
    };
    backend
        .register_model("models/L8SR_random_forest", model)
        .unwrap();
    backend
}

#[test]
fn supervised_classification_uses_satellite_specific_model() {
    let backend = classifier_backend();
    let out = run(
        &backend,
        &SelectedImage::new(landsat8_scene()),
        ProductRequest::SupervisedClassify {
            algorithm: SupervisedAlgorithm::RandomForest,
        },
    )
    .unwrap();

    assert_eq!(out.recipe.input_bands(), L8_SR_FEATURES);
    assert_eq!(out.image.band_names(), ["classification"]);
    assert_eq!(out.image.value("classification", 3, 0), Some(1.0));
    assert_eq!(out.image.value("classification", 3, COLS - 1), Some(2.0));
    assert_eq!((out.vis.min, out.vis.max), (Some(0.0), Some(2.0)));
    assert_eq!(out.vis.palette.as_ref().map(Vec::len), Some(3));
}

#[test]
fn supervised_classification_reports_missing_model() {
    let backend = classifier_backend();
    let err = run(
        &backend,
        &SelectedImage::new(landsat8_scene()),
        ProductRequest::SupervisedClassify {
            algorithm: SupervisedAlgorithm::ExtraTrees,
        },
    )
    .unwrap_err();
    match err {
        Error::ModelNotFound { asset_id } => assert_eq!(asset_id, "models/L8SR_extratrees"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn supervised_classification_needs_a_spacecraft_id() {
    let backend = classifier_backend();
    let err = run(
        &backend,
        &SelectedImage::new(two_halves(&L89_SR_BANDS)),
        ProductRequest::SupervisedClassify {
            algorithm: SupervisedAlgorithm::RandomForest,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnrecognizedImageType(_)));
}

#[test]
fn lst_converts_kelvin_and_reports_summary() {
    let backend = MemoryBackend::new();
    let image = from_fn(landsat_grid(), &L89_SR_BANDS, |b, r, _| {
        if L89_SR_BANDS[b] == "ST_B10" {
            // 20 °C on the top row rising to 29 °C on the bottom row.
            293.15 + r as f64
        } else {
            0.1
        }
    });
    let out = run(&backend, &SelectedImage::new(image), ProductRequest::Lst).unwrap();

    assert_eq!(out.image.band_names(), ["LST"]);
    assert_close(out.image.value("LST", 0, 0).unwrap(), 20.0);
    assert_close(out.summary["min"], 20.0);
    assert_close(out.summary["max"], 29.0);
    assert_close(out.summary["mean"], 24.5);
    assert_eq!((out.vis.min, out.vis.max), (Some(15.0), Some(50.0)));
    assert_eq!(out.vis.palette.as_ref().map(Vec::len), Some(29));
}

#[test]
fn lst_falls_back_to_band_six_on_landsat7() {
    let backend = MemoryBackend::new();
    let image = uniform(landsat_grid(), &L7_SR_BANDS, 0.1, &[("ST_B6", 303.15)]);
    let out = run(&backend, &SelectedImage::new(image), ProductRequest::Lst).unwrap();
    assert_eq!(out.variant, SensorVariant::Landsat7Sr);
    assert_close(out.summary["mean"], 30.0);
}

#[test]
fn lst_is_unsupported_for_toa() {
    let backend = MemoryBackend::new();
    let image = uniform(landsat_grid(), &L89_TOA_BANDS, 0.1, &[]);
    let err = run(&backend, &SelectedImage::new(image), ProductRequest::Lst).unwrap_err();
    assert!(matches!(err, Error::UnsupportedCombination { .. }));
}

#[test]
fn supervised_recipes_resolve_through_get_recipe() {
    let registry = RecipeRegistry::default();
    let kind = ProductKind::SupervisedClassify;

    let recipe = get_recipe(
        &registry,
        SensorVariant::Landsat7Toa,
        kind,
        Some("extratrees"),
        Some("LANDSAT_7"),
    )
    .unwrap();
    let Formula::Classifier { model_asset, .. } = &recipe.formula else {
        panic!("unexpected formula {:?}", recipe.formula);
    };
    assert!(model_asset.ends_with("L7TOA_extratrees"), "{model_asset}");

    let default_algorithm =
        get_recipe(&registry, SensorVariant::Landsat89Sr, kind, None, Some("LANDSAT_8")).unwrap();
    assert_eq!(
        default_algorithm,
        registry
            .lookup_supervised(
                SensorVariant::Landsat89Sr,
                Some("LANDSAT_8"),
                SupervisedAlgorithm::RandomForest
            )
            .unwrap()
    );

    let err = get_recipe(&registry, SensorVariant::Landsat89Sr, kind, None, None).unwrap_err();
    assert!(matches!(err, Error::UnrecognizedImageType(_)));

    let ndvi = get_recipe(
        &registry,
        SensorVariant::Sentinel2,
        ProductKind::SpectralIndex,
        Some("NDVI"),
        Some("LANDSAT_8"),
    )
    .unwrap();
    assert_eq!(ndvi.input_bands(), ["B8", "B4"]);
}
