use std::path::Path;
use std::process::Command;

use serde_json::{Value, json};

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

#[test]
fn composite_without_scenes_prints_an_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = dir.path().join("catalog.json");
    let region = dir.path().join("region.geojson");
    write_json(
        &catalog,
        &json!({"collections": {"LANDSAT/LC08/C02/T1_L2": []}}),
    );
    write_json(
        &region,
        &json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [120.0, 0.0], [120.0, 120.0], [0.0, 120.0], [0.0, 0.0]]]
        }),
    );

    let output = Command::new(env!("CARGO_BIN_EXE_bandwise"))
        .arg("composite")
        .arg("--catalog")
        .arg(&catalog)
        .args(["--product", "l8-sr"])
        .arg("--region")
        .arg(&region)
        .args(["--start", "2023-06-01", "--end", "2023-09-01"])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let printed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        printed,
        json!({"product": "L8 Surface Reflectance", "scenes": 0, "image": null})
    );
}
