//! Integration tests — JSON configuration and the file-based entry points.

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use scorelayout::rational::int;
use scorelayout::{
    distribute_files, distribute_with_config, outcome_to_json, stacks_from_json,
    DistributionConfig, Distributor, Stack,
};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("scorelayout-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn six() -> Vec<Stack> {
    (0..6).map(|i| Stack::new(int(8), int(10), i)).collect()
}

#[test]
fn config_drives_geometry_and_constraints() {
    let json = r#"{
        "system_width": "30",
        "constraints": { "forced_breaks": [2] }
    }"#;
    let layout = distribute_with_config(&six(), json).unwrap().into_layout().unwrap();
    assert_eq!(layout.system_breaks.breaks, vec![0, 2, 4, 6]);
}

#[test]
fn preferred_breaks_from_config() {
    let json = r#"{
        "system_width": "30",
        "preferred_breaks": [3],
        "preferred_break_penalty": "500"
    }"#;
    let input: Vec<Stack> = six().into_iter().take(4).collect();
    let layout = distribute_with_config(&input, json).unwrap().into_layout().unwrap();
    assert_eq!(layout.system_breaks.breaks, vec![0, 3, 4]);
}

#[test]
fn distributor_from_config_uses_reflow_limit() {
    let config =
        DistributionConfig::from_json(r#"{ "system_width": "30", "max_reflows": 0 }"#).unwrap();
    let d = Distributor::from_config(&config).unwrap();
    d.distribute(&six()).unwrap();
    assert!(d.reflow(0..1, Vec::new()).is_err());
}

#[test]
fn stacks_and_config_load_from_files() {
    let dir = scratch_dir("files");
    let stacks_path = dir.join("stacks.json");
    let config_path = dir.join("config.json");
    std::fs::write(
        &stacks_path,
        r#"[
            { "min_width": "8", "ideal_width": "10", "source_index": 0 },
            { "min_width": 8, "ideal_width": "10", "source_index": 1, "height": "55" },
            { "min_width": "8", "ideal_width": "10", "source_index": 2 }
        ]"#,
    )
    .unwrap();
    std::fs::write(&config_path, r#"{ "system_width": "24" }"#).unwrap();

    let layout = distribute_files(&stacks_path, &config_path).unwrap().into_layout().unwrap();
    assert_eq!(layout.actual_widths(), vec![int(8), int(8), int(8)]);
    assert_eq!(layout.systems[0].height, int(55));

    let json = outcome_to_json(&scorelayout::Outcome::Feasible(layout)).unwrap();
    assert!(json.contains("\"Feasible\""));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn misspelled_constraint_is_rejected() {
    let json = r#"{ "constraints": { "forced_break": [3] } }"#;
    assert!(DistributionConfig::from_json(json).is_err());

    let json = r#"{ "constraints": { "keep_together": [{ "start": 1, "stop": 3 }] } }"#;
    assert!(DistributionConfig::from_json(json).is_err());
}

#[test]
fn malformed_inputs_are_errors() {
    let bad_width = r#"[{ "min_width": "x", "ideal_width": "1", "source_index": 0 }]"#;
    assert!(stacks_from_json(bad_width).is_err());
    assert!(distribute_with_config(&six(), "{ not json").is_err());
    assert!(DistributionConfig::from_file("/nonexistent/scorelayout.json").is_err());
}
