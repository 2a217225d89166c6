use std::fs;

use super::match_fields::match_and_merge;
use super::*;
use crate::engine::{FormPositions, LayoutTree};
use crate::util::scratch_path;

#[test]
fn flags_override_config_file_values() {
    let path = scratch_path("tuning").with_extension("json");
    fs::write(&path, r#"{"batch_size": 3, "language_hint": "heb"}"#).expect("write config");

    let tuning = TuningArgs {
        config: Some(path.clone()),
        batch_size: Some(8),
        skip_relabel: true,
        ..TuningArgs::default()
    };
    let loaded = pipeline_config(&tuning);
    let _ = fs::remove_file(&path);
    let config = loaded.expect("config");

    assert_eq!(config.batch_size, 8);
    assert_eq!(config.language_hint, "heb");
    assert!(!config.relabel);
}

#[test]
fn invalid_flag_values_are_rejected() {
    let tuning = TuningArgs {
        vertical_overlap_ratio: Some(-0.1),
        ..TuningArgs::default()
    };

    assert!(pipeline_config(&tuning).is_err());
}

#[test]
fn ledger_path_defaults_under_cache_root() {
    let root = Path::new(".cache/formflow");

    assert_eq!(ledger_path(root, None), root.join(DEFAULT_DB_FILE));
    assert_eq!(
        ledger_path(root, Some(Path::new("/tmp/other.sqlite"))),
        PathBuf::from("/tmp/other.sqlite")
    );
}

#[test]
fn match_and_merge_labels_and_deduplicates_saved_engine_output() {
    let positions: FormPositions = serde_json::from_str(
        r#"{"pages": [{"formElements": [
            {"type": "formTextField", "rect": [10, 10, 100, 30]},
            {"type": "formTextField", "rect": [50, 10, 140, 30]},
            {"type": "formCheckBox", "rect": [10, 50, 20, 60]}
        ]}]}"#,
    )
    .expect("positions");
    let layout: LayoutTree = serde_json::from_str(
        r#"{"pages": [{"elements": [
            {"contents": [{"rect": [150, 12, 220, 28], "text": "Phone"}]},
            {"contents": [{"rect": [25, 50, 90, 60], "text": "Subscribe"}]}
        ]}]}"#,
    )
    .expect("layout");

    let elements =
        match_and_merge(&positions, &layout, "seed", &PipelineConfig::default()).expect("match");

    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].label.as_deref(), Some("Subscribe"));
    assert_eq!(elements[1].label.as_deref(), Some("Phone"));
    assert_eq!(elements[1].position.x2, 140.0);
}
