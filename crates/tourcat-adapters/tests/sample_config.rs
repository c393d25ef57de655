// Checked-in sample config under config/ must stay loadable.

use std::path::PathBuf;

use tourcat_adapters::{
    adapter_for, load_seed_tours, load_source_descriptors, AdapterSettings, SourceKind,
};
use tourcat_storage::FixtureRenderEngine;

fn config_dir() -> PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn sample_sources_load_enabled_descriptors() {
    let descriptors = load_source_descriptors(config_dir().join("sources.yaml")).unwrap();
    let names: Vec<_> = descriptors.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["freewalks", "citywalkers"]);
    assert_eq!(descriptors[0].max_links(), 15);
    assert!(descriptors[1].allows_city("munich"));
    assert!(!descriptors[1].allows_city("Lisbon"));
    assert!(descriptors.iter().all(|d| d.url_template.contains("{city}")));
}

#[test]
fn sample_seed_file_parses() {
    let tours = load_seed_tours(config_dir().join("seed_tours.yaml")).unwrap();
    assert!(tours.len() >= 5);
    assert!(tours.iter().all(|t| !t.title.trim().is_empty()));
}

#[tokio::test]
async fn sample_seed_file_feeds_the_seed_adapter() {
    let settings = AdapterSettings {
        seed_file: config_dir().join("seed_tours.yaml"),
        ..AdapterSettings::default()
    };
    let engine = FixtureRenderEngine::new();
    let listings = adapter_for(&SourceKind::Seed, &settings)
        .scrape(&engine, "Berlin")
        .await
        .unwrap()
        .listings;
    assert_eq!(listings.len(), 2);
    assert!(listings.iter().all(|l| l.city == "Berlin"));
}
