//! File-backed persistence: published runs survive process restarts,
//! and file fingerprints track the raw inputs on disk.

mod common;

use cityscope_core::config::PipelineConfig;
use cityscope_core::fingerprint::DataFingerprint;
use cityscope_core::pipeline::Pipeline;
use cityscope_core::query::{QueryService, ResidentFilter};
use cityscope_core::store::MetricStore;

#[test]
fn published_run_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("metrics.db");
    let db = db_path.to_str().unwrap();

    let fingerprint = {
        let mut store = MetricStore::open(db).unwrap();
        store.migrate().unwrap();
        let mut ingestor = common::city_fixture();
        Pipeline::new(PipelineConfig::default_test())
            .run(&mut ingestor, &mut store)
            .unwrap()
            .fingerprint
    };

    // Fresh connection, as a restarted query service would open.
    let store = MetricStore::open(db).unwrap();
    store.migrate().unwrap();
    assert!(store.is_published(&fingerprint).unwrap());

    let query = QueryService::latest(&store).unwrap();
    assert_eq!(query.fingerprint(), fingerprint);
    let rows = query.residents(&ResidentFilter::all()).unwrap();
    assert_eq!(rows.display.len(), 20);
}

#[test]
fn reopen_reaches_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("metrics.db");
    let db = db_path.to_str().unwrap();

    let mut store = MetricStore::open(db).unwrap();
    store.migrate().unwrap();
    let mut ingestor = common::city_fixture();
    let fp = Pipeline::new(PipelineConfig::default_test())
        .run(&mut ingestor, &mut store)
        .unwrap()
        .fingerprint;

    let second = store.reopen().unwrap();
    assert!(second.is_published(&fp).unwrap());
}

#[test]
fn file_fingerprint_is_stable_until_the_files_change() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("FinancialJournal.csv");
    let checkins = dir.path().join("CheckinJournal.csv");
    std::fs::write(&journal, "timestamp,participantId,category,amount\n").unwrap();
    std::fs::write(&checkins, "timestamp,participantId,venueId\n").unwrap();

    let a = DataFingerprint::from_files(&[&journal, &checkins]).unwrap();
    let b = DataFingerprint::from_files(&[&journal, &checkins]).unwrap();
    assert_eq!(a, b, "unchanged files must keep their fingerprint");

    // A different length is a different input, whatever the mtime does.
    std::fs::write(&journal, "timestamp,participantId,category,amount,extra\n").unwrap();
    let c = DataFingerprint::from_files(&[&journal, &checkins]).unwrap();
    assert_ne!(a, c);
}
