use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use refdex_core::{BackoffPolicy, ProgressContext, SharedProgress};
use refdex_crossref::decode::open_source;
use refdex_crossref::engine::BulkDoc;
use refdex_crossref::{
    Compression, DataSource, Designator, Format, IngestError, MemoryEngine, PipelineConfig,
    SinkConfig, enumerate, load, run,
};
use tempfile::TempDir;

fn work(doi: &str, year: i32) -> String {
    format!(
        r#"{{"DOI":"{doi}","title":["Title of {doi}"],"container-title":["Journal"],"author":[{{"family":"Smith","sequence":"first"}}],"issued":{{"date-parts":[[{year}]]}}}}"#
    )
}

fn enveloped(items: &[String]) -> String {
    format!(
        r#"{{"status":"ok","message-type":"work-list","items":[{}]}}"#,
        items.join(",")
    )
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), GzLevel::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn write(dir: &Path, name: &str, data: &[u8]) {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// a.json enveloped, b.ndjson, c.json.gz gzip NDJSON; two works each
fn dump_dir(b_ndjson: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    let a = enveloped(&[work("10.1/a0", 2001), work("10.1/a1", 2002)]);
    write(tmp.path(), "a.json", a.as_bytes());
    write(tmp.path(), "b.ndjson", b_ndjson.as_bytes());
    let c = format!("{}\n{}\n", work("10.1/c0", 2005), work("10.1/c1", 2006));
    write(tmp.path(), "nested/c.json.gz", &gzip(c.as_bytes()));
    // ignored extensions
    write(tmp.path(), "README.txt", b"not a dump");
    tmp
}

fn config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_capacity: 8,
        index: "crossref".into(),
        sink: SinkConfig {
            flush_bytes: 1_000,
            flush_interval: Duration::from_millis(50),
            retry: BackoffPolicy {
                max_retries: 2,
                base: Duration::from_millis(1),
                multiplier: 2.0,
                cap: Duration::from_millis(2),
            },
            ..SinkConfig::default()
        },
    }
}

fn progress() -> SharedProgress {
    Arc::new(ProgressContext::hidden())
}

fn sorted_ids(docs: Vec<BulkDoc>) -> Vec<String> {
    let mut ids: Vec<String> = docs.into_iter().filter_map(|d| d.id).collect();
    ids.sort();
    ids
}

#[test]
fn directory_of_mixed_sources() {
    let b = format!("{}\n{}\n", work("10.1/b0", 2003), work("10.1/b1", 2004));
    let tmp = dump_dir(&b);
    let sources = enumerate(
        Designator::Dir(tmp.path().to_path_buf()),
        Format::Unknown,
        Compression::Unknown,
    )
    .unwrap();
    assert_eq!(sources.len(), 3);

    let engine = Arc::new(MemoryEngine::new());
    let result = run(sources, &config(4), engine.clone(), &progress());

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.sources_processed, 3);
    assert_eq!(result.records_decoded, 6);
    assert_eq!(result.records_indexed, 6);
    assert_eq!(result.records_failed, 0);
    assert_eq!(
        sorted_ids(engine.documents("crossref")),
        ["10.1/a0", "10.1/a1", "10.1/b0", "10.1/b1", "10.1/c0", "10.1/c1"]
    );
}

#[test]
fn indexed_documents_carry_the_projection() {
    let b = format!("{}\n", work("10.1/b0", 2003));
    let tmp = dump_dir(&b);
    let sources = load(
        None,
        Some(tmp.path()),
        Format::Unknown,
        Compression::Unknown,
        Box::new(std::io::empty()),
    )
    .unwrap();
    let engine = Arc::new(MemoryEngine::new());
    assert!(run(sources, &config(2), engine.clone(), &progress()).is_success());

    let doc = engine
        .documents("crossref")
        .into_iter()
        .find(|d| d.id.as_deref() == Some("10.1/b0"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&doc.body).unwrap();
    assert_eq!(body["DOI"], "10.1/b0");
    assert_eq!(body["year"], 2003);
    assert_eq!(body["journal"][0], "Journal");
    assert_eq!(body["abbreviated_journal"], serde_json::json!([]));
    // absent fields leave empty slots between the separators
    let bibliographic = body["bibliographic"].as_str().unwrap();
    assert_eq!(
        bibliographic.split_whitespace().collect::<Vec<_>>(),
        ["Smith", "Title", "of", "10.1/b0", "Journal", "2003"]
    );
}

#[test]
fn malformed_source_fails_the_run() {
    let b = format!("{}\n{{\"DOI\": \"10.1/b1\", \"title\": [}}\n", work("10.1/b0", 2003));
    let tmp = dump_dir(&b);
    let sources = enumerate(
        Designator::Dir(tmp.path().to_path_buf()),
        Format::Unknown,
        Compression::Unknown,
    )
    .unwrap();

    let engine = Arc::new(MemoryEngine::new());
    let result = run(sources, &config(4), engine.clone(), &progress());

    let err = result.error.as_ref().expect("run should fail");
    match &err.headline {
        IngestError::Decode { source, index, .. } => {
            assert!(source.ends_with("b.ndjson"), "{source}");
            assert_eq!(*index, 1);
        }
        other => panic!("unexpected headline: {other}"),
    }
    assert_eq!(err.len(), 1);
    assert_eq!(result.sources_failed, 1);
    // b0 is always decoded before the error; how much of a and c gets in
    // depends on when the cancellation is observed
    assert!(
        (1..=5).contains(&result.records_indexed),
        "indexed {}",
        result.records_indexed
    );
    assert_eq!(result.records_indexed as usize, engine.doc_count("crossref"));
}

#[test]
fn stdin_requires_declared_shape() {
    let err = load(
        Some(Path::new("-")),
        None,
        Format::Unknown,
        Compression::None,
        Box::new(std::io::empty()),
    )
    .unwrap_err();
    assert!(matches!(err, IngestError::Config(_)), "{err}");
}

#[test]
fn stdin_stream_is_indexed() {
    let data = enveloped(&[work("10.1/s0", 2010), work("10.1/s1", 2011)]);
    let stdin = Cursor::new(gzip(data.as_bytes()));
    let sources = load(
        Some(Path::new("-")),
        None,
        Format::Json,
        Compression::Gzip,
        Box::new(stdin),
    )
    .unwrap();
    assert_eq!(sources[0].label(), "<stdin>");

    let engine = Arc::new(MemoryEngine::new());
    let result = run(sources, &config(1), engine.clone(), &progress());
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(
        sorted_ids(engine.documents("crossref")),
        ["10.1/s0", "10.1/s1"]
    );
}

#[test]
fn declared_format_applies_to_every_file() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "one.json",
        format!("{}\n", work("10.1/x0", 2000)).as_bytes(),
    );
    write(
        tmp.path(),
        "two.json",
        format!("{}\n", work("10.1/x1", 2000)).as_bytes(),
    );
    let sources = enumerate(
        Designator::Dir(tmp.path().to_path_buf()),
        Format::Ndjson,
        Compression::Unknown,
    )
    .unwrap();
    assert!(sources.iter().all(|s| s.format == Format::Ndjson));

    let engine = Arc::new(MemoryEngine::new());
    let result = run(sources, &config(2), engine, &progress());
    assert!(result.is_success());
    assert_eq!(result.records_indexed, 2);
}

#[test]
fn gzip_decodes_like_plain() {
    let tmp = TempDir::new().unwrap();
    let data: String = (0..50)
        .map(|i| work(&format!("10.1/g{i}"), 1990 + i) + "\n")
        .collect();
    write(tmp.path(), "plain.ndjson", data.as_bytes());
    write(tmp.path(), "packed.ndjson.gz", &gzip(data.as_bytes()));

    let decode = |name: &str| -> Vec<String> {
        let source = DataSource::file(tmp.path().join(name), Format::Unknown, Compression::Unknown);
        let opened = open_source(source).unwrap();
        assert_eq!(opened.format, Format::Ndjson);
        opened.records.map(|r| r.unwrap().doi).collect()
    };
    let plain = decode("plain.ndjson");
    assert_eq!(plain.len(), 50);
    assert_eq!(plain, decode("packed.ndjson.gz"));
}

#[test]
fn engine_outage_is_fatal() {
    let b = format!("{}\n{}\n", work("10.1/b0", 2003), work("10.1/b1", 2004));
    let tmp = dump_dir(&b);
    let sources = enumerate(
        Designator::Dir(tmp.path().to_path_buf()),
        Format::Unknown,
        Compression::Unknown,
    )
    .unwrap();

    let engine = Arc::new(MemoryEngine::new().always_failing(Some(503)));
    let result = run(sources, &config(2), engine.clone(), &progress());

    let err = result.error.as_ref().expect("run should fail");
    assert!(matches!(err.headline, IngestError::Sink(_)), "{err}");
    assert_eq!(result.records_indexed, 0);
    // first attempt plus two retries for at least one batch
    assert!(engine.bulk_calls() >= 3);
}

#[test]
fn missing_directory_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = enumerate(
        Designator::Dir(tmp.path().join("absent")),
        Format::Unknown,
        Compression::Unknown,
    )
    .unwrap_err();
    assert!(matches!(err, IngestError::Io { .. }), "{err}");
}
