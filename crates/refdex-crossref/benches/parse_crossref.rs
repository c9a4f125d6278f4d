use std::io::Cursor;

use refdex_crossref::decode::RecordReader;
use refdex_crossref::schema::RawRecord;
use refdex_crossref::{Format, SimplifiedRecord};

const RECORDS: usize = 10_000;

fn work(i: usize) -> String {
    format!(
        r#"{{"DOI":"10.1242/jeb.{i}","title":["Muscle performance\n in flight {i}"],"container-title":["Journal of Experimental Biology"],"short-container-title":["J. Exp. Biol."],"author":[{{"given":"Ada","family":"Lovelace","sequence":"first"}},{{"given":"Charles","family":"Babbage","sequence":"additional"}}],"volume":"222","issue":"3","page":"123-130","issued":{{"date-parts":[[2019,2,1]]}},"created":{{"date-parts":[[2018,12,5]]}},"publisher":"The Company of Biologists","type":"journal-article","reference-count":42}}"#
    )
}

fn ndjson() -> Vec<u8> {
    (0..RECORDS)
        .flat_map(|i| (work(i) + "\n").into_bytes())
        .collect()
}

fn enveloped() -> Vec<u8> {
    let items: Vec<String> = (0..RECORDS).map(work).collect();
    format!(
        r#"{{"items":[{}],"total-results":{RECORDS}}}"#,
        items.join(",")
    )
    .into_bytes()
}

#[divan::bench]
fn decode_ndjson(bencher: divan::Bencher) {
    let data = ndjson();
    bencher.bench(|| {
        RecordReader::new(Cursor::new(&data), Format::Ndjson)
            .map(|r| r.unwrap())
            .count()
    });
}

#[divan::bench]
fn decode_enveloped(bencher: divan::Bencher) {
    let data = enveloped();
    bencher.bench(|| {
        RecordReader::new(Cursor::new(&data), Format::Json)
            .map(|r| r.unwrap())
            .count()
    });
}

#[divan::bench]
fn decode_and_transform(bencher: divan::Bencher) {
    let data = ndjson();
    bencher.bench(|| {
        RecordReader::new(Cursor::new(&data), Format::Ndjson)
            .map(|r| SimplifiedRecord::from(r.unwrap()))
            .map(|s| serde_json::to_vec(&s).unwrap().len())
            .sum::<usize>()
    });
}

#[divan::bench]
fn transform_only(bencher: divan::Bencher) {
    let records: Vec<RawRecord> = (0..RECORDS)
        .map(|i| serde_json::from_str(&work(i)).unwrap())
        .collect();
    bencher.bench(|| {
        records
            .iter()
            .map(SimplifiedRecord::from)
            .filter(|s| s.year == 2019)
            .count()
    });
}

fn main() {
    divan::main();
}
