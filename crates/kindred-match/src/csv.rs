//! CSV surfaces for the pipeline: record imports, the linkage engine's
//! stdin/stdout, and potential-match exports.
//!
//! Columns are matched by header name, so input column order is free;
//! unknown columns are ignored and missing demographic columns read as
//! empty. Output goes through [`csv::Writer`], which quotes as needed.

use kindred_core::{
  cluster::ScoredPair,
  group::PotentialMatch,
  record::{Demographics, NewPersonRecord, PersonRecord},
};

use crate::{Error, Result};

/// Demographic column names, in the order records are written out.
const RECORD_COLUMNS: [&str; 15] = [
  "data_source",
  "source_person_id",
  "first_name",
  "last_name",
  "sex",
  "race",
  "birth_date",
  "death_date",
  "social_security_number",
  "address",
  "city",
  "state",
  "zip_code",
  "county",
  "phone",
];

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Parse an import file into records.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<NewPersonRecord>> {
  let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
  let headers = reader.headers()?.clone();

  let positions: Vec<Option<usize>> = RECORD_COLUMNS
    .iter()
    .map(|col| headers.iter().position(|h| h == *col))
    .collect();

  let mut records = Vec::new();
  for row in reader.records() {
    let row = row?;
    let get = |i: usize| -> String {
      positions[i]
        .and_then(|pos| row.get(pos))
        .unwrap_or_default()
        .to_owned()
    };

    records.push(NewPersonRecord {
      demographics: Demographics {
        data_source:            get(0),
        source_person_id:       get(1),
        first_name:             get(2),
        last_name:              get(3),
        sex:                    get(4),
        race:                   get(5),
        birth_date:             get(6),
        death_date:             get(7),
        social_security_number: get(8),
        address:                get(9),
        city:                   get(10),
        state:                  get(11),
        zip_code:               get(12),
        county:                 get(13),
        phone:                  get(14),
      },
    });
  }

  Ok(records)
}

/// Parse the linkage engine's scored-pair output.
///
/// Expected columns: `left_record_id`, `right_record_id`, `probability`,
/// `match_weight`. Empty output means no pairs.
pub fn parse_scored_pairs(bytes: &[u8]) -> Result<Vec<ScoredPair>> {
  let mut reader = csv::Reader::from_reader(bytes);
  let headers = reader.headers()?.clone();
  if headers.is_empty() {
    return Ok(Vec::new());
  }

  let column = |name: &str| -> Result<usize> {
    headers
      .iter()
      .position(|h| h == name)
      .ok_or_else(|| Error::CsvField {
        line:    1,
        message: format!("missing column {name:?}"),
      })
  };
  let left = column("left_record_id")?;
  let right = column("right_record_id")?;
  let probability = column("probability")?;
  let weight = column("match_weight")?;

  let mut pairs = Vec::new();
  for (i, row) in reader.records().enumerate() {
    let row = row?;
    let line = i as u64 + 2;
    let cell = |pos: usize| -> Result<&str> {
      row.get(pos).ok_or_else(|| Error::CsvField {
        line,
        message: format!("row has {} fields, expected more", row.len()),
      })
    };
    let int = |pos: usize| -> Result<i64> {
      cell(pos)?.parse().map_err(|_| Error::CsvField {
        line,
        message: format!("invalid integer {:?}", &row[pos]),
      })
    };
    let float = |pos: usize| -> Result<f64> {
      cell(pos)?.parse().map_err(|_| Error::CsvField {
        line,
        message: format!("invalid number {:?}", &row[pos]),
      })
    };

    pairs.push(ScoredPair {
      left_record_id:  int(left)?,
      right_record_id: int(right)?,
      probability:     float(probability)?,
      match_weight:    float(weight)?,
    });
  }

  Ok(pairs)
}

// ─── Rendering ───────────────────────────────────────────────────────────────

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
  writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// Render records as the linkage engine's stdin: a `record_id` column
/// followed by the demographic columns.
pub fn render_records(records: &[PersonRecord]) -> Result<Vec<u8>> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  writer.write_record(std::iter::once("record_id").chain(RECORD_COLUMNS))?;

  for record in records {
    let record_id = record.record_id.to_string();
    let d = &record.demographics;
    writer.write_record([
      record_id.as_str(),
      &d.data_source,
      &d.source_person_id,
      &d.first_name,
      &d.last_name,
      &d.sex,
      &d.race,
      &d.birth_date,
      &d.death_date,
      &d.social_security_number,
      &d.address,
      &d.city,
      &d.state,
      &d.zip_code,
      &d.county,
      &d.phone,
    ])?;
  }

  finish(writer)
}

/// Render pending match groups for export, one row per pair score.
pub fn render_potential_matches(pending: &[PotentialMatch]) -> Result<Vec<u8>> {
  let mut writer = csv::Writer::from_writer(Vec::new());
  writer.write_record([
    "group_id",
    "left_record_id",
    "right_record_id",
    "probability",
    "match_weight",
  ])?;

  for pm in pending {
    for score in &pm.scores {
      writer.write_record([
        pm.group.group_id.to_string(),
        score.left_record_id.to_string(),
        score.right_record_id.to_string(),
        score.probability.to_string(),
        score.match_weight.to_string(),
      ])?;
    }
  }

  finish(writer)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  #[test]
  fn record_columns_map_by_header_name() {
    let input = "last_name,first_name,data_source,ignored\n\
                 Liddell,Alice,clinic-a,x\n";
    let records = parse_records(input.as_bytes()).unwrap();
    assert_eq!(records.len(), 1);
    let d = &records[0].demographics;
    assert_eq!(d.first_name, "Alice");
    assert_eq!(d.last_name, "Liddell");
    assert_eq!(d.data_source, "clinic-a");
    assert_eq!(d.phone, "");
  }

  #[test]
  fn quoted_fields_parse_intact() {
    let input = "first_name,last_name,address\r\n\
                 Alice,Liddell,\"12 Rabbit Hole, Oxford\"\r\n";
    let records = parse_records(input.as_bytes()).unwrap();
    assert_eq!(
      records[0].demographics.address,
      "12 Rabbit Hole, Oxford"
    );
  }

  #[test]
  fn scored_pairs_roundtrip_engine_output() {
    let input = "left_record_id,right_record_id,probability,match_weight\n\
                 1,2,0.97,12.5\n\
                 2,3,0.85,8.0\n";
    let pairs = parse_scored_pairs(input.as_bytes()).unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].left_record_id, 1);
    assert_eq!(pairs[0].probability, 0.97);
    assert_eq!(pairs[1].match_weight, 8.0);
  }

  #[test]
  fn missing_pair_column_is_an_error() {
    let input = "left_record_id,right_record_id\n1,2\n";
    assert!(matches!(
      parse_scored_pairs(input.as_bytes()),
      Err(Error::CsvField { line: 1, .. })
    ));
  }

  #[test]
  fn bad_probability_is_an_error() {
    let input = "left_record_id,right_record_id,probability,match_weight\n\
                 1,2,high,3\n";
    assert!(matches!(
      parse_scored_pairs(input.as_bytes()),
      Err(Error::CsvField { line: 2, .. })
    ));
  }

  #[test]
  fn rendered_fields_are_quoted_when_needed() {
    let record = PersonRecord {
      record_id:    7,
      created:      Utc::now(),
      job_id:       1,
      fingerprint:  "f".into(),
      demographics: Demographics {
        address: "12 Rabbit Hole, Oxford".into(),
        ..Default::default()
      },
    };

    let out = String::from_utf8(render_records(&[record]).unwrap()).unwrap();
    assert!(out.starts_with("record_id,data_source,"));
    assert!(out.contains("\"12 Rabbit Hole, Oxford\""));
  }
}
