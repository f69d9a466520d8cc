//! Input records and their newline-delimited JSON reader.
//!
//! Records come from an upstream chunking step. Each line is one JSON
//! object; a single malformed line rejects the whole file, since indexing
//! a filtered subset would break positional correspondence between the
//! stores.

use std::{collections::HashSet, io::BufRead, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One retrievable chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub doc_id: String,
    pub source_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub text: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read every record from a JSONL file.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path)?;
    parse_records(std::io::BufReader::new(file))
}

/// Parse records from any buffered reader.
///
/// Blank lines are skipped. Line numbers in errors are 1-based. Record ids
/// must be non-empty and unique.
pub fn parse_records(reader: impl BufRead) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = serde_json::from_str(&line).map_err(|e| {
            Error::MalformedRecord {
                line: line_no,
                reason: e.to_string(),
            }
        })?;

        if record.id.is_empty() {
            return Err(Error::MalformedRecord {
                line: line_no,
                reason: "field `id` is empty".to_string(),
            });
        }
        if record.text.trim().is_empty() {
            return Err(Error::MalformedRecord {
                line: line_no,
                reason: "field `text` is blank".to_string(),
            });
        }
        if !seen.insert(record.id.clone()) {
            return Err(Error::DuplicateRecordId {
                id: record.id,
                line: line_no,
            });
        }

        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Vec<Record>> {
        parse_records(input.as_bytes())
    }

    #[test]
    fn parses_full_record() {
        let input = r#"{"id":"d#chunk0000","doc_id":"d","source_id":"d.pdf","source_url":"https://example.test/d","title":"Doc","tags":["credit"],"text":"hello"}"#;
        let records = parse(input).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "d#chunk0000");
        assert_eq!(r.source_id, "d.pdf");
        assert_eq!(r.tags, vec!["credit".to_string()]);
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let input = r#"{"id":"a","doc_id":"d","source_id":"s","source_url":null,"text":"t"}"#;
        let r = &parse(input).unwrap()[0];
        assert_eq!(r.source_url, "");
        assert_eq!(r.title, "");
        assert!(r.tags.is_empty());
    }

    #[test]
    fn ignores_unknown_fields() {
        let input = r#"{"id":"a","doc_id":"d","source_id":"s","agency":"CFPB","published_date":"2024-01-01","text":"t"}"#;
        assert_eq!(parse(input).unwrap().len(), 1);
    }

    #[test]
    fn skips_blank_lines() {
        let input = "\n{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"t\"}\n\n";
        assert_eq!(parse(input).unwrap().len(), 1);
    }

    #[test]
    fn missing_required_field_reports_line() {
        let input = concat!(
            "{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"t\"}\n",
            "{\"id\":\"b\",\"doc_id\":\"d\",\"source_id\":\"s\"}\n",
        );
        match parse(input).unwrap_err() {
            Error::MalformedRecord { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("text"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_required_field_is_malformed() {
        let input = r#"{"id":"a","doc_id":"d","source_id":null,"text":"t"}"#;
        assert!(matches!(
            parse(input).unwrap_err(),
            Error::MalformedRecord { line: 1, .. }
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            parse("{not json").unwrap_err(),
            Error::MalformedRecord { line: 1, .. }
        ));
    }

    #[test]
    fn empty_id_is_malformed() {
        let input = r#"{"id":"","doc_id":"d","source_id":"s","text":"t"}"#;
        assert!(matches!(
            parse(input).unwrap_err(),
            Error::MalformedRecord { line: 1, .. }
        ));
    }

    #[test]
    fn blank_text_is_malformed() {
        let input = concat!(
            "{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"t\"}\n",
            "{\"id\":\"b\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"  \"}\n",
        );
        match parse(input).unwrap_err() {
            Error::MalformedRecord { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("text"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_rejected() {
        let input = concat!(
            "{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"t\"}\n",
            "{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"u\"}\n",
        );
        match parse(input).unwrap_err() {
            Error::DuplicateRecordId { id, line } => {
                assert_eq!(id, "a");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"doc_id\":\"d\",\"source_id\":\"s\",\"text\":\"t\"}\n",
        )
        .unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 1);
    }
}
