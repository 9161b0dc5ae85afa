//! Upstream token records are kept as opaque JSON bytes (§3, §9): the
//! core extracts only the `id` field for indexing and never re-serializes
//! field-by-field in the hot path.

use serde::Deserialize;
use serde_json::value::RawValue;

pub type TokenRecord = Vec<u8>;

#[derive(Deserialize)]
struct IdOnly<'a> {
    #[serde(borrow)]
    id: &'a str,
}

/// Shallow-parses just the `id` field out of a single record's bytes.
pub fn extract_id(record: &[u8]) -> Option<String> {
    serde_json::from_slice::<IdOnly>(record).ok().map(|v| v.id.to_string())
}

/// Splits a page blob (a JSON array of records) into its individual
/// record byte slices, preserving exact upstream bytes per record.
pub fn split_page_blob(blob: &[u8]) -> Result<Vec<TokenRecord>, serde_json::Error> {
    let values: Vec<&RawValue> = serde_json::from_slice(blob)?;
    Ok(values.iter().map(|v| v.get().as_bytes().to_vec()).collect())
}

/// Re-joins individual records into a page blob (a JSON array), used when
/// rewriting a tier's aggregate snapshot.
pub fn join_page_blob(records: &[TokenRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.iter().map(|r| r.len() + 1).sum::<usize>() + 2);
    out.push(b'[');
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(record);
    }
    out.push(b']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_a_larger_object() {
        let record = br#"{"id":"bitcoin","symbol":"btc","current_price":65000}"#;
        assert_eq!(extract_id(record), Some("bitcoin".to_string()));
    }

    #[test]
    fn splits_and_rejoins_a_page_blob() {
        let blob = br#"[{"id":"a"},{"id":"b"}]"#;
        let records = split_page_blob(blob).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(extract_id(&records[0]), Some("a".to_string()));

        let rejoined = join_page_blob(&records);
        let reparsed = split_page_blob(&rejoined).unwrap();
        assert_eq!(reparsed.len(), 2);
    }
}
