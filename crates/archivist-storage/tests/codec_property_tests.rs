//! Property-Based Tests for the Record Codec
//!
//! 1. Decoding an encoded record reproduces its location, kind and lineage
//! 2. Paths generated for a record always parse back to the same location
//! 3. Snapshot id scanning never reports ids that were not written

use archivist_storage::codec::{self, parse_file_path};
use archivist_storage::{ChangeUnit, ChangedFile, Record, SNAPSHOT_ID_MARKER};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Strategies
// ============================================================================

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][A-Za-z0-9]{0,8}( [A-Za-z0-9]{1,8}){0,2}".prop_map(|s| s)
}

fn mime_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("text/html".to_string()),
        Just("text/markdown".to_string()),
        Just("application/pdf".to_string()),
        Just("text/plain".to_string()),
        Just("application/json".to_string()),
    ]
}

fn snapshot_ids_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[0-9a-f]{5,40}", 0..5)
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        name_strategy(),
        name_strategy(),
        prop::option::of("[a-z0-9-]{1,12}"),
        mime_strategy(),
        snapshot_ids_strategy(),
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(any::<u8>(), 1..64),
    )
        .prop_map(
            |(service, terms, document, mime, ids, first, extract_only, content)| {
                let mut record = Record::new(
                    service,
                    terms,
                    mime,
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    content,
                )
                .with_document_id(document)
                .with_snapshot_ids(ids.into_iter().collect())
                .extract_only(extract_only);
                record.is_first_record = first;
                record
            },
        )
}

fn encode_then_decode(record: &Record, template: &str) -> Record {
    let encoded = codec::to_persistence(record, template);
    codec::to_domain(&ChangeUnit {
        id: "0123456789abcdef0123456789abcdef01234567".to_string(),
        message: encoded.message,
        date: record.fetch_date,
        files: vec![ChangedFile {
            path: encoded.file_path,
            content: encoded.content,
        }],
    })
    .unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn decode_inverts_encode(record in record_strategy()) {
        let decoded = encode_then_decode(&record, SNAPSHOT_ID_MARKER);

        prop_assert_eq!(&decoded.service_id, &record.service_id);
        prop_assert_eq!(&decoded.terms_type, &record.terms_type);
        prop_assert_eq!(&decoded.document_id, &record.document_id);
        prop_assert_eq!(&decoded.mime_type, &record.mime_type);
        prop_assert_eq!(&decoded.content, &record.content);
        prop_assert_eq!(decoded.is_first_record, record.is_first_record);
        // First-record wins over extract-only in the subject tag
        prop_assert_eq!(
            decoded.is_extract_only,
            record.is_extract_only && !record.is_first_record
        );

        let expected: BTreeSet<_> = record.snapshot_ids.iter().cloned().collect();
        let actual: BTreeSet<_> = decoded.snapshot_ids.iter().cloned().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn provenance_survives_url_templates(record in record_strategy()) {
        let decoded = encode_then_decode(&record, "https://example.org/snapshots/%SNAPSHOT_ID");
        prop_assert_eq!(decoded.snapshot_ids, record.snapshot_ids);
    }

    #[test]
    fn generated_paths_parse_back(
        service in name_strategy(),
        terms in name_strategy(),
        document in prop::option::of("[a-z0-9.-]{1,12}"),
        mime in mime_strategy(),
    ) {
        let path = codec::generate_file_path(&service, &terms, document.as_deref(), Some(&mime));
        let location = parse_file_path(&path).unwrap();

        prop_assert_eq!(&location.service_id, &service);
        prop_assert_eq!(&location.terms_type, &terms);
        prop_assert_eq!(&location.document_id, &document);
        prop_assert!(codec::path_matches(&path, &service, &terms, document.as_deref()));
    }

    #[test]
    fn scan_only_reports_written_ids(
        ids in snapshot_ids_strategy(),
        filler in "[g-z ]{0,40}",
    ) {
        let body = ids
            .iter()
            .map(|id| format!("{filler} {id}"))
            .collect::<Vec<_>>()
            .join("\n");
        let scanned = codec::scan_snapshot_ids(&body);
        prop_assert_eq!(scanned, ids.into_iter().collect::<Vec<_>>());
    }
}
