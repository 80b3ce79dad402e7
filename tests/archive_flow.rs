//! End-to-end archive-entry flow over a temp tree: dedup by directory
//! existence, content-hash naming for identifier-less messages, and artifact
//! layout.

use std::fs;
use std::path::Path;

use mailstash::message::{self, headers};
use mailstash::storage::{entry_dir, EntryWriter};

/// Mirror of the per-message archive step: fetch is simulated by handing in
/// raw bytes. Returns true when the entry was newly saved.
fn archive(root: &Path, raw: &[u8]) -> bool {
    let parsed = mailparse::parse_mail(raw).unwrap();
    let message_id = headers::header_value(&parsed, "Message-Id");
    let date = headers::header_value(&parsed, "Date");
    let dir = entry_dir(
        root,
        date.as_deref(),
        message_id.as_deref().map(str::trim),
        raw,
    );
    let Some(writer) = EntryWriter::stage(&dir).unwrap() else {
        return false;
    };
    message::write_raw(writer.dir(), raw).unwrap();
    let msg = message::decompose(&parsed).unwrap();
    message::write_artifacts(writer.dir(), &msg).unwrap();
    writer.publish().unwrap()
}

const MESSAGE: &str = "Message-Id: <x@y>\r\n\
    Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
    From: Alice <alice@example.com>\r\n\
    Subject: hello\r\n\
    Content-Type: text/plain\r\n\
    \r\n\
    hi\r\n";

#[test]
fn second_run_counts_existing() {
    let root = tempfile::tempdir().unwrap();

    assert!(archive(root.path(), MESSAGE.as_bytes()));
    let entry = root.path().join("2024").join("xy");
    assert!(entry.join("raw.eml.gz").exists());
    assert!(entry.join("metadata.json").exists());
    assert!(entry.join("message.txt").exists());

    // unchanged mailbox: nothing new is created
    assert!(!archive(root.path(), MESSAGE.as_bytes()));
    assert_eq!(fs::read_dir(root.path().join("2024")).unwrap().count(), 1);
}

#[test]
fn identifierless_messages_get_distinct_hash_entries() {
    let root = tempfile::tempdir().unwrap();
    let a = "Subject: one\r\nContent-Type: text/plain\r\n\r\nfirst\r\n";
    let b = "Subject: two\r\nContent-Type: text/plain\r\n\r\nsecond\r\n";

    assert!(archive(root.path(), a.as_bytes()));
    assert!(archive(root.path(), b.as_bytes()));
    // no Date header: both land under the sentinel year
    let year = root.path().join("None");
    let entries: Vec<_> = fs::read_dir(&year)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    for name in &entries {
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // byte-identical duplicate delivery collides into one entry
    assert!(!archive(root.path(), a.as_bytes()));
    assert_eq!(fs::read_dir(&year).unwrap().count(), 2);
}
