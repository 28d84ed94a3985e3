//! Entries survive encoding, persistence and reload unchanged.

use actcache_conformance::{digest, full_entry, interner, simple_entry, TestCache};
use actcache_store::{ActionEntry, CachedEntry, EntryCodec, RemoteFileMetadata, TreeMetadata};

#[test]
fn full_entry_roundtrips_through_codec() {
    let dir = tempfile::tempdir().unwrap();
    let interner = interner(dir.path());
    let codec = EntryCodec::new(&interner);

    let entry = full_entry("//pkg:lib");
    let bytes = codec.encode(&entry).unwrap();
    assert_eq!(codec.try_decode(&bytes).unwrap(), entry);
}

#[test]
fn discovered_inputs_keep_order_and_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let interner = interner(dir.path());
    let codec = EntryCodec::new(&interner);

    let entry = full_entry("k");
    let decoded = codec.try_decode(&codec.encode(&entry).unwrap()).unwrap();
    assert_eq!(
        decoded.discovered_inputs.as_deref(),
        Some(&["include/a.h".to_owned(), "include/b.h".to_owned(), "include/a.h".to_owned()][..])
    );
}

#[test]
fn no_discovery_differs_from_empty_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let interner = interner(dir.path());
    let codec = EntryCodec::new(&interner);

    let none = simple_entry("k");
    let empty = simple_entry("k").with_discovered_inputs(Vec::<String>::new());

    let none_back = codec.try_decode(&codec.encode(&none).unwrap()).unwrap();
    let empty_back = codec.try_decode(&codec.encode(&empty).unwrap()).unwrap();
    assert_eq!(none_back.discovered_inputs, None);
    assert_eq!(empty_back.discovered_inputs, Some(Vec::new()));
}

#[test]
fn empty_entry_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let interner = interner(dir.path());
    let codec = EntryCodec::new(&interner);

    let entry = ActionEntry::new("", digest(0, 0), digest(0, 0));
    assert_eq!(codec.try_decode(&codec.encode(&entry).unwrap()).unwrap(), entry);
}

#[test]
fn tree_without_archive_or_children_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let interner = interner(dir.path());
    let codec = EntryCodec::new(&interner);

    let entry = ActionEntry::new("k", digest(1, 32), digest(2, 32))
        .add_output_tree("t1", TreeMetadata::new())
        .add_output_tree(
            "t2",
            TreeMetadata::new().with_child("c", RemoteFileMetadata::new(digest(9, 16), 1, 0)),
        );
    assert_eq!(codec.try_decode(&codec.encode(&entry).unwrap()).unwrap(), entry);
}

#[test]
fn entries_survive_save_and_reload() {
    let fixture = TestCache::new();
    let cache = fixture.open();
    cache.put("//a:full", &full_entry("//a:full"));
    cache.put("//a:simple", &simple_entry("//a:simple"));
    cache.save().unwrap();
    drop(cache);

    let cache = fixture.open();
    assert_eq!(cache.entry_count(), 2);
    assert_eq!(
        cache.get("//a:full"),
        Some(CachedEntry::Entry(full_entry("//a:full")))
    );
    assert_eq!(
        cache.get("//a:simple"),
        Some(CachedEntry::Entry(simple_entry("//a:simple")))
    );
    assert!(fixture.sink.is_empty());
}

#[test]
fn latin1_keys_survive_reload() {
    let fixture = TestCache::new();
    let cache = fixture.open();
    let key = "caf\u{e9}/\u{ff}";
    cache.put(key, &simple_entry(key));
    cache.save().unwrap();
    drop(cache);

    let cache = fixture.open();
    let entry = cache.get(key).and_then(CachedEntry::into_entry).unwrap();
    assert_eq!(entry.action_key, key);
}

#[test]
fn overwriting_an_entry_keeps_the_latest() {
    let fixture = TestCache::new();
    let cache = fixture.open();
    cache.put("k", &simple_entry("k"));
    cache.put("k", &full_entry("k"));
    cache.save().unwrap();
    drop(cache);

    let cache = fixture.open();
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.get("k"), Some(CachedEntry::Entry(full_entry("k"))));
}
