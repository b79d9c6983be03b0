//! End-to-end coverage over a real agent dispatch loop: stat, directory
//! listing, and the cache invalidation each mutating call is supposed to
//! trigger.

mod common;

use common::Fixture;

#[test]
fn stat_file_reports_size_and_caches_it() {
    let fx = Fixture::new();
    fx.write_file("a.txt", b"hello");
    let path = fx.device_path("a.txt");

    let stat = fx.conn.stat_file(&path).unwrap();
    assert_eq!(stat.size, 5);
    assert!(!stat.is_dir());

    // A miss checks the cache twice (double-checked before the network
    // round trip), so the first call logs two lookups and no hits.
    let (stat_stats, _) = fx.conn.cache_statistics();
    assert_eq!(stat_stats.total_lookups, 2);
    assert_eq!(stat_stats.total_cache_hits, 0);

    fx.conn.stat_file(&path).unwrap();
    let (stat_stats, _) = fx.conn.cache_statistics();
    assert_eq!(stat_stats.total_lookups, 3);
    assert_eq!(stat_stats.total_cache_hits, 1);
}

#[test]
fn stat_file_on_missing_path_is_not_cached() {
    let fx = Fixture::new();
    let path = fx.device_path("missing.txt");
    assert!(fx.conn.stat_file(&path).is_err());
    let (stat_stats, _) = fx.conn.cache_statistics();
    assert_eq!(stat_stats.total_lookups, 2);
    assert_eq!(stat_stats.total_cache_hits, 0);
}

#[test]
fn list_file_stats_sees_create_directory_after_invalidation() {
    let fx = Fixture::new();
    let dir = fx.device_path("");

    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    assert!(names.is_empty());

    let child = fx.device_path("subdir");
    fx.conn.create_directory(&child).unwrap();

    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    assert_eq!(names, vec!["subdir".to_string()]);
}

#[test]
fn list_file_stats_skips_entries_whose_stat_cache_has_expired() {
    let fx = Fixture::new();
    let dir = fx.device_path("");
    fx.write_file("one.txt", b"1");
    fx.write_file("two.txt", b"22");

    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    names.sort();
    assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);

    std::thread::sleep(std::time::Duration::from_millis(250));

    // The listing cache entry is still within TTL territory only if re-put;
    // since nothing re-populated it, a second listing re-derives from the
    // (now also expired) per-entry stat cache, so nothing is reported from
    // the stale cached path and the call falls through to a fresh fetch.
    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    names.sort();
    assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);
}

#[test]
fn remove_file_invalidates_parent_listing() {
    let fx = Fixture::new();
    let dir = fx.device_path("");
    fx.write_file("gone.txt", b"x");
    let path = fx.device_path("gone.txt");

    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    assert_eq!(names, vec!["gone.txt".to_string()]);

    fx.conn.remove_file(&path).unwrap();

    let mut names: Vec<String> = Vec::new();
    fx.conn.list_file_stats(&dir, |name, _stat| names.push(name.to_string())).unwrap();
    assert!(names.is_empty());
}

#[test]
fn move_entry_invalidates_both_source_and_destination() {
    let fx = Fixture::new();
    fx.write_file("src.txt", b"payload");
    let from = fx.device_path("src.txt");
    let to = fx.device_path("dst.txt");

    fx.conn.stat_file(&from).unwrap();
    fx.conn.move_entry(&from, &to, false).unwrap();

    assert!(fx.conn.stat_file(&from).is_err());
    let stat = fx.conn.stat_file(&to).unwrap();
    assert_eq!(stat.size, 7);
}
