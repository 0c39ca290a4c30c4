//! Best-effort, advisory reader for Chrome's `Default/Local Storage/leveldb`
//! directory.
//!
//! This is not a LevelDB implementation: Chrome's log files interleave
//! snappy-compressed blocks with plain ones and no crate in this workspace
//! speaks that framing. Instead this scans `.log` files for the flat
//! `\0`-delimited UTF-8 runs Chrome's DOM storage backend writes for
//! uncompressed records (origin key prefixed with `_` followed by a key and
//! a value) and ignores everything it cannot confidently parse. Corruption
//! or an unrecognized layout causes that file to be skipped, never the
//! whole snapshot.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

/// Read whatever per-origin localStorage key/value pairs can be recovered
/// from `user_data_dir/Default/Local Storage/leveldb`. Returns an empty map
/// on any I/O or parse failure.
pub fn read_advisory_storage(user_data_dir: &Path) -> HashMap<String, HashMap<String, String>> {
    let leveldb_dir = user_data_dir.join("Default").join("Local Storage").join("leveldb");
    let mut result = HashMap::new();

    let entries = match std::fs::read_dir(&leveldb_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("advisory storage read: {} not readable: {e}", leveldb_dir.display());
            return result;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        match std::fs::read(&path) {
            Ok(bytes) => merge_records(&bytes, &mut result),
            Err(e) => warn!("advisory storage read: failed to read {}: {e}", path.display()),
        }
    }

    result
}

/// Extracts `{origin, key, value}` triples from the raw bytes of one log
/// file. Chrome prefixes DOM-storage keys with `_` followed by the
/// origin, a NUL, then the key; values follow as another NUL-delimited
/// run. Anything that doesn't decode as UTF-8 or doesn't match that shape
/// is skipped.
fn merge_records(bytes: &[u8], out: &mut HashMap<String, HashMap<String, String>>) {
    let runs: Vec<&[u8]> = bytes.split(|b| *b == 0).collect();
    let mut i = 0;
    while i + 1 < runs.len() {
        let Ok(prefixed) = std::str::from_utf8(runs[i]) else {
            i += 1;
            continue;
        };
        let Some(origin_and_key) = prefixed.strip_prefix('_') else {
            i += 1;
            continue;
        };
        let Some((origin, key)) = origin_and_key.split_once('\u{1}') else {
            i += 1;
            continue;
        };
        if !origin.starts_with("http") || key.is_empty() {
            i += 1;
            continue;
        }
        let Ok(value) = std::str::from_utf8(runs[i + 1]) else {
            i += 2;
            continue;
        };
        out.entry(origin.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
        i += 2;
    }
}
