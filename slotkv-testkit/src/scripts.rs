//! # Script Handlers
//!
//! Purpose: Stand in for Lua. Tests register a Rust handler under a script's
//! source; `EVAL` and `EVALSHA` then run it against the store atomically.

use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::protocol::Reply;
use crate::store::Store;

/// `(store, db, keys, args) -> reply`, run under the store lock.
pub type ScriptHandler = Arc<dyn Fn(&mut Store, usize, &[Vec<u8>], &[Vec<u8>]) -> Reply + Send + Sync>;

/// Lowercase hex SHA1, matching `SCRIPT LOAD`.
pub fn script_sha(source: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Deletes `keys[0]` when it holds `args[0]`; replies 1 or 0.
pub fn compare_and_delete(store: &mut Store, db: usize, keys: &[Vec<u8>], args: &[Vec<u8>]) -> Reply {
    let (Some(key), Some(token)) = (keys.first(), args.first()) else {
        return Reply::err("compare-and-delete needs one key and one argument");
    };
    if store.get(db, key).as_ref() == Some(token) {
        Reply::Integer(store.remove(db, key) as i64)
    } else {
        Reply::Integer(0)
    }
}

/// Sets `keys[0]` to expire in `args[1]` seconds when it holds `args[0]`.
pub fn compare_and_expire(store: &mut Store, db: usize, keys: &[Vec<u8>], args: &[Vec<u8>]) -> Reply {
    let (Some(key), Some(token), Some(secs)) = (keys.first(), args.first(), args.get(1)) else {
        return Reply::err("compare-and-expire needs one key and two arguments");
    };
    let Some(secs) = std::str::from_utf8(secs).ok().and_then(|text| text.parse::<u64>().ok()) else {
        return Reply::err("value is not an integer or out of range");
    };
    if store.get(db, key).as_ref() == Some(token) {
        let extended = store.expire(db, key, std::time::Duration::from_secs(secs));
        Reply::Integer(extended as i64)
    } else {
        Reply::Integer(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_matches_script_load() {
        assert_eq!(script_sha(b"return 1"), "e0e1f9fabfc9d4800c877a703b823ac0578ff8db");
    }

    #[test]
    fn compare_and_delete_checks_token() {
        let mut store = Store::new();
        store.set(0, b"lock", b"mine".to_vec(), None);
        let keys = vec![b"lock".to_vec()];
        assert_eq!(compare_and_delete(&mut store, 0, &keys, &[b"other".to_vec()]), Reply::Integer(0));
        assert!(store.contains(0, b"lock"));
        assert_eq!(compare_and_delete(&mut store, 0, &keys, &[b"mine".to_vec()]), Reply::Integer(1));
        assert!(!store.contains(0, b"lock"));
    }

    #[test]
    fn compare_and_expire_checks_token() {
        let mut store = Store::new();
        store.set(0, b"lock", b"mine".to_vec(), None);
        let keys = vec![b"lock".to_vec()];
        let args = vec![b"other".to_vec(), b"5".to_vec()];
        assert_eq!(compare_and_expire(&mut store, 0, &keys, &args), Reply::Integer(0));
        let args = vec![b"mine".to_vec(), b"5".to_vec()];
        assert_eq!(compare_and_expire(&mut store, 0, &keys, &args), Reply::Integer(1));
    }
}
