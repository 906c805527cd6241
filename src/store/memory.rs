//! In-process [`KvStore`] implementation.
//!
//! Backs the test suite and the dev server binary. Shares its state across
//! clones, so an engine and a test harness can observe the same world.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::store::{FieldMap, KvStore};

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    Zset(BTreeMap<String, f64>),
}

#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType { key: key.to_string() }
}

macro_rules! entry_as {
    ($map:expr, $key:expr, $variant:ident, $default:expr) => {{
        match $map.entry($key.to_string()).or_insert_with(|| Value::$variant($default)) {
            Value::$variant(v) => v,
            _ => return Err(wrong_type($key)),
        }
    }};
}

impl KvStore for MemoryKv {
    async fn hash_get_all(&self, key: &str) -> Result<FieldMap, StoreError> {
        let map = self.inner.lock().expect("kv mutex poisoned");
        match map.get(key) {
            None => Ok(FieldMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<usize, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        let hash = entry_as!(map, key, Hash, HashMap::new());
        let count = fields.len();
        for (field, value) in fields {
            hash.insert(field, value);
        }
        Ok(count)
    }

    async fn hash_remove(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        match map.get_mut(key) {
            None => Ok(0),
            Some(Value::Hash(h)) => {
                let removed = fields.iter().filter(|f| h.remove(*f).is_some()).count();
                Ok(removed)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        let hash = entry_as!(map, key, Hash, HashMap::new());
        let current = match hash.get(field) {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                detail: format!("field {field} is not an integer"),
            })?,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        let hash = entry_as!(map, key, Hash, HashMap::new());
        if hash.contains_key(field) {
            Ok(false)
        } else {
            hash.insert(field.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn zset_incr_by(&self, key: &str, delta: f64, member: &str) -> Result<f64, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        let zset = entry_as!(map, key, Zset, BTreeMap::new());
        let score = zset.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zset_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        reverse: bool,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let map = self.inner.lock().expect("kv mutex poisoned");
        let zset = match map.get(key) {
            None => return Ok(Vec::new()),
            Some(Value::Zset(z)) => z,
            Some(_) => return Err(wrong_type(key)),
        };

        let mut entries: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        if reverse {
            entries.reverse();
        }

        let len = entries.len() as i64;
        let norm = |idx: i64| if idx < 0 { (len + idx).max(0) } else { idx.min(len) };
        let lo = norm(start);
        let hi = norm(stop).min(len - 1);
        if len == 0 || lo > hi {
            return Ok(Vec::new());
        }
        Ok(entries[lo as usize..=hi as usize].to_vec())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        let set = entry_as!(map, key, Set, BTreeSet::new());
        Ok(members.iter().filter(|m| set.insert((*m).clone())).count())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut map = self.inner.lock().expect("kv mutex poisoned");
        match map.get_mut(key) {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(members.iter().filter(|m| set.remove(*m)).count()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let map = self.inner.lock().expect("kv mutex poisoned");
        match map.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_scan(
        &self,
        key: &str,
        cursor: &str,
        count: usize,
    ) -> Result<(String, Vec<String>), StoreError> {
        let offset: usize = cursor.parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            detail: format!("bad scan cursor {cursor:?}"),
        })?;
        let page = count.max(1);

        let map = self.inner.lock().expect("kv mutex poisoned");
        let set = match map.get(key) {
            None => return Ok(("0".to_string(), Vec::new())),
            Some(Value::Set(set)) => set,
            Some(_) => return Err(wrong_type(key)),
        };

        // Members are iterated in their stable sorted order, so an offset
        // cursor visits every member that exists for the whole scan.
        let members: Vec<String> = set.iter().skip(offset).take(page).cloned().collect();
        let next = offset + members.len();
        let next_cursor = if next >= set.len() { "0".to_string() } else { next.to_string() };
        Ok((next_cursor, members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[tokio::test]
    async fn hash_round_trip_and_remove() {
        let kv = MemoryKv::new();
        assert!(kv.hash_get_all("h").await.unwrap().is_empty());

        kv.hash_set("h", vec![(s("a"), s("1")), (s("b"), s("2"))]).await.unwrap();
        let all = kv.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert_eq!(all.len(), 2);

        assert_eq!(kv.hash_remove("h", &[s("a"), s("missing")]).await.unwrap(), 1);
        assert_eq!(kv.hash_get_all("h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hash_incr_and_set_nx() {
        let kv = MemoryKv::new();
        assert_eq!(kv.hash_incr_by("h", "n", 3).await.unwrap(), 3);
        assert_eq!(kv.hash_incr_by("h", "n", -1).await.unwrap(), 2);

        assert!(kv.hash_set_nx("h", "id", "first").await.unwrap());
        assert!(!kv.hash_set_nx("h", "id", "second").await.unwrap());
        assert_eq!(
            kv.hash_get_all("h").await.unwrap().get("id").map(String::as_str),
            Some("first")
        );
    }

    #[tokio::test]
    async fn zset_orders_by_score_then_member() {
        let kv = MemoryKv::new();
        kv.zset_incr_by("z", 2.0, "bob").await.unwrap();
        kv.zset_incr_by("z", 1.0, "alice").await.unwrap();
        kv.zset_incr_by("z", 2.0, "ann").await.unwrap();

        let asc = kv.zset_range_with_scores("z", 0, -1, false).await.unwrap();
        assert_eq!(
            asc.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(),
            vec!["alice", "ann", "bob"]
        );

        let top = kv.zset_range_with_scores("z", 0, 1, true).await.unwrap();
        assert_eq!(
            top.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(),
            vec!["bob", "ann"]
        );
        assert_eq!(top[0].1, 2.0);
    }

    #[tokio::test]
    async fn set_scan_visits_every_member_once() {
        let kv = MemoryKv::new();
        let members: Vec<String> = (0..57).map(|i| format!("m{i:02}")).collect();
        kv.set_add("s", &members).await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = s("0");
        loop {
            let (next, page) = kv.set_scan("s", &cursor, 10).await.unwrap();
            seen.extend(page);
            if next == "0" {
                break;
            }
            cursor = next;
        }
        seen.sort();
        assert_eq!(seen, members);
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let kv = MemoryKv::new();
        kv.set_add("k", &[s("member")]).await.unwrap();
        assert!(matches!(
            kv.hash_get_all("k").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            kv.zset_incr_by("k", 1.0, "m").await,
            Err(StoreError::WrongType { .. })
        ));
    }
}
