use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Clip {
    bytes: Vec<u8>,
    stored_at: Instant,
}

struct CacheInner {
    clips: HashMap<Uuid, Clip>,
    order: VecDeque<Uuid>,
}

/// Bounded in-memory store for synthesized audio, keyed by an opaque id the
/// telephony provider fetches back over HTTP.  Oldest clips are evicted when
/// the cache is full; the periodic sweep drops clips past their TTL.
pub struct AudioCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl AudioCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                clips: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    pub fn insert(&self, bytes: Vec<u8>) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.clips.insert(
            id,
            Clip {
                bytes,
                stored_at: Instant::now(),
            },
        );
        inner.order.push_back(id);
        while inner.clips.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.clips.remove(&oldest);
                }
                None => break,
            }
        }
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.clips.get(id).map(|clip| clip.bytes.clone())
    }

    /// Drop clips older than the TTL; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.clips.len();
        let ttl = self.ttl;
        inner.clips.retain(|_, clip| clip.stored_at.elapsed() < ttl);
        let removed = before - inner.clips.len();
        if removed > 0 {
            let live: Vec<Uuid> = inner.order.iter().copied().filter(|id| inner.clips.contains_key(id)).collect();
            inner.order = live.into();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().clips.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_clips_come_back() {
        let cache = AudioCache::new(Duration::from_secs(60), 8);
        let id = cache.insert(vec![1, 2, 3]);
        assert_eq!(cache.get(&id), Some(vec![1, 2, 3]));
    }

    #[test]
    fn unknown_id_is_none_not_a_panic() {
        let cache = AudioCache::new(Duration::from_secs(60), 8);
        assert!(cache.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = AudioCache::new(Duration::from_secs(60), 2);
        let first = cache.insert(vec![1]);
        let second = cache.insert(vec![2]);
        let third = cache.insert(vec![3]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&first).is_none());
        assert!(cache.get(&second).is_some());
        assert!(cache.get(&third).is_some());
    }

    #[test]
    fn sweep_expires_old_clips() {
        let cache = AudioCache::new(Duration::from_millis(1), 8);
        let id = cache.insert(vec![9]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep(), 1);
        assert!(cache.get(&id).is_none());
        assert_eq!(cache.len(), 0);
    }
}
