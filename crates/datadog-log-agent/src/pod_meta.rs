// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Pod identity resolved from a container log path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub labels: HashMap<String, String>,
}

/// Resolves a log file path to pod metadata, if the path belongs to a pod.
pub trait PodMetadataProvider: Send + Sync {
    fn pod_info(&self, path: &Path) -> Option<PodInfo>;
}

/// Path-derived metadata provider covering the two kubelet log layouts:
///
/// - `/var/log/containers/<pod>_<namespace>_<container>-<container-id>.log`
/// - `/var/log/pods/<namespace>_<pod>_<pod-uid>/<container>/<n>.log`
///
/// Results are cached by `"{namespace}/{pod}"` with a per-entry TTL so a
/// recreated pod with the same name stops serving stale metadata once its
/// entry expires.
pub struct KubernetesMetadataProvider {
    node_name: String,
    cache: Mutex<TtlCache>,
}

impl KubernetesMetadataProvider {
    pub fn new(node_name: String, ttl: Duration, max_entries: usize) -> Self {
        KubernetesMetadataProvider {
            node_name,
            cache: Mutex::new(TtlCache::new(ttl, max_entries)),
        }
    }

    fn resolve(&self, path: &Path) -> Option<(String, String)> {
        let components: Vec<&str> = path
            .iter()
            .filter_map(|component| component.to_str())
            .collect();

        // /var/log/containers/<pod>_<ns>_<container>-<id>.log
        if components.iter().any(|c| *c == "containers") {
            let stem = path.file_stem()?.to_str()?;
            let mut fields = stem.splitn(3, '_');
            let pod = fields.next()?;
            let namespace = fields.next()?;
            // third field is <container>-<container-id>; its presence is what
            // distinguishes the kubelet layout from an arbitrary file name
            fields.next()?;
            if pod.is_empty() || namespace.is_empty() {
                return None;
            }
            return Some((namespace.to_string(), pod.to_string()));
        }

        // /var/log/pods/<ns>_<pod>_<uid>/<container>/<n>.log
        if let Some(idx) = components.iter().position(|c| *c == "pods") {
            let segment = components.get(idx + 1)?;
            let fields: Vec<&str> = segment.split('_').collect();
            if fields.len() == 3 && !fields[0].is_empty() && !fields[1].is_empty() {
                return Some((fields[0].to_string(), fields[1].to_string()));
            }
        }

        None
    }
}

impl PodMetadataProvider for KubernetesMetadataProvider {
    fn pod_info(&self, path: &Path) -> Option<PodInfo> {
        let (namespace, pod_name) = self.resolve(path)?;
        let key = format!("{namespace}/{pod_name}");

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(info) = cache.get(&key) {
            return Some(info);
        }

        let info = PodInfo {
            pod_name,
            namespace,
            node_name: self.node_name.clone(),
            labels: HashMap::new(),
        };
        debug!("Caching pod metadata for {key}");
        cache.insert(key, info.clone());
        Some(info)
    }
}

/// TTL-aware cache: every entry carries its own expiry, tracked in a min-heap
/// so eviction touches only due entries instead of scanning the whole map.
/// A size bound still applies; when full, the oldest-expiring entry goes
/// first.
struct TtlCache {
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<String, (PodInfo, Instant)>,
    expiry: BinaryHeap<Reverse<(Instant, String)>>,
}

impl TtlCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        TtlCache {
            ttl,
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
            expiry: BinaryHeap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<PodInfo> {
        self.purge_expired(Instant::now());
        self.entries.get(key).map(|(info, _)| info.clone())
    }

    fn insert(&mut self, key: String, info: PodInfo) {
        let now = Instant::now();
        self.purge_expired(now);
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let expires_at = now + self.ttl;
        self.entries.insert(key.clone(), (info, expires_at));
        self.expiry.push(Reverse((expires_at, key)));
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some(Reverse((expires_at, key))) = self.expiry.peek().cloned() {
            if expires_at > now {
                break;
            }
            self.expiry.pop();
            // Heap entries are never removed eagerly, so only drop the map
            // entry when the heap record matches its current expiry.
            if let Some((_, current)) = self.entries.get(&key) {
                if *current == expires_at {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some(Reverse((expires_at, key))) = self.expiry.pop() {
            if let Some((_, current)) = self.entries.get(&key) {
                if *current == expires_at {
                    self.entries.remove(&key);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn provider() -> KubernetesMetadataProvider {
        KubernetesMetadataProvider::new("node-1".to_string(), Duration::from_secs(300), 16)
    }

    #[test]
    fn test_containers_layout() {
        let path = PathBuf::from(
            "/var/log/containers/api-server-7d9c6b5b-x2v4q_payments_api-abc123def456.log",
        );
        let info = provider().pod_info(&path).unwrap();
        assert_eq!(info.pod_name, "api-server-7d9c6b5b-x2v4q");
        assert_eq!(info.namespace, "payments");
        assert_eq!(info.node_name, "node-1");
    }

    #[test]
    fn test_pods_layout() {
        let path = PathBuf::from(
            "/var/log/pods/payments_api-server-7d9c6b5b-x2v4q_0f3b/api/0.log",
        );
        let info = provider().pod_info(&path).unwrap();
        assert_eq!(info.pod_name, "api-server-7d9c6b5b-x2v4q");
        assert_eq!(info.namespace, "payments");
    }

    #[test]
    fn test_non_pod_path_is_absent() {
        assert!(provider().pod_info(Path::new("/var/log/syslog")).is_none());
        assert!(provider()
            .pod_info(Path::new("/var/log/containers/notapod.log"))
            .is_none());
    }

    #[test]
    fn test_cache_expiry() {
        let provider =
            KubernetesMetadataProvider::new("node-1".to_string(), Duration::from_millis(0), 16);
        let path =
            PathBuf::from("/var/log/containers/web-1_default_app-0011223344.log");
        assert!(provider.pod_info(&path).is_some());
        // TTL of zero expires immediately; the lookup repopulates rather than
        // serving a stale hit.
        assert!(provider.pod_info(&path).is_some());
        let cache = provider.cache.lock().unwrap();
        assert!(cache.entries.len() <= 1);
    }

    #[test]
    fn test_cache_size_bound() {
        let provider =
            KubernetesMetadataProvider::new("node-1".to_string(), Duration::from_secs(300), 2);
        for i in 0..5 {
            let path = PathBuf::from(format!(
                "/var/log/containers/web-{i}_default_app-0011223344.log"
            ));
            assert!(provider.pod_info(&path).is_some());
        }
        let cache = provider.cache.lock().unwrap();
        assert!(cache.entries.len() <= 2);
    }
}
