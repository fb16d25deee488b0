//! Path indexed registries for authentication handlers and authentication requirements.
//!
//! Both kinds of holders pair a URL path prefix with some payload. Lookups return every holder
//! whose prefix applies to a request, most specific first, so callers can walk the result and
//! stop at the first holder that has something to say about the request.

mod handler;
mod requirement;

pub use handler::AuthenticationHandlerHolder;
pub use requirement::AuthenticationRequirementHolder;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{trace, warn};
use url::Url;

use crate::http::AuthRequest;

/// The parsed form of a configured holder path.
///
/// A holder path may be a bare path (`/content`), a host scoped path (`//example.com/content`) or
/// a fully qualified URL (`https://example.com/content`). Scoped holders only apply to requests
/// sent with the matching scheme and host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct HolderPath {
    full_path: String,
    protocol: String,
    host: String,
    path: String,
}

impl HolderPath {
    /// Parses the configured path. This never fails: anything that cannot be read as a scoped URL
    /// is treated as a bare path
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (protocol, host, path) = if trimmed.starts_with("http://")
            || trimmed.starts_with("https://")
        {
            split_url(trimmed, trimmed)
        } else if let Some(rest) = trimmed.strip_prefix("//") {
            if rest.is_empty() {
                (String::new(), String::new(), "/".to_owned())
            } else {
                // Borrow a scheme so the url crate does the host and path work for us
                let (_, host, path) = split_url(&format!("http:{}", trimmed), trimmed);
                (String::new(), host, path)
            }
        } else {
            (String::new(), String::new(), trimmed.to_owned())
        };

        HolderPath {
            full_path: trimmed.to_owned(),
            protocol,
            host,
            path: normalize_path(&path),
        }
    }

    /// The path exactly as it was configured
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// The scheme this holder is restricted to, or an empty string for any scheme
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The host (with a non-default port) this holder is restricted to, or an empty string for any
    /// host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The normalized path prefix
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true if this holder's path is a prefix of the given request path.
    ///
    /// Matching respects segment boundaries: `/content` applies to `/content`, `/content/page`
    /// and `/content.html` but not to `/contentious`.
    pub fn is_prefix_of(&self, request_path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        match request_path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('.'),
            None => false,
        }
    }

    fn scope(&self) -> Scope {
        Scope {
            protocol: self.protocol.clone(),
            host: self.host.clone(),
        }
    }
}

impl fmt::Display for HolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path)
    }
}

fn split_url(candidate: &str, original: &str) -> (String, String, String) {
    match Url::parse(candidate) {
        Ok(url) => {
            let host = match (url.host_str(), url.port()) {
                (Some(h), Some(p)) => format!("{}:{}", h, p),
                (Some(h), None) => h.to_owned(),
                (None, _) => String::new(),
            };
            (url.scheme().to_owned(), host, url.path().to_owned())
        }
        Err(e) => {
            warn!(
                path = %original,
                error = %e,
                "Unable to parse scoped holder path, using it as a bare path"
            );
            (String::new(), String::new(), original.to_owned())
        }
    }
}

/// Ensures a leading slash and removes trailing slashes, except for the root path itself
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_owned();
    }
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{}", trimmed)
    }
}

/// Anything that is registered against a path prefix
pub trait PathHolder: Send + Sync {
    fn holder_path(&self) -> &HolderPath;
}

/// Describes a holder in diagnostic snapshots
#[derive(Clone, Debug, Serialize)]
pub struct HolderInfo {
    pub path: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
struct Scope {
    protocol: String,
    host: String,
}

impl Scope {
    /// Lower ranks are more specific and win between holders registered for the same path
    fn rank(&self) -> u8 {
        match (self.protocol.is_empty(), self.host.is_empty()) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }
}

struct Entry<H> {
    seq: u64,
    holder: Arc<H>,
}

struct Buckets<H> {
    next_seq: u64,
    scopes: HashMap<Scope, BTreeMap<String, Vec<Entry<H>>>>,
}

impl<H> Default for Buckets<H> {
    fn default() -> Self {
        Buckets {
            next_seq: 0,
            scopes: HashMap::new(),
        }
    }
}

impl<H: PathHolder> Buckets<H> {
    fn insert(&mut self, holder: Arc<H>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let holder_path = holder.holder_path();
        self.scopes
            .entry(holder_path.scope())
            .or_default()
            .entry(holder_path.path().to_owned())
            .or_default()
            .push(Entry { seq, holder });
    }
}

/// A path indexed set of holders.
///
/// Holders are bucketed by scope and path. Adding a holder for a path that is already present adds
/// it next to the existing ones; holders registered for the same path are returned in registration
/// order. All operations take an internal lock, so the cache may be shared between request tasks
/// and the tasks applying configuration changes. Every lookup sees one consistent state.
pub struct PathBasedHolderCache<H> {
    inner: RwLock<Buckets<H>>,
}

impl<H> Default for PathBasedHolderCache<H> {
    fn default() -> Self {
        PathBasedHolderCache {
            inner: RwLock::new(Buckets::default()),
        }
    }
}

impl<H: PathHolder> PathBasedHolderCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_holder(&self, holder: Arc<H>) {
        trace!(path = %holder.holder_path(), "Adding holder");
        self.inner.write().await.insert(holder);
    }

    /// Removes the given holder (matched by identity). Removing a holder that is not present does
    /// nothing
    pub async fn remove_holder(&self, holder: &Arc<H>) {
        let mut inner = self.inner.write().await;
        let holder_path = holder.holder_path();
        let scope = holder_path.scope();
        let mut scope_empty = false;
        if let Some(paths) = inner.scopes.get_mut(&scope) {
            if let Some(bucket) = paths.get_mut(holder_path.path()) {
                bucket.retain(|e| !Arc::ptr_eq(&e.holder, holder));
                if bucket.is_empty() {
                    paths.remove(holder_path.path());
                }
            }
            scope_empty = paths.is_empty();
        }
        if scope_empty {
            inner.scopes.remove(&scope);
        }
    }

    pub async fn clear(&self) {
        *self.inner.write().await = Buckets::default();
    }

    /// Atomically replaces the whole content of the cache. Lookups running concurrently see either
    /// the previous or the new set of holders, never a mixture
    pub async fn replace_all(&self, holders: impl IntoIterator<Item = Arc<H>>) {
        let mut fresh = Buckets::default();
        for holder in holders {
            fresh.insert(holder);
        }
        *self.inner.write().await = fresh;
    }

    /// Returns all holders applicable to the request, most specific first.
    ///
    /// The `path` is matched against the holder prefixes; the request supplies the scheme and host
    /// used to select scoped holders.
    pub async fn find_applicable_holders(&self, request: &AuthRequest, path: &str) -> Vec<Arc<H>> {
        let inner = self.inner.read().await;
        let host = request.host().unwrap_or_default();
        let candidates = [
            Scope {
                protocol: request.scheme().to_owned(),
                host: host.to_owned(),
            },
            Scope {
                protocol: String::new(),
                host: host.to_owned(),
            },
            Scope {
                protocol: request.scheme().to_owned(),
                host: String::new(),
            },
            Scope::default(),
        ];

        let mut found: Vec<(usize, u8, u64, &Arc<H>)> = Vec::new();
        for scope in candidates.iter() {
            let paths = match inner.scopes.get(scope) {
                Some(p) => p,
                None => continue,
            };
            for (prefix, bucket) in paths.iter() {
                for entry in bucket {
                    if entry.holder.holder_path().is_prefix_of(path) {
                        found.push((prefix.len(), scope.rank(), entry.seq, &entry.holder));
                    }
                }
            }
        }
        found.sort_by_key(|(len, rank, seq, _)| (Reverse(*len), *rank, *seq));
        found.dedup_by(|a, b| Arc::ptr_eq(a.3, b.3));
        found.into_iter().map(|(_, _, _, h)| h.clone()).collect()
    }

    /// A snapshot of all registered holders, most specific path first
    pub async fn holders(&self) -> Vec<Arc<H>> {
        let inner = self.inner.read().await;
        let mut all: Vec<(usize, u8, u64, &Arc<H>)> = inner
            .scopes
            .iter()
            .flat_map(|(scope, paths)| {
                paths.iter().flat_map(move |(prefix, bucket)| {
                    bucket
                        .iter()
                        .map(move |e| (prefix.len(), scope.rank(), e.seq, &e.holder))
                })
            })
            .collect();
        all.sort_by_key(|(len, rank, seq, _)| (Reverse(*len), *rank, *seq));
        all.into_iter().map(|(_, _, _, h)| h.clone()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    struct Named {
        path: HolderPath,
        name: &'static str,
    }

    impl PathHolder for Named {
        fn holder_path(&self) -> &HolderPath {
            &self.path
        }
    }

    fn named(path: &str, name: &'static str) -> Arc<Named> {
        Arc::new(Named {
            path: HolderPath::parse(path),
            name,
        })
    }

    fn names(holders: &[Arc<Named>]) -> Vec<&'static str> {
        holders.iter().map(|h| h.name).collect()
    }

    #[rstest]
    #[case("/content/", "", "", "/content")]
    #[case("content", "", "", "/content")]
    #[case("/", "", "", "/")]
    #[case("", "", "", "/")]
    #[case("https://example.com/apps", "https", "example.com", "/apps")]
    #[case("http://example.com:8080/apps/", "http", "example.com:8080", "/apps")]
    #[case("http://example.com:80/apps", "http", "example.com", "/apps")]
    #[case("//example.com/apps", "", "example.com", "/apps")]
    #[case("//example.com", "", "example.com", "/")]
    fn test_parse(
        #[case] raw: &str,
        #[case] protocol: &str,
        #[case] host: &str,
        #[case] path: &str,
    ) {
        let parsed = HolderPath::parse(raw);
        assert_eq!(protocol, parsed.protocol());
        assert_eq!(host, parsed.host());
        assert_eq!(path, parsed.path());
        assert_eq!(raw.trim(), parsed.full_path());
    }

    #[rstest]
    #[case("/", "/anything", true)]
    #[case("/content", "/content", true)]
    #[case("/content", "/content/page", true)]
    #[case("/content", "/content.html", true)]
    #[case("/content", "/contentious", false)]
    #[case("/content/page", "/content", false)]
    fn test_prefix(#[case] holder: &str, #[case] request: &str, #[case] expected: bool) {
        assert_eq!(expected, HolderPath::parse(holder).is_prefix_of(request));
    }

    #[tokio::test]
    async fn test_most_specific_first() {
        let cache = PathBasedHolderCache::new();
        cache.add_holder(named("/", "root")).await;
        cache.add_holder(named("/content/site", "site")).await;
        cache.add_holder(named("/content", "content")).await;
        cache.add_holder(named("/apps", "apps")).await;

        let request = AuthRequest::get("/content/site/page.html");
        let found = cache
            .find_applicable_holders(&request, "/content/site/page.html")
            .await;
        assert_eq!(vec!["site", "content", "root"], names(&found));

        let found = cache.find_applicable_holders(&request, "/libs").await;
        assert_eq!(vec!["root"], names(&found));
    }

    #[tokio::test]
    async fn test_same_path_keeps_siblings_in_registration_order() {
        let cache = PathBasedHolderCache::new();
        let first = named("/content", "first");
        let second = named("/content", "second");
        cache.add_holder(first.clone()).await;
        cache.add_holder(second.clone()).await;

        let request = AuthRequest::get("/content");
        let found = cache.find_applicable_holders(&request, "/content").await;
        assert_eq!(vec!["first", "second"], names(&found));

        cache.remove_holder(&first).await;
        let found = cache.find_applicable_holders(&request, "/content").await;
        assert_eq!(vec!["second"], names(&found));

        // Removing twice (or something never added) is a no-op
        cache.remove_holder(&first).await;
        cache.remove_holder(&named("/nope", "nope")).await;
        assert_eq!(1, cache.holders().await.len());
    }

    #[tokio::test]
    async fn test_scoped_holders() {
        let cache = PathBasedHolderCache::new();
        cache.add_holder(named("/", "any")).await;
        cache.add_holder(named("https://secure.example.com/", "secure")).await;
        cache.add_holder(named("//other.example.com/", "other")).await;

        let request = AuthRequest::get("/page")
            .with_scheme("https")
            .with_host("secure.example.com");
        let found = cache.find_applicable_holders(&request, "/page").await;
        assert_eq!(vec!["secure", "any"], names(&found));

        let request = AuthRequest::get("/page").with_host("secure.example.com");
        let found = cache.find_applicable_holders(&request, "/page").await;
        assert_eq!(vec!["any"], names(&found), "scheme does not match");

        let request = AuthRequest::get("/page").with_host("other.example.com");
        let found = cache.find_applicable_holders(&request, "/page").await;
        assert_eq!(vec!["other", "any"], names(&found));
    }

    #[tokio::test]
    async fn test_replace_and_clear() {
        let cache = PathBasedHolderCache::new();
        cache.add_holder(named("/old", "old")).await;
        cache
            .replace_all(vec![named("/new", "new"), named("/", "root")])
            .await;
        assert_eq!(vec!["new", "root"], names(&cache.holders().await));

        cache.clear().await;
        assert!(cache.holders().await.is_empty());
        let request = AuthRequest::get("/new");
        assert!(cache
            .find_applicable_holders(&request, "/new")
            .await
            .is_empty());
    }
}
