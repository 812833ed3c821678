//! Remote content backend on a Redis-compatible key/value server.
//!
//! PUT maps to `SET` (no expiry), GET to `GET`, DELETE to `DEL` and
//! prefix listing to `SCAN MATCH <prefix>*`. There are no transactions or
//! conditional writes. Blobs survive process restarts as long as the server
//! does.

use crate::content::ContentBackend;
use crate::error::{ContentError, ContentResult};
use parking_lot::Mutex;
use redis::{Client, Commands, Connection, RedisError, RedisResult};
use std::fmt;
use tracing::{debug, warn};

/// Content backend backed by a Redis server.
///
/// One connection is shared by all callers and serialized by a mutex, so a
/// slow round-trip blocks every caller waiting on the backend. The
/// connection is opened on first use. If a call fails with a transport
/// error the connection is dropped and the error returned; the next call
/// opens a fresh one. Failed calls are never retried.
pub struct RedisBackend {
    client: Client,
    /// Prepended to every key, stripped from listed paths.
    namespace: String,
    conn: Mutex<Option<Connection>>,
}

impl RedisBackend {
    /// Creates a backend for `url` (`redis://host:port/db`) without connecting.
    pub fn open(url: &str) -> ContentResult<Self> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            namespace: String::new(),
            conn: Mutex::new(None),
        })
    }

    /// Creates a backend and checks the server answers `PING`.
    pub fn connect(url: &str) -> ContentResult<Self> {
        let backend = Self::open(url)?;
        backend.ping()?;
        Ok(backend)
    }

    /// Sets the key namespace, e.g. `logfs:`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Returns the key namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Round-trips a `PING` to the server.
    pub fn ping(&self) -> ContentResult<()> {
        self.with_conn(|conn| redis::cmd("PING").query::<()>(conn))
    }

    fn key(&self, path: &str) -> String {
        format!("{}{}", self.namespace, path)
    }

    fn with_conn<T, F>(&self, f: F) -> ContentResult<T>
    where
        F: FnOnce(&mut Connection) -> RedisResult<T>,
    {
        let mut slot = self.conn.lock();
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!("opening redis connection");
                self.client.get_connection()?
            }
        };

        let result = f(&mut conn);
        match &result {
            Err(e) if is_transport_error(e) => {
                warn!(error = %e, "redis transport error, dropping connection");
            }
            _ => *slot = Some(conn),
        }
        result.map_err(ContentError::from)
    }
}

fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Escapes the glob metacharacters understood by `SCAN MATCH`.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("namespace", &self.namespace)
            .field("connected", &self.conn.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl ContentBackend for RedisBackend {
    fn put(&self, path: &str, content: &[u8]) -> ContentResult<()> {
        let key = self.key(path);
        debug!(key = %key, len = content.len(), "redis SET");
        self.with_conn(|conn| conn.set::<_, _, ()>(&key, content))
    }

    fn get(&self, path: &str) -> ContentResult<Vec<u8>> {
        let key = self.key(path);
        debug!(key = %key, "redis GET");
        self.with_conn(|conn| conn.get::<_, Option<Vec<u8>>>(&key))?
            .ok_or_else(|| ContentError::NotFound {
                path: path.to_string(),
            })
    }

    fn list_by_prefix(&self, prefix: &str) -> ContentResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));
        debug!(pattern = %pattern, "redis SCAN");
        let keys: Vec<String> = self.with_conn(|conn| {
            let keys = conn.scan_match::<_, String>(&pattern)?.collect();
            Ok(keys)
        })?;

        let mut paths: Vec<String> = keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.namespace).map(str::to_string))
            .collect();
        // SCAN may return a key more than once
        paths.sort_unstable();
        paths.dedup();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> ContentResult<()> {
        let key = self.key(path);
        debug!(key = %key, "redis DEL");
        self.with_conn(|conn| conn.del::<_, ()>(&key))
    }
}
