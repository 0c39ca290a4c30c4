//! Snapshot and restore of cookies, localStorage, sessionStorage, and
//! IndexedDB across origins.
//!
//! Built on `chromiumoxide::page::Page` CDP usage, the same in-page
//! evaluation idiom used for page-content extraction generalized from
//! "read page content" to "read/write browser storage surfaces", plus
//! `Network.setCookies`/`getCookies` for cookie transfer. The on-disk
//! leveldb advisory read is a best-effort supplement: no real LevelDB
//! dependency is introduced, the reader just scans for the flat key/value
//! strings Chrome's uncompressed log records hold and skips anything it
//! can't parse.

mod leveldb;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::config::{IndexedDbDatabase, SessionContext};
use crate::driver::{BrowserHandle, PageHandle};
use crate::error::RuntimeError;

pub use leveldb::read_advisory_storage;

const RESTORE_SCRIPT_TEMPLATE: &str = r#"(function(){
  const DATA = __DATA_JSON__;
  const origin = window.location.origin;
  const data = DATA[origin];
  if (!data) { return; }
  try {
    if (data.localStorage) {
      for (const k in data.localStorage) { window.localStorage.setItem(k, data.localStorage[k]); }
    }
    if (data.sessionStorage) {
      for (const k in data.sessionStorage) { window.sessionStorage.setItem(k, data.sessionStorage[k]); }
    }
    if (data.indexedDB && window.indexedDB) {
      for (const db of data.indexedDB) {
        const req = window.indexedDB.open(db.databaseName, db.version || 1);
        req.onupgradeneeded = (ev) => {
          const conn = ev.target.result;
          for (const store of db.stores) {
            if (!conn.objectStoreNames.contains(store.name)) { conn.createObjectStore(store.name); }
          }
        };
        req.onsuccess = (ev) => {
          const conn = ev.target.result;
          for (const store of db.stores) {
            const tx = conn.transaction(store.name, "readwrite");
            const os = tx.objectStore(store.name);
            for (const key in store.records) { os.put(store.records[key], key); }
          }
        };
      }
    }
  } catch (e) { /* best-effort restore, never throw into the page */ }
})();"#;

const SNAPSHOT_SCRIPT: &str = r#"(async function(){
  const result = { localStorage: {}, sessionStorage: {}, indexedDB: [] };
  for (let i = 0; i < window.localStorage.length; i++) {
    const k = window.localStorage.key(i);
    result.localStorage[k] = window.localStorage.getItem(k);
  }
  for (let i = 0; i < window.sessionStorage.length; i++) {
    const k = window.sessionStorage.key(i);
    result.sessionStorage[k] = window.sessionStorage.getItem(k);
  }
  try {
    if (window.indexedDB && window.indexedDB.databases) {
      const dbs = await window.indexedDB.databases();
      for (const meta of dbs) {
        const stores = [];
        await new Promise((resolve) => {
          const req = window.indexedDB.open(meta.name, meta.version);
          req.onsuccess = async (ev) => {
            const conn = ev.target.result;
            for (const name of conn.objectStoreNames) {
              const records = {};
              await new Promise((res2) => {
                const tx = conn.transaction(name, "readonly");
                const cursorReq = tx.objectStore(name).openCursor();
                cursorReq.onsuccess = (cev) => {
                  const cursor = cev.target.result;
                  if (cursor) { records[cursor.key] = cursor.value; cursor.continue(); }
                  else { res2(); }
                };
                cursorReq.onerror = () => res2();
              });
              stores.push({ name, records });
            }
            resolve();
          };
          req.onerror = () => resolve();
        });
        result.indexedDB.push({ databaseName: meta.name, version: meta.version || 1, stores });
      }
    }
  } catch (e) { /* best-effort snapshot */ }
  return result;
})();"#;

#[derive(serde::Deserialize, Default)]
struct SnapshotPayload {
    #[serde(rename = "localStorage")]
    local_storage: HashMap<String, String>,
    #[serde(rename = "sessionStorage")]
    session_storage: HashMap<String, String>,
    #[serde(rename = "indexedDB")]
    indexed_db: Vec<IndexedDbDatabase>,
}

#[derive(serde::Serialize)]
struct RestorePerOrigin<'a> {
    #[serde(rename = "localStorage", skip_serializing_if = "Option::is_none")]
    local_storage: Option<&'a HashMap<String, String>>,
    #[serde(rename = "sessionStorage", skip_serializing_if = "Option::is_none")]
    session_storage: Option<&'a HashMap<String, String>>,
    #[serde(rename = "indexedDB", skip_serializing_if = "Vec::is_empty")]
    indexed_db: Vec<&'a IndexedDbDatabase>,
}

pub struct ContextCodec;

impl ContextCodec {
    /// Installs the per-origin storage observer and injects cookies. Called
    /// between `Launching` success and `Live`; never aborts the transition
    /// on partial failure, since context restoration errors are
    /// observability only, not a reason to fail the launch.
    pub async fn restore(
        context: &SessionContext,
        browser: &Arc<dyn BrowserHandle>,
        page: &Arc<dyn PageHandle>,
    ) -> Result<(), RuntimeError> {
        if !context.cookies.is_empty() {
            if let Err(e) = browser.set_cookies(context.cookies.clone()).await {
                warn!("context restore: setCookies failed: {e}");
            }
        }

        if context.local_storage.is_empty() && context.session_storage.is_empty() && context.indexed_db.is_empty() {
            return Ok(());
        }

        let origins: std::collections::HashSet<&String> = context
            .local_storage
            .keys()
            .chain(context.session_storage.keys())
            .chain(context.indexed_db.keys())
            .collect();

        let mut per_origin: HashMap<&str, RestorePerOrigin> = HashMap::new();
        for origin in origins {
            per_origin.insert(
                origin.as_str(),
                RestorePerOrigin {
                    local_storage: context.local_storage.get(origin),
                    session_storage: context.session_storage.get(origin),
                    indexed_db: context
                        .indexed_db
                        .get(origin)
                        .map(|dbs| dbs.iter().collect())
                        .unwrap_or_default(),
                },
            );
        }

        let json = serde_json::to_string(&per_origin)
            .map_err(|e| RuntimeError::Context(format!("failed to serialize restore payload: {e}")))?;
        let script = RESTORE_SCRIPT_TEMPLATE.replace("__DATA_JSON__", &json);

        if let Err(e) = page.evaluate_on_new_document(&script).await {
            warn!("context restore: failed to install storage observer: {e}");
            return Err(RuntimeError::Context(e.to_string()));
        }
        Ok(())
    }

    /// Captures current browser state for `getBrowserState()`/`Draining`.
    /// `existing` carries any context already captured for this session
    /// (e.g. the restore input); matching `{origin, key}` pairs are
    /// overwritten by freshly observed live-page values.
    pub async fn snapshot(
        existing: Option<&SessionContext>,
        browser: &Arc<dyn BrowserHandle>,
        pages: &[Arc<dyn PageHandle>],
        user_data_dir: Option<&Path>,
    ) -> SessionContext {
        let mut out = existing.cloned().unwrap_or_default();

        match browser.get_cookies().await {
            Ok(cookies) => out.cookies = cookies,
            Err(e) => warn!("context snapshot: getCookies failed: {e}"),
        }

        for page in pages {
            let Some(url) = page.url().await else { continue };
            let Ok(parsed) = Url::parse(&url) else { continue };
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                continue;
            }
            let origin = format!(
                "{}://{}{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default(),
                parsed.port().map(|p| format!(":{p}")).unwrap_or_default()
            );

            match page.evaluate(SNAPSHOT_SCRIPT).await {
                Ok(value) => match serde_json::from_value::<SnapshotPayload>(value) {
                    Ok(payload) => {
                        out.local_storage
                            .entry(origin.clone())
                            .or_default()
                            .extend(payload.local_storage);
                        out.session_storage
                            .entry(origin.clone())
                            .or_default()
                            .extend(payload.session_storage);
                        if !payload.indexed_db.is_empty() {
                            out.indexed_db.insert(origin, payload.indexed_db);
                        }
                    }
                    Err(e) => warn!("context snapshot: failed to parse page result for {origin}: {e}"),
                },
                Err(e) => warn!("context snapshot: evaluate failed for {origin}: {e}"),
            }
        }

        if let Some(dir) = user_data_dir {
            let advisory = read_advisory_storage(dir);
            for (origin, kvs) in advisory {
                let entry = out.local_storage.entry(origin).or_default();
                for (k, v) in kvs {
                    entry.entry(k).or_insert(v);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cookie;
    use crate::driver::testing::{FakeBrowserHandle, FakePage};
    use std::sync::Arc;

    fn sample_context() -> SessionContext {
        let mut ctx = SessionContext::default();
        ctx.cookies.push(Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires: 0,
            secure: true,
            http_only: true,
            same_site: crate::config::SameSite::Lax,
            source_scheme: None,
            partition_key: None,
        });
        ctx.local_storage
            .entry("https://example.com".to_string())
            .or_default()
            .insert("k1".to_string(), "v1".to_string());
        ctx
    }

    #[tokio::test]
    async fn restore_sets_cookies_and_installs_observer() {
        let browser: Arc<dyn BrowserHandle> = FakeBrowserHandle::new();
        let page = Arc::new(FakePage::new("p1", "about:blank"));
        let page_dyn: Arc<dyn PageHandle> = page.clone();
        let ctx = sample_context();

        ContextCodec::restore(&ctx, &browser, &page_dyn).await.unwrap();

        let cookies = browser.get_cookies().await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sid");

        page_dyn.navigate("https://example.com").await.unwrap();
        let applied = page.applied_on_navigate();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].1.contains("example.com"));
    }

    #[tokio::test]
    async fn snapshot_merges_live_page_values_over_existing() {
        let browser: Arc<dyn BrowserHandle> = FakeBrowserHandle::new();
        let page = Arc::new(FakePage::new("p1", "https://example.com"));
        page.stub(
            SNAPSHOT_SCRIPT,
            serde_json::json!({
                "localStorage": {"k1": "fresh"},
                "sessionStorage": {},
                "indexedDB": []
            }),
        );
        let pages: Vec<Arc<dyn PageHandle>> = vec![page.clone()];

        let mut existing = SessionContext::default();
        existing
            .local_storage
            .entry("https://example.com".to_string())
            .or_default()
            .insert("k1".to_string(), "stale".to_string());

        let snapshot = ContextCodec::snapshot(Some(&existing), &browser, &pages, None).await;
        assert_eq!(
            snapshot.local_storage["https://example.com"]["k1"],
            "fresh"
        );
    }
}
