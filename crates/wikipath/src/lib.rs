//! `wikipath` crate (library surface).
//!
//! The primary entrypoint is the `wikipath` binary. This library exists so
//! the runtime wiring (store + cache + client + orchestrator) and the SSE
//! framing stay testable and reusable without depending on internal crate
//! layout.

pub use wikipath_core as core;

pub mod runtime {
    use std::path::Path;
    use std::sync::Arc;

    use wikipath_core::{
        CacheConfig, ClientConfig, Error, Event, Result, SearchConfig,
    };
    use wikipath_local::cache::SegmentCache;
    use wikipath_local::orchestrate::Orchestrator;
    use wikipath_local::store::SegmentStore;
    use wikipath_local::wiki::WikiClient;

    /// Everything one process needs to serve searches.
    pub struct Components {
        pub orchestrator: Arc<Orchestrator>,
        pub store: SegmentStore,
        pub cache: Arc<SegmentCache>,
    }

    /// Client settings, with environment overrides applied.
    pub fn client_config() -> ClientConfig {
        let mut cfg = ClientConfig::default();
        if let Some(endpoint) = env_nonempty("WIKIPATH_API_ENDPOINT") {
            cfg.endpoint = endpoint;
        }
        if let Some(user_agent) = env_nonempty("WIKIPATH_USER_AGENT") {
            cfg.user_agent = user_agent;
        }
        cfg
    }

    fn env_nonempty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Opens the database under `data_dir` and wires up the full stack.
    pub fn open(data_dir: &Path) -> Result<Components> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Store(format!("cannot create data dir: {e}")))?;
        let store = SegmentStore::open(data_dir.join("wikipath.db"))?;
        let client = WikiClient::new(&client_config())?;
        let cache = Arc::new(SegmentCache::new(&CacheConfig::default(), Some(store.clone())));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(client),
            cache.clone(),
            Some(store.clone()),
            SearchConfig::default(),
        ));
        Ok(Components {
            orchestrator,
            store,
            cache,
        })
    }

    /// One server-sent event frame: `data: <json>\n\n`.
    pub fn sse_frame(event: &Event) -> String {
        let json = serde_json::to_string(event)
            .unwrap_or_else(|_| r#"{"type":"error","data":{"message":"unserializable event"}}"#.to_string());
        format!("data: {json}\n\n")
    }

}
