use crate::cache::{CacheLayer, CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
use crate::commands::{self, CacheAction, Command};
use crate::config::{CacheBackend, CacheConfig, Config};
use crate::services::{AstronomyService, EventsQuery, FeedQuery, FeedService, ProxyService};
use crate::upstream::FetchClient;
use color_eyre::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Trend points shown on the dashboard.
const DASHBOARD_TREND_LIMIT: u32 = 240;

/// Services wired to one shared cache and HTTP client.
pub struct App {
  cache: CacheLayer,
  proxy: ProxyService,
  astronomy: AstronomyService,
  feed: FeedService,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let storage = build_storage(&config.cache)?;
    let cache = CacheLayer::new(storage);
    Ok(Self::with_cache(config, cache, FetchClient::new()?))
  }

  fn with_cache(config: Config, cache: CacheLayer, fetch: FetchClient) -> Self {
    Self {
      proxy: ProxyService::new(config.upstream, fetch.clone(), cache.clone()),
      astronomy: AstronomyService::new(config.astronomy, fetch.clone(), cache.clone()),
      feed: FeedService::new(config.jwst, fetch, cache.clone()),
      cache,
    }
  }

  /// Execute one command and return the document to print.
  pub async fn run(&self, command: Command) -> Result<Value> {
    debug!(command = ?command, "Running command");
    let output = match command {
      Command::Last => self.proxy.get_last_position().await,
      Command::Trend { limit } => self.proxy.get_trend(limit).await,
      Command::Osdr { params } => {
        self
          .proxy
          .get_catalog(&commands::catalog_params(&params))
          .await
      }
      Command::Events(args) => self.astronomy.get_events(&args.into()).await,
      Command::Feed(args) => self.feed.get_feed(&args.into()).await,
      Command::Health => json!({ "ok": self.proxy.health_check().await }),
      Command::Dashboard => self.dashboard().await,
      Command::Cache { action } => self.cache_maintenance(action).await?,
    };
    Ok(output)
  }

  /// Everything the dashboard page renders, fetched concurrently.
  async fn dashboard(&self) -> Value {
    let events_query = EventsQuery::default();
    let feed_query = FeedQuery::default();
    let (last, trend, events, feed, healthy) = tokio::join!(
      self.proxy.get_last_position(),
      self.proxy.get_trend(DASHBOARD_TREND_LIMIT),
      self.astronomy.get_events(&events_query),
      self.feed.get_feed(&feed_query),
      self.proxy.health_check(),
    );

    json!({
      "iss": {
        "last": last,
        "trend": trend,
      },
      "events": events,
      "jwst": feed,
      "health": { "ok": healthy },
    })
  }

  async fn cache_maintenance(&self, action: CacheAction) -> Result<Value> {
    match action {
      CacheAction::Purge => {
        let purged = self.cache.purge_expired()?;
        info!(purged, "Purged expired cache entries");
        Ok(json!({ "purged": purged }))
      }
      CacheAction::Forget { key } => {
        let removed = self.cache.forget(&key).await?;
        info!(key = %key, removed, "Forgot cache entry");
        Ok(json!({ "key": key, "removed": removed }))
      }
    }
  }
}

fn build_storage(config: &CacheConfig) -> Result<Arc<dyn CacheStorage>> {
  let storage: Arc<dyn CacheStorage> = match config.backend {
    CacheBackend::Memory => Arc::new(MemoryStorage::new()),
    CacheBackend::Sqlite => Arc::new(SqliteStorage::open(config.path.as_deref())?),
    CacheBackend::Disabled => Arc::new(NoopStorage),
  };
  info!(backend = ?config.backend, "Cache storage ready");
  Ok(storage)
}
