//! Authenticated sessions.
//!
//! A [`Session`] owns everything shared by the records it produces: the
//! authenticated client, the identity cache and the memo of fill searches.
//! Records keep a weak reference back to it, so dropping the last
//! [`Session`] handle frees the whole graph; records that outlive it keep
//! their values but stop filling.

mod client;
mod dispatcher;
mod identity;
mod results;

pub use identity::CacheStats;
pub use results::QueryResults;

use serde_json::{Map, Value};
use std::sync::Arc;

use self::client::DslClient;
use self::dispatcher::Dispatcher;
use self::identity::IdentityCache;
use crate::config::Config;
use crate::error::{DimensionsError, Result};
use crate::models::{json_is_empty, kinds, parse_query, EntityKind, MergePolicy, Record, RecordRef};
use crate::transport::{CachingTransport, HttpTransport, Transport};
use crate::utils::RetryConfig;

pub(crate) struct SessionInner {
    client: DslClient,
    identity: IdentityCache,
    dispatcher: Dispatcher,
    fetch_size: usize,
}

impl SessionInner {
    /// Get-or-create factory; every record built inside a session goes
    /// through here.
    pub(crate) fn make(self: &Arc<Self>, kind: EntityKind, data: &Value) -> Result<RecordRef> {
        let map = data.as_object().ok_or_else(|| {
            DimensionsError::MalformedData(format!("{} data is not a JSON object", kind))
        })?;
        let identifier = kinds::identifier(kind, map);
        let session = Arc::downgrade(self);

        if identifier.is_empty() || !kind.field_set().is_cacheable() {
            return Ok(Arc::new(Record::new(kind, data, session)?));
        }
        self.identity
            .get_or_create(kind, &identifier, || Record::new(kind, data, session))
    }

    /// Run a fill template for one identifier
    pub(crate) fn fill(&self, template: &str, identifier: &str) -> Result<Option<Map<String, Value>>> {
        self.dispatcher.fill(&self.client, template, identifier)
    }
}

/// Entry point: an authenticated connection to the search service
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Use an already-issued token
    pub fn with_token(
        transport: Arc<dyn Transport>,
        config: &Config,
        token: &str,
    ) -> Result<Self> {
        let client = DslClient::new(
            transport,
            config.api.dsl_url.clone(),
            token,
            RetryConfig::from(&config.query),
        )?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                identity: IdentityCache::default(),
                dispatcher: Dispatcher::default(),
                fetch_size: config.query.fetch_size.max(1),
            }),
        })
    }

    /// Log in with a username and password
    pub fn login(
        transport: Arc<dyn Transport>,
        config: &Config,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let token = client::login(transport.as_ref(), &config.api.auth_url, username, password)?;
        tracing::info!("logged in as '{}'", username);
        Self::with_token(transport, config, &token)
    }

    /// Build the HTTP transport (with the response cache when enabled) and
    /// authenticate with the configured token or credentials
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);
        let transport: Arc<dyn Transport> = if config.cache.enabled {
            Arc::new(CachingTransport::new(http, config.cache.clone())?)
        } else {
            http
        };

        match (&config.api.token, &config.api.username, &config.api.password) {
            (Some(token), _, _) => Self::with_token(transport, config, token),
            (None, Some(username), Some(password)) => {
                Self::login(transport, config, username, password)
            }
            _ => Err(DimensionsError::AuthenticationFailure(
                "no token and no username/password configured".to_string(),
            )),
        }
    }

    /// Run a search, paging with the configured fetch size
    pub fn query(&self, text: &str) -> Result<QueryResults> {
        self.query_paged(text, None, self.inner.fetch_size)
    }

    /// Run a search yielding at most `cap` records, fetched `page_size` at a
    /// time. Invalid search text, a zero page size or a zero cap fail before
    /// anything is sent.
    pub fn query_paged(
        &self,
        text: &str,
        cap: Option<usize>,
        page_size: usize,
    ) -> Result<QueryResults> {
        if page_size == 0 {
            return Err(DimensionsError::RequestRejected(
                "page size must be positive".to_string(),
            ));
        }
        if cap == Some(0) {
            return Err(DimensionsError::RequestRejected(
                "result limit must be positive; leave it unset for no limit".to_string(),
            ));
        }
        let query = parse_query(text)?;
        QueryResults::start(self.inner.clone(), query, cap, page_size)
    }

    /// Build a record of `kind` from a payload, sharing instances with
    /// everything else this session has produced
    pub fn record(&self, kind: EntityKind, data: &Value) -> Result<RecordRef> {
        self.inner.make(kind, data)
    }

    /// The researcher behind a publication author.
    ///
    /// Authors are tied to the publication that listed them; the researcher
    /// is the session-wide record for the same person. Values the author
    /// already holds are merged into it without overwriting anything.
    pub fn researcher_from_author(&self, author: &RecordRef) -> Result<RecordRef> {
        if author.kind() != EntityKind::Author {
            return Err(DimensionsError::MalformedData(format!(
                "{} is not an author",
                author
            )));
        }

        let mut data = author.payload().clone();
        if let Value::Object(held) = author.snapshot() {
            if let Some(org_id) = held
                .get("current_organization")
                .and_then(|org| org.get("id"))
                .filter(|id| !json_is_empty(id))
            {
                data.insert("current_organization_id".to_string(), org_id.clone());
            }
            for (field, value) in held {
                if field == "current_organization" || json_is_empty(&value) {
                    continue;
                }
                if data.get(&field).map_or(true, json_is_empty) {
                    data.insert(field, value);
                }
            }
        }

        let data = Value::Object(data);
        let researcher = self.inner.make(EntityKind::Researcher, &data)?;
        researcher.merge(&data, MergePolicy::KeepExisting)?;
        Ok(researcher)
    }

    /// The shared record for an identifier, if one has been built
    pub fn cached(&self, kind: EntityKind, identifier: &str) -> Option<RecordRef> {
        self.inner.identity.get(kind, identifier)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.identity.stats()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("fetch_size", &self.inner.fetch_size)
            .field("cache", &self.inner.identity.stats())
            .finish()
    }
}
