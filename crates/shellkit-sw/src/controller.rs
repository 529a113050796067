//! The offline cache controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use http::{Method, StatusCode};
use serde::Serialize;
use shellkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, trace, warn};

use crate::background::BackgroundTasks;
use crate::classify::{RequestClass, RequestClassifier};
use crate::config::{ControllerConfig, GenerationId};
use crate::entry::CacheEntry;
use crate::error::ControllerError;
use crate::event::{ControllerEvent, ControllerState};
use crate::store::CacheStore;

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchDecision {
    /// Not handled here; the host performs its normal network fetch.
    Passthrough,
    /// Answer the request with this response.
    Respond(Response),
}

impl FetchDecision {
    /// The response, if the controller produced one.
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchDecision::Passthrough => None,
            FetchDecision::Respond(response) => Some(response),
        }
    }
}

/// Outcome of a generation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Generations left in place.
    pub retained: Vec<GenerationId>,
    /// Generations deleted.
    pub purged: Vec<GenerationId>,
}

/// Body served for a dynamic API request that could not reach the network.
pub fn offline_fallback(request_url: url::Url) -> Response {
    Response::synthesized_json(
        request_url,
        StatusCode::OK,
        &serde_json::json!({ "error": "Offline" }),
    )
}

/// Intercepts same-origin requests and applies the caching policy for their
/// class, keeping exactly one live cache generation.
pub struct OfflineController {
    config: ControllerConfig,
    classifier: RequestClassifier,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<ControllerState>,
    /// Cleared once our generation has been superseded.
    persisting: Arc<AtomicBool>,
    tasks: BackgroundTasks,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl OfflineController {
    /// Create a controller over an injected store and fetcher.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>), ControllerError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            classifier: config.classifier(),
            config,
            store,
            fetcher,
            state: RwLock::new(ControllerState::Uninitialized),
            persisting: Arc::new(AtomicBool::new(true)),
            tasks: BackgroundTasks::new(event_tx.clone()),
            event_tx,
        };
        Ok((controller, event_rx))
    }

    /// The validated configuration this controller was built with.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The generation this controller reads and writes.
    pub fn generation(&self) -> &GenerationId {
        &self.config.generation
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    /// Seed the current generation.
    ///
    /// Every seed must come back 2xx before anything is committed. On failure
    /// the controller ends in [`ControllerState::Failed`] with nothing stored.
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.state.write().await;
            match *state {
                ControllerState::Uninitialized => *state = ControllerState::Activating,
                ControllerState::Ready => {
                    debug!(generation = %self.config.generation, "Already initialized");
                    return Ok(());
                }
                other => {
                    return Err(ControllerError::StateError(format!(
                        "cannot initialize a controller that is {other:?}"
                    )));
                }
            }
        }
        self.emit_state(ControllerState::Activating);

        match self.seed().await {
            Ok(count) => {
                self.set_state(ControllerState::Ready).await;
                info!(generation = %self.config.generation, seeded = count, "Controller ready");
                Ok(())
            }
            Err(error) => {
                self.set_state(ControllerState::Failed).await;
                warn!(generation = %self.config.generation, %error, "Seeding failed");
                Err(error)
            }
        }
    }

    async fn seed(&self) -> Result<usize, ControllerError> {
        let urls = self.config.seed_requests()?;

        let fetches = urls.into_iter().map(|url| {
            let request = Request::get(url);
            let key = request.cache_key();
            let fetch = self.fetcher.fetch(request);
            async move {
                let response = fetch.await.map_err(|e| ControllerError::SeedFailed {
                    url: key.clone(),
                    reason: e.to_string(),
                })?;
                if !response.ok() {
                    return Err(ControllerError::SeedFailed {
                        url: key,
                        reason: format!("HTTP {}", response.status),
                    });
                }
                trace!(url = %key, "Seed fetched");
                Ok(CacheEntry::from_response(&key, &Method::GET, &response))
            }
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.store.put_all(&self.config.generation, entries).await?;
        Ok(count)
    }

    /// Attach to a generation seeded by an earlier run.
    ///
    /// Returns `true` and moves to `Ready` if the store already holds every
    /// seed in the current generation. Otherwise the state is unchanged and
    /// the caller should [`initialize`](Self::initialize).
    pub async fn resume(&self) -> Result<bool, ControllerError> {
        let mut state = self.state.write().await;
        match *state {
            ControllerState::Uninitialized => {}
            ControllerState::Ready => return Ok(true),
            other => {
                return Err(ControllerError::StateError(format!(
                    "cannot resume a controller that is {other:?}"
                )));
            }
        }

        let generation = &self.config.generation;
        if !self.store.has(generation).await? {
            debug!(%generation, "No stored generation to resume");
            return Ok(false);
        }
        for url in self.config.seed_requests()? {
            let key = Request::get(url).cache_key();
            if self.store.match_request(generation, &key).await?.is_none() {
                debug!(%generation, url = %key, "Stored generation is missing a seed");
                return Ok(false);
            }
        }

        *state = ControllerState::Ready;
        drop(state);
        self.emit_state(ControllerState::Ready);
        info!(%generation, "Resumed stored generation");
        Ok(true)
    }

    /// Activation: purge every generation but our own.
    pub async fn activate(&self) -> Result<SweepReport, ControllerError> {
        let state = self.state().await;
        if state != ControllerState::Ready {
            return Err(ControllerError::StateError(format!(
                "cannot activate a controller that is {state:?}"
            )));
        }
        let current = self.config.generation.clone();
        self.supersede(&current).await
    }

    /// Delete every stored generation whose tag differs from `new_generation`.
    ///
    /// When `new_generation` is not this controller's own, this controller
    /// stops persisting revalidated responses so its purged generation is not
    /// recreated.
    pub async fn supersede(
        &self,
        new_generation: &GenerationId,
    ) -> Result<SweepReport, ControllerError> {
        if *new_generation != self.config.generation {
            self.persisting.store(false, Ordering::Release);
        }

        let mut report = SweepReport::default();
        for generation in self.store.keys().await? {
            if generation == *new_generation {
                report.retained.push(generation);
                continue;
            }
            if self.store.delete(&generation).await? {
                debug!(%generation, "Purged stale generation");
                let _ = self.event_tx.send(ControllerEvent::GenerationPurged {
                    generation: generation.clone(),
                });
                report.purged.push(generation);
            }
        }

        info!(
            current = %new_generation,
            purged = report.purged.len(),
            "Generation sweep complete"
        );
        Ok(report)
    }

    /// Interception hook for every outgoing request.
    pub async fn handle_request(&self, request: Request) -> Result<FetchDecision, ControllerError> {
        let class = self.classifier.classify(&request.url);
        debug!(url = %request.url, method = %request.method, ?class, "Intercepted request");

        if class == RequestClass::CrossOrigin {
            return Ok(FetchDecision::Passthrough);
        }
        if self.state().await != ControllerState::Ready {
            trace!(url = %request.url, "Controller not ready; passing through");
            return Ok(FetchDecision::Passthrough);
        }

        if class == RequestClass::DynamicApi {
            return Ok(FetchDecision::Respond(self.network_first(request).await));
        }
        self.stale_while_revalidate(request)
            .await
            .map(FetchDecision::Respond)
    }

    /// Network-first for dynamic endpoints. Never touches the cache.
    async fn network_first(&self, request: Request) -> Response {
        let url = request.url.clone();
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %url, %error, "API request failed; serving offline fallback");
                offline_fallback(url)
            }
        }
    }

    /// Stale-while-revalidate for static assets.
    async fn stale_while_revalidate(&self, request: Request) -> Result<Response, ControllerError> {
        if request.method != Method::GET {
            // Only GET responses are cacheable.
            return Ok(self.fetcher.fetch(request).await?);
        }

        let key = request.cache_key();
        let (network_tx, network_rx) = oneshot::channel();
        self.revalidate(request, key.clone(), network_tx);

        match self.store.match_request(&self.config.generation, &key).await {
            Ok(Some(entry)) => match entry.to_response() {
                Ok(response) => {
                    trace!(url = %key, "Serving from cache");
                    return Ok(response);
                }
                Err(error) => warn!(url = %key, %error, "Unreadable cache entry; waiting for network"),
            },
            Ok(None) => trace!(url = %key, "Cache miss"),
            Err(error) => warn!(url = %key, %error, "Cache lookup failed; waiting for network"),
        }

        match network_rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(NetError::Cancelled.into()),
        }
    }

    /// Start the network half of stale-while-revalidate as a detached task.
    ///
    /// The result is offered on `network_tx` before the cache write starts,
    /// so a waiting caller is never held up by storage.
    fn revalidate(
        &self,
        request: Request,
        key: String,
        network_tx: oneshot::Sender<Result<Response, NetError>>,
    ) {
        let fetch = self.fetcher.fetch(request);
        let store = Arc::clone(&self.store);
        let generation = self.config.generation.clone();
        let persisting = Arc::clone(&self.persisting);
        let events = self.event_tx.clone();

        self.tasks.spawn("revalidate", async move {
            let result = fetch.await;
            let entry = match &result {
                Ok(response) if response.ok() => {
                    Some(CacheEntry::from_response(&key, &Method::GET, response))
                }
                Ok(response) => {
                    trace!(url = %key, status = %response.status, "Not caching non-success response");
                    None
                }
                Err(error) => {
                    debug!(url = %key, %error, "Revalidation fetch failed");
                    None
                }
            };

            // Nobody is listening when the caller was served from cache.
            let _ = network_tx.send(result);

            let Some(entry) = entry else {
                return Ok(());
            };
            if !persisting.load(Ordering::Acquire) {
                trace!(url = %key, "Generation superseded; not storing");
                return Ok(());
            }
            store.put(&generation, entry).await?;
            let _ = events.send(ControllerEvent::EntryStored {
                generation,
                url: key,
            });
            Ok::<(), crate::error::CacheError>(())
        });
    }

    /// Wait for every background cache write started so far.
    pub async fn settle(&self) {
        self.tasks.settle().await;
    }

    /// Background tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.in_flight()
    }

    async fn set_state(&self, state: ControllerState) {
        *self.state.write().await = state;
        self.emit_state(state);
    }

    fn emit_state(&self, state: ControllerState) {
        let _ = self.event_tx.send(ControllerEvent::StateChange {
            generation: self.config.generation.clone(),
            state,
        });
    }
}

impl std::fmt::Debug for OfflineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineController")
            .field("generation", &self.config.generation)
            .field("origin", &self.config.origin.as_str())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}
