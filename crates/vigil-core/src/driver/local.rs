//! Driver served directly by a node.
//!
//! A [`LocalDriver`] owns one [`HeadTracker`], one [`RevisionCache`] and one
//! [`InterruptToken`]. Reads resolve their revision against the current head
//! snapshot, then go through the cache:
//!
//! | Read | Cache placement |
//! |------|-----------------|
//! | block, transaction, receipt | pinned once irreversible, tied to the head before |
//! | account, code, storage at the head | tied, with the address as tie |
//! | explain at the head | tied, with the caller's ties |
//! | any read at a fixed block id or irreversible number | pinned |
//! | event / transfer logs | tied to the head |

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    errors::DriverError,
    signing::{Signer, SigningSession},
    Driver, DriverConfig,
};
use crate::{
    cache::{CacheKind, RevisionCache, RevisionCacheConfig},
    chain::{AssumeTouched, BloomPredicate, HeadState, HeadTracker, TrackerConfig},
    interrupt::InterruptToken,
    transport::{GenesisValidator, Method, RequestOptions, Transport, TransportError},
    types::{
        Block, CertMessage, CertResponse, EventFilterArg, ExplainArg, Head, Revision,
        SignCertOptions, SignTxOptions, TransferFilterArg, TxClause, TxResponse,
    },
    utils::{normalize_hex, request_key},
};

/// Revision marker of transactions and receipts in irreversible blocks.
const FINAL_REVISION: &str = "final";

/// Where a read at some revision lives in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    /// State at the current head; the string is the head id.
    Head(String),
    /// State at an immutable revision.
    Pinned(String),
    /// State relative to the head, at a revision other than the head.
    Relative(String),
}

impl Placement {
    fn revision(&self) -> &str {
        match self {
            Self::Head(rev) | Self::Pinned(rev) | Self::Relative(rev) => rev,
        }
    }
}

/// Configures and connects a [`LocalDriver`].
#[derive(Debug, Default)]
pub struct LocalDriverBuilder {
    tracker: TrackerConfig,
    cache: RevisionCacheConfig,
    driver: DriverConfig,
    predicate: Option<Arc<dyn BloomPredicate>>,
    signer: Option<Arc<dyn Signer>>,
    token: Option<InterruptToken>,
    expected_genesis: Option<String>,
}

impl LocalDriverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker = config;
        self
    }

    #[must_use]
    pub fn cache_config(mut self, config: RevisionCacheConfig) -> Self {
        self.cache = config;
        self
    }

    #[must_use]
    pub fn driver_config(mut self, config: DriverConfig) -> Self {
        self.driver = config;
        self
    }

    /// Bloom membership test used to keep tied entries across beats.
    #[must_use]
    pub fn predicate(mut self, predicate: Arc<dyn BloomPredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    #[must_use]
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Uses `token` (or a child of it) instead of a fresh interrupt token.
    #[must_use]
    pub fn interrupt_token(mut self, token: InterruptToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fails the connection unless the node's genesis block has this id.
    #[must_use]
    pub fn expect_genesis(mut self, genesis_id: impl Into<String>) -> Self {
        self.expected_genesis = Some(genesis_id.into());
        self
    }

    /// Fetches the genesis and best blocks, then starts head tracking.
    ///
    /// # Errors
    ///
    /// Fails if either block cannot be fetched or decoded, or if the genesis
    /// id differs from the expected one.
    pub async fn connect(self, transport: Arc<dyn Transport>) -> Result<LocalDriver, DriverError> {
        let token = self.token.clone().unwrap_or_default();

        let genesis_value = token
            .wrap(transport.request(Method::Get, "blocks/0", RequestOptions::default()))
            .await??;
        let genesis = decode_block(genesis_value)?;
        let genesis_id = normalize_hex(&genesis.id);

        if let Some(expected) = self.expected_genesis.as_deref().map(normalize_hex) &&
            expected != genesis_id
        {
            return Err(TransportError::GenesisMismatch { expected, actual: genesis_id }.into());
        }

        let validator = GenesisValidator::new(&genesis_id);
        let options = RequestOptions { validator: Some(&validator), ..Default::default() };
        let best_value =
            token.wrap(transport.request(Method::Get, "blocks/best", options)).await??;
        let best = decode_block(best_value.clone())?;

        info!(
            genesis = %genesis_id,
            head = %best.id,
            number = best.number,
            "connected to node"
        );
        self.assemble(transport, token, genesis, best.to_head(), best_value)
    }

    fn assemble(
        self,
        transport: Arc<dyn Transport>,
        token: InterruptToken,
        genesis: Block,
        head: Head,
        best: Value,
    ) -> Result<LocalDriver, DriverError> {
        let predicate =
            self.predicate.unwrap_or_else(|| Arc::new(AssumeTouched) as Arc<dyn BloomPredicate>);
        let cache = Arc::new(
            RevisionCache::new(&self.cache, &head.id, predicate)
                .map_err(|e| DriverError::InvalidArgument(e.to_string()))?,
        );
        cache.insert_tied(CacheKind::Block, &head.id, &head.id, Arc::new(best), None);

        let validator = GenesisValidator::new(&genesis.id);
        let state = Arc::new(HeadState::new(head));
        let tracker = HeadTracker::new(
            Arc::clone(&transport),
            Arc::clone(&state),
            Arc::clone(&cache),
            token.clone(),
            self.tracker,
        )
        .with_validator(validator.clone())
        .spawn();

        Ok(LocalDriver {
            transport,
            genesis,
            validator,
            state,
            cache,
            token,
            signer: self.signer,
            config: self.driver,
            tracker: Mutex::new(Some(tracker)),
        })
    }
}

fn decode_block(value: Value) -> Result<Block, DriverError> {
    serde_json::from_value(value).map_err(|e| DriverError::InvalidResponse(e.to_string()))
}

fn to_body<T: Serialize>(arg: &T) -> Result<Value, DriverError> {
    serde_json::to_value(arg).map_err(|e| DriverError::InvalidArgument(e.to_string()))
}

fn non_null(value: &Value) -> Option<Value> {
    (!value.is_null()).then(|| value.clone())
}

/// Block number a transaction or receipt payload was included in.
fn included_block_number(value: &Value) -> Option<u64> {
    value.pointer("/meta/blockNumber").and_then(Value::as_u64)
}

/// Driver backed by a node's HTTP API and Beat stream.
#[derive(Debug)]
pub struct LocalDriver {
    transport: Arc<dyn Transport>,
    genesis: Block,
    validator: GenesisValidator,
    state: Arc<HeadState>,
    cache: Arc<RevisionCache>,
    token: InterruptToken,
    signer: Option<Arc<dyn Signer>>,
    config: DriverConfig,
    tracker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalDriver {
    #[must_use]
    pub fn builder() -> LocalDriverBuilder {
        LocalDriverBuilder::new()
    }

    /// Connects with default configuration.
    ///
    /// # Errors
    ///
    /// See [`LocalDriverBuilder::connect`].
    pub async fn connect(transport: Arc<dyn Transport>) -> Result<Self, DriverError> {
        LocalDriverBuilder::new().connect(transport).await
    }

    #[must_use]
    pub fn head_state(&self) -> &Arc<HeadState> {
        &self.state
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<RevisionCache> {
        &self.cache
    }

    #[must_use]
    pub fn interrupt_token(&self) -> &InterruptToken {
        &self.token
    }

    /// Waits until the head tracker has stopped. Returns at once if it was
    /// already joined.
    pub async fn join(&self) {
        let handle = self.tracker.lock().take();
        if let Some(handle) = handle &&
            let Err(e) = handle.await
        {
            warn!(error = %e, "head tracker task failed");
        }
    }

    /// Sends one node request, retrying transient failures.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, DriverError> {
        let mut attempt = 0;
        loop {
            let options = RequestOptions { query, body, validator: Some(&self.validator) };
            match self.token.wrap(self.transport.request(method, path, options)).await? {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.fetch_retries => {
                    attempt += 1;
                    debug!(path, attempt, error = %e, "transient node error, retrying");
                    self.token.sleep(self.config.retry_delay(attempt)).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, DriverError> {
        self.send(Method::Get, path, query, None).await
    }

    fn place(&self, revision: &Revision, head: &Head) -> Placement {
        if revision.is_best() {
            return Placement::Head(head.id.clone());
        }
        if let Some(id) = revision.as_id() {
            return if id == head.id { Placement::Head(id) } else { Placement::Pinned(id) };
        }
        match revision {
            Revision::Number(n) if *n == head.number => Placement::Head(head.id.clone()),
            Revision::Number(n) if self.config.is_irreversible(*n, head) => {
                Placement::Pinned(n.to_string())
            }
            other => Placement::Relative(other.to_string()),
        }
    }

    /// Reads state at `revision` through the cache.
    async fn read_state(
        &self,
        kind: CacheKind,
        key: &str,
        path: &str,
        body: Option<&Value>,
        revision: &Revision,
        ties: Option<&[String]>,
    ) -> Result<Arc<Value>, DriverError> {
        let head = self.state.current();
        let placement = self.place(revision, &head);
        let query = [("revision", placement.revision().to_string())];
        let method = if body.is_some() { Method::Post } else { Method::Get };
        let fetch = || self.send(method, path, &query, body);

        match &placement {
            Placement::Head(head_id) => {
                self.cache.get_or_fetch_tied(kind, key, head_id, fetch, ties).await
            }
            Placement::Pinned(rev) => self.cache.get_or_fetch(kind, key, rev, fetch).await,
            Placement::Relative(rev) => {
                self.cache
                    .get_or_fetch_tied(kind, &format!("{key}@{rev}"), &head.id, fetch, None)
                    .await
            }
        }
    }

    /// Pins a block payload under its id and number once it is irreversible.
    fn promote_block(&self, value: &Arc<Value>, head: &Head) {
        let (Some(id), Some(number)) =
            (value.get("id").and_then(Value::as_str), value.get("number").and_then(Value::as_u64))
        else {
            return;
        };
        if self.config.is_irreversible(number, head) {
            self.cache.insert_pinned(CacheKind::Block, id, id, Arc::clone(value));
            let number = number.to_string();
            self.cache.insert_pinned(CacheKind::Block, &number, &number, Arc::clone(value));
        }
    }

    /// Reads a transaction or receipt, pinned once its block is irreversible.
    async fn read_included(
        &self,
        kind: CacheKind,
        id: &str,
        path: &str,
        allow_pending: bool,
    ) -> Result<Option<Value>, DriverError> {
        if let Some(hit) = self.cache.probe_pinned(kind, id, FINAL_REVISION) {
            return Ok(non_null(&hit));
        }

        let head = self.state.current();
        let mut query = vec![("head", head.id.clone())];
        let key = if allow_pending {
            query.push(("pending", "true".to_string()));
            format!("{id}|pending")
        } else {
            id.to_string()
        };

        let value = self
            .cache
            .get_or_fetch_tied(kind, &key, &head.id, || self.get(path, &query), None)
            .await?;
        if included_block_number(&value).is_some_and(|n| self.config.is_irreversible(n, &head)) {
            self.cache.insert_pinned(kind, id, FINAL_REVISION, Arc::clone(&value));
        }
        Ok(non_null(&value))
    }

    async fn filter_logs(
        &self,
        kind: CacheKind,
        path: &str,
        body: Value,
    ) -> Result<Value, DriverError> {
        let head = self.state.current();
        let key = request_key(&body);
        let value = self
            .cache
            .get_or_fetch_tied(
                kind,
                &key,
                &head.id,
                || self.send(Method::Post, path, &[], Some(&body)),
                None,
            )
            .await?;
        Ok((*value).clone())
    }

    fn signer(&self, operation: &str) -> Result<Arc<dyn Signer>, DriverError> {
        if self.token.is_interrupted() {
            return Err(DriverError::Interrupted);
        }
        self.signer.clone().ok_or_else(|| DriverError::Unsupported(operation.to_string()))
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn genesis(&self) -> &Block {
        &self.genesis
    }

    fn head(&self) -> Arc<Head> {
        self.state.current()
    }

    async fn poll_head(&self) -> Result<Arc<Head>, DriverError> {
        Ok(self.token.wrap(self.state.next_head()).await?)
    }

    async fn get_block(&self, revision: Revision) -> Result<Option<Value>, DriverError> {
        let head = self.state.current();
        let key = match revision.as_id() {
            Some(id) => id,
            None if revision.is_best() => head.id.clone(),
            None => revision.to_string(),
        };

        if let Some(hit) = self.cache.probe_pinned(CacheKind::Block, &key, &key) {
            return Ok(non_null(&hit));
        }

        let path = format!("blocks/{key}");
        let fetch = || self.get(&path, &[]);
        let value = match revision {
            Revision::Number(n) if self.config.is_irreversible(n, &head) => {
                self.cache.get_or_fetch(CacheKind::Block, &key, &key, fetch).await?
            }
            _ => self.cache.get_or_fetch_tied(CacheKind::Block, &key, &head.id, fetch, None).await?,
        };

        self.promote_block(&value, &head);
        Ok(non_null(&value))
    }

    async fn get_transaction(
        &self,
        id: &str,
        allow_pending: bool,
    ) -> Result<Option<Value>, DriverError> {
        let id = normalize_hex(id);
        let path = format!("transactions/{id}");
        self.read_included(CacheKind::Transaction, &id, &path, allow_pending).await
    }

    async fn get_receipt(&self, id: &str) -> Result<Option<Value>, DriverError> {
        let id = normalize_hex(id);
        let path = format!("transactions/{id}/receipt");
        self.read_included(CacheKind::Receipt, &id, &path, false).await
    }

    async fn get_account(&self, address: &str, revision: Revision) -> Result<Value, DriverError> {
        let address = normalize_hex(address);
        let path = format!("accounts/{address}");
        let ties = [address.clone()];
        let value = self
            .read_state(CacheKind::Account, &address, &path, None, &revision, Some(&ties))
            .await?;
        Ok((*value).clone())
    }

    async fn get_code(&self, address: &str, revision: Revision) -> Result<Value, DriverError> {
        let address = normalize_hex(address);
        let path = format!("accounts/{address}/code");
        let ties = [address.clone()];
        let value =
            self.read_state(CacheKind::Code, &address, &path, None, &revision, Some(&ties)).await?;
        Ok((*value).clone())
    }

    async fn get_storage(
        &self,
        address: &str,
        key: &str,
        revision: Revision,
    ) -> Result<Value, DriverError> {
        let address = normalize_hex(address);
        let key = normalize_hex(key);
        let path = format!("accounts/{address}/storage/{key}");
        let ties = [address.clone()];
        let value = self
            .read_state(
                CacheKind::Storage,
                &format!("{address}|{key}"),
                &path,
                None,
                &revision,
                Some(&ties),
            )
            .await?;
        Ok((*value).clone())
    }

    async fn explain(
        &self,
        arg: &ExplainArg,
        revision: Revision,
        cache_ties: Option<&[String]>,
    ) -> Result<Value, DriverError> {
        let body = to_body(arg)?;
        let key = request_key(&body);
        let value = self
            .read_state(CacheKind::Explain, &key, "accounts/*", Some(&body), &revision, cache_ties)
            .await?;
        Ok((*value).clone())
    }

    async fn filter_event_logs(&self, arg: &EventFilterArg) -> Result<Value, DriverError> {
        self.filter_logs(CacheKind::EventLogs, "logs/event", to_body(arg)?).await
    }

    async fn filter_transfer_logs(&self, arg: &TransferFilterArg) -> Result<Value, DriverError> {
        self.filter_logs(CacheKind::TransferLogs, "logs/transfer", to_body(arg)?).await
    }

    async fn sign_tx(
        &self,
        message: Vec<TxClause>,
        options: SignTxOptions,
    ) -> Result<SigningSession<TxResponse>, DriverError> {
        let signer = self.signer("signTx")?;
        let (handle, session) = SigningSession::channel();
        let token = self.token.clone();

        tokio::spawn(async move {
            let outcome = token.wrap(signer.sign_tx(message, options, handle.prepared)).await;
            let _ = handle.result.send(outcome.unwrap_or_else(|e| Err(e.into())));
        });
        Ok(session)
    }

    async fn sign_cert(
        &self,
        message: CertMessage,
        options: SignCertOptions,
    ) -> Result<SigningSession<CertResponse>, DriverError> {
        let signer = self.signer("signCert")?;
        let (handle, session) = SigningSession::channel();
        let token = self.token.clone();

        tokio::spawn(async move {
            let outcome = token.wrap(signer.sign_cert(message, options, handle.prepared)).await;
            let _ = handle.result.send(outcome.unwrap_or_else(|e| Err(e.into())));
        });
        Ok(session)
    }

    async fn is_address_owned(&self, address: &str) -> Result<bool, DriverError> {
        let Some(signer) = self.signer.as_ref() else { return Ok(false) };
        self.token.wrap(signer.is_address_owned(&normalize_hex(address))).await?
    }

    fn close(&self) {
        if self.token.interrupt() {
            self.cache.clear();
            info!(head = %self.state.current().id, "driver closed");
        }
    }
}
