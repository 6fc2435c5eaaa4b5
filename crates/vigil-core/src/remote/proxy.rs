//! Client side of the remote driver protocol.
//!
//! ```text
//!                ┌───────────── supervisor ─────────────┐
//!                │  follow: pollHead ─► head cell ─┐    │
//!                │        ▲  (5 s backoff on error)│    │
//!                │        └────────────────────────┘    │
//!                │  link lost ─► sleep 10 s ─► connect  │
//!                └──────────────────────────────────────┘
//! call() ─► Link.outbox ─► writer ─► channel ─► reader ─► Link.pending[id]
//! ```
//!
//! Pending requests fail with [`DriverError::Closed`] when their link is
//! lost; requests are never replayed on the next link.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::{
    channel::{Connector, FrameStream},
    wire::{Frame, Notification, Request, Response},
    RemoteConfig,
};
use crate::{
    chain::HeadState,
    driver::{Driver, DriverError, PreparedNotifier, SigningSession},
    interrupt::InterruptToken,
    types::{
        Block, CertMessage, CertResponse, Connected, EventFilterArg, ExplainArg, Head, Revision,
        SignCertOptions, SignTxOptions, TransferFilterArg, TxClause, TxResponse,
    },
};

struct Pending {
    reply: oneshot::Sender<Result<Value, DriverError>>,
    prepared: Option<PreparedNotifier>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, Pending>,
    closed: bool,
}

/// One established channel. Its reader and writer stop when `token` fires.
struct Link {
    outbox: mpsc::UnboundedSender<String>,
    pending: Mutex<PendingTable>,
    token: InterruptToken,
}

impl Link {
    /// Registers request `id`, unless the link already failed its requests.
    fn register(&self, id: u64, pending: Pending) -> Result<(), DriverError> {
        let mut table = self.pending.lock();
        if table.closed {
            return Err(DriverError::Closed);
        }
        table.entries.insert(id, pending);
        Ok(())
    }

    fn take(&self, id: u64) -> Option<Pending> {
        self.pending.lock().entries.remove(&id)
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Fails every pending request with [`DriverError::Closed`]; later
    /// registrations are refused.
    fn fail_pending(&self) {
        let drained: Vec<Pending> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.entries.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing requests of lost link");
        }
        for pending in drained {
            let _ = pending.reply.send(Err(DriverError::Closed));
        }
    }
}

/// Shared state of the proxy and its background tasks.
struct Inner {
    connector: Arc<dyn Connector>,
    genesis_id: Mutex<Option<String>>,
    state: HeadState,
    link: Mutex<Option<Arc<Link>>>,
    next_id: AtomicU64,
    token: InterruptToken,
    config: RemoteConfig,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("connector", &self.connector)
            .field("head", &self.state.current().id)
            .field("connected", &self.link.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn new(
        connector: Arc<dyn Connector>,
        genesis_id: Option<String>,
        config: RemoteConfig,
    ) -> Arc<Self> {
        let placeholder = Head {
            id: String::new(),
            number: 0,
            parent_id: String::new(),
            timestamp: 0,
            txs_features: None,
        };
        Arc::new(Self {
            connector,
            genesis_id: Mutex::new(genesis_id),
            state: HeadState::new(placeholder),
            link: Mutex::new(None),
            next_id: AtomicU64::new(1),
            token: InterruptToken::new(),
            config,
        })
    }

    /// Opens a channel and performs the handshake.
    async fn establish(
        self: &Arc<Self>,
    ) -> Result<(Connected, oneshot::Receiver<()>), DriverError> {
        let channel = self.token.wrap(self.connector.connect()).await?.map_err(|e| {
            DriverError::Remote { kind: "transient".into(), message: e.to_string() }
        })?;
        let (mut sink, stream) = channel.split();
        let (outbox, mut outgoing) = mpsc::unbounded_channel::<String>();
        let link =
            Arc::new(Link { outbox, pending: Mutex::default(), token: self.token.child() });

        let token = link.token.clone();
        tokio::spawn(async move {
            while let Ok(Some(text)) = token.wrap(outgoing.recv()).await {
                if sink.send(text).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).read(stream, Arc::clone(&link), closed_tx));

        // The link is published only after the host accepted the handshake.
        let genesis_id = self.genesis_id.lock().clone();
        let connected = self
            .call_on(&link, "connect", vec![json!(genesis_id)], None)
            .await
            .and_then(decode::<Connected>)
            .and_then(|connected| {
                let mut current = self.link.lock();
                if link.is_closed() || self.token.is_interrupted() {
                    return Err(DriverError::Closed);
                }
                *current = Some(Arc::clone(&link));
                Ok(connected)
            });
        let connected = match connected {
            Ok(connected) => connected,
            Err(e) => {
                link.token.interrupt();
                return Err(e);
            }
        };

        self.genesis_id.lock().get_or_insert_with(|| connected.genesis.id.clone());
        self.observe(connected.head.clone());
        Ok((connected, closed_rx))
    }

    /// Reads frames of `link` until it closes.
    async fn read(
        self: Arc<Self>,
        mut stream: FrameStream,
        link: Arc<Link>,
        closed: oneshot::Sender<()>,
    ) {
        while let Ok(Some(Ok(text))) = link.token.wrap(stream.next()).await {
            match Frame::decode(&text) {
                Ok(Frame::Response(response)) => self.settle(&link, response),
                Ok(Frame::Notification(notification)) => self.notified(&link, notification),
                Ok(Frame::Request(_)) => warn!("host sent a client frame"),
                Err(e) => warn!(error = %e, "undecodable host frame"),
            }
        }

        link.token.interrupt();
        link.fail_pending();
        {
            let mut current = self.link.lock();
            if current.as_ref().is_some_and(|l| Arc::ptr_eq(l, &link)) {
                *current = None;
            }
        }
        let _ = closed.send(());
    }

    fn settle(&self, link: &Link, response: Response) {
        let Some(pending) = link.take(response.id) else {
            trace!(id = response.id, "response to unknown request");
            return;
        };
        let _ = pending.reply.send(response.into_result());
    }

    fn notified(&self, link: &Link, notification: Notification) {
        match notification.method.as_str() {
            "head" => {
                let head = notification.args.into_iter().next().map(decode::<Head>);
                match head {
                    Some(Ok(head)) => self.observe(head),
                    _ => warn!("malformed head notification"),
                }
            }
            "prepared" => {
                let Some(id) = notification.args.first().and_then(Value::as_u64) else {
                    warn!("malformed prepared notification");
                    return;
                };
                if let Some(pending) = link.pending.lock().entries.get_mut(&id) &&
                    let Some(mut prepared) = pending.prepared.take()
                {
                    prepared.notify();
                }
            }
            other => debug!(method = other, "unknown notification ignored"),
        }
    }

    fn observe(&self, head: Head) {
        if let Some(head) = self.state.advance(head, |_| {}) {
            trace!(head = %head.id, number = head.number, "remote head accepted");
        }
    }

    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        prepared: Option<PreparedNotifier>,
    ) -> Result<Value, DriverError> {
        if self.token.is_interrupted() {
            return Err(DriverError::Interrupted);
        }
        let link = self.link.lock().clone().ok_or(DriverError::Closed)?;
        self.call_on(&link, method, args, prepared).await
    }

    /// Sends a request over `link` and waits for its response.
    async fn call_on(
        &self,
        link: &Link,
        method: &str,
        args: Vec<Value>,
        prepared: Option<PreparedNotifier>,
    ) -> Result<Value, DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, result) = oneshot::channel();
        link.register(id, Pending { reply, prepared })?;

        let frame = Frame::Request(Request { id, method: method.to_string(), args }).encode();
        if link.outbox.send(frame).is_err() {
            link.take(id);
            return Err(DriverError::Closed);
        }

        match self.token.wrap(result).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DriverError::Closed),
            Err(_) => {
                link.take(id);
                Err(DriverError::Interrupted)
            }
        }
    }

    /// Keeps the head cell current through `pollHead` until `closed` fires,
    /// then reconnects.
    async fn supervise(self: Arc<Self>, mut closed: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                () = self.follow() => return,
                _ = &mut closed => {}
            }

            warn!(
                delay_seconds = self.config.reconnect_delay_seconds,
                "remote channel lost, reconnecting"
            );
            closed = loop {
                if self.token.sleep(self.config.reconnect_delay()).await.is_err() {
                    return;
                }
                match self.establish().await {
                    Ok((connected, closed)) => {
                        info!(head = %connected.head.id, "remote channel re-established");
                        break closed;
                    }
                    Err(e) if self.token.is_interrupted() => {
                        debug!(error = %e, "reconnect interrupted");
                        return;
                    }
                    Err(e) => warn!(error = %e, "reconnect failed"),
                }
            };
        }
    }

    /// Returns only once the proxy was closed.
    async fn follow(&self) {
        loop {
            let outcome = self.call("pollHead", vec![], None).await;
            if self.token.is_interrupted() {
                return;
            }
            match outcome.and_then(decode::<Head>) {
                Ok(head) => self.observe(head),
                Err(e) => {
                    debug!(error = %e, "remote head poll failed");
                    if self.token.sleep(self.config.poll_retry_delay()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, DriverError> {
    serde_json::from_value(value).map_err(|e| DriverError::InvalidResponse(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, DriverError> {
    serde_json::to_value(value).map_err(|e| DriverError::InvalidArgument(e.to_string()))
}

fn nullable(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

/// [`Driver`] forwarding every call to a remote host.
#[derive(Debug)]
pub struct RemoteDriver {
    inner: Arc<Inner>,
    genesis: Block,
}

impl RemoteDriver {
    /// Connects through `connector` and performs the handshake.
    ///
    /// With `genesis_id` set, the host must serve that chain. Reconnects
    /// always replay the genesis id of the first handshake.
    ///
    /// # Errors
    ///
    /// Fails if the channel cannot be opened or the host rejects the handshake.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        genesis_id: Option<String>,
        config: RemoteConfig,
    ) -> Result<Self, DriverError> {
        let inner = Inner::new(connector, genesis_id, config);
        let (connected, closed) = match inner.establish().await {
            Ok(established) => established,
            Err(e) => {
                inner.token.interrupt();
                return Err(e);
            }
        };

        info!(
            genesis = %connected.genesis.id,
            head = %connected.head.id,
            "remote driver connected"
        );
        tokio::spawn(Arc::clone(&inner).supervise(closed));
        Ok(Self { inner, genesis: connected.genesis })
    }

    /// Returns `true` while a channel to the host is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, DriverError> {
        decode(self.inner.call(method, args, None).await?)
    }

    fn sign<T>(
        &self,
        method: &'static str,
        args: Vec<Value>,
    ) -> Result<SigningSession<T>, DriverError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if self.inner.token.is_interrupted() {
            return Err(DriverError::Interrupted);
        }
        if !self.is_connected() {
            return Err(DriverError::Closed);
        }

        let (handle, session) = SigningSession::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.call(method, args, Some(handle.prepared)).await.and_then(decode);
            let _ = handle.result.send(outcome);
        });
        Ok(session)
    }
}

impl Drop for RemoteDriver {
    fn drop(&mut self) {
        self.inner.token.interrupt();
    }
}

#[async_trait]
impl Driver for RemoteDriver {
    fn genesis(&self) -> &Block {
        &self.genesis
    }

    fn head(&self) -> Arc<Head> {
        self.inner.state.current()
    }

    async fn poll_head(&self) -> Result<Arc<Head>, DriverError> {
        Ok(self.inner.token.wrap(self.inner.state.next_head()).await?)
    }

    async fn get_block(&self, revision: Revision) -> Result<Option<Value>, DriverError> {
        Ok(nullable(self.call("getBlock", vec![json!(revision)]).await?))
    }

    async fn get_transaction(
        &self,
        id: &str,
        allow_pending: bool,
    ) -> Result<Option<Value>, DriverError> {
        Ok(nullable(self.call("getTransaction", vec![json!(id), json!(allow_pending)]).await?))
    }

    async fn get_receipt(&self, id: &str) -> Result<Option<Value>, DriverError> {
        Ok(nullable(self.call("getReceipt", vec![json!(id)]).await?))
    }

    async fn get_account(&self, address: &str, revision: Revision) -> Result<Value, DriverError> {
        self.call("getAccount", vec![json!(address), json!(revision)]).await
    }

    async fn get_code(&self, address: &str, revision: Revision) -> Result<Value, DriverError> {
        self.call("getCode", vec![json!(address), json!(revision)]).await
    }

    async fn get_storage(
        &self,
        address: &str,
        key: &str,
        revision: Revision,
    ) -> Result<Value, DriverError> {
        self.call("getStorage", vec![json!(address), json!(key), json!(revision)]).await
    }

    async fn explain(
        &self,
        arg: &ExplainArg,
        revision: Revision,
        cache_ties: Option<&[String]>,
    ) -> Result<Value, DriverError> {
        self.call("explain", vec![encode(arg)?, json!(revision), json!(cache_ties)]).await
    }

    async fn filter_event_logs(&self, arg: &EventFilterArg) -> Result<Value, DriverError> {
        self.call("filterEventLogs", vec![encode(arg)?]).await
    }

    async fn filter_transfer_logs(&self, arg: &TransferFilterArg) -> Result<Value, DriverError> {
        self.call("filterTransferLogs", vec![encode(arg)?]).await
    }

    async fn sign_tx(
        &self,
        message: Vec<TxClause>,
        options: SignTxOptions,
    ) -> Result<SigningSession<TxResponse>, DriverError> {
        self.sign("signTx", vec![encode(&message)?, encode(&options)?])
    }

    async fn sign_cert(
        &self,
        message: CertMessage,
        options: SignCertOptions,
    ) -> Result<SigningSession<CertResponse>, DriverError> {
        self.sign("signCert", vec![encode(&message)?, encode(&options)?])
    }

    async fn is_address_owned(&self, address: &str) -> Result<bool, DriverError> {
        self.call("isAddressOwned", vec![json!(address)]).await
    }

    fn close(&self) {
        if self.inner.token.interrupt() {
            *self.inner.link.lock() = None;
            info!("remote driver closed");
        }
    }
}
