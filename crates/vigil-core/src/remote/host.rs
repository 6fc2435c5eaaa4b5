//! Host side of the remote driver protocol.
//!
//! Each connection is served by [`DriverHost::serve`]: requests are read in
//! order, each allowed call runs in its own task, and every task of the
//! connection is bound to a child [`InterruptToken`] fired on teardown.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, trace, warn};

use super::{
    channel::Channel,
    wire::{Frame, Notification, Request, Response},
};
use crate::{
    driver::{Driver, DriverError},
    interrupt::InterruptToken,
    transport::TransportError,
    types::{
        CertMessage, EventFilterArg, ExplainArg, Revision, SignCertOptions, SignTxOptions,
        TransferFilterArg, TxClause,
    },
    utils::normalize_hex,
};

/// Methods a connected client may call after `connect`.
pub const ALLOWED_METHODS: [&str; 13] = [
    "pollHead",
    "getBlock",
    "getTransaction",
    "getReceipt",
    "getAccount",
    "getCode",
    "getStorage",
    "explain",
    "filterEventLogs",
    "filterTransferLogs",
    "signTx",
    "signCert",
    "isAddressOwned",
];

/// Delay before re-polling after the host driver's `poll_head` failed.
const HEAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Produces the driver bound to one connection.
#[async_trait]
pub trait Acceptor: fmt::Debug + Send + Sync {
    /// Called once per connection with the client's expected genesis id.
    /// `token` fires when the connection is torn down.
    async fn accept(
        &self,
        genesis_id: Option<String>,
        token: &InterruptToken,
    ) -> Result<Arc<dyn Driver>, DriverError>;
}

/// Serves remote driver connections.
#[derive(Debug, Clone)]
pub struct DriverHost {
    acceptor: Arc<dyn Acceptor>,
    token: InterruptToken,
}

type Outbox = mpsc::UnboundedSender<String>;

fn push(outbox: &Outbox, frame: Frame) {
    if outbox.send(frame.encode()).is_err() {
        trace!("frame dropped, connection writer gone");
    }
}

fn reject(outbox: &Outbox, id: u64, message: &str) {
    push(outbox, Frame::Response(Response::protocol_error(id, message)));
}

fn notify(outbox: &Outbox, method: &str, arg: Value) {
    push(outbox, Frame::Notification(Notification { method: method.to_string(), args: vec![arg] }));
}

impl DriverHost {
    /// `token` stops every connection when fired.
    #[must_use]
    pub fn new(acceptor: Arc<dyn Acceptor>, token: InterruptToken) -> Self {
        Self { acceptor, token }
    }

    /// Serves one connection until the peer disconnects or the host stops.
    pub async fn serve(&self, channel: Channel) {
        let conn = self.token.child();
        let (mut sink, mut stream) = channel.split();
        let (outbox, mut outgoing) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing.recv().await {
                if let Err(e) = sink.send(text).await {
                    debug!(error = %e, "connection write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut driver: Option<Arc<dyn Driver>> = None;
        let mut tasks = JoinSet::new();

        loop {
            let next = tokio::select! {
                biased;
                () = conn.interrupted() => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
                next = stream.next() => next,
            };

            let text = match next {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    debug!(error = %e, "connection read failed");
                    break;
                }
                None => break,
            };

            let request = match Frame::decode(&text) {
                Ok(Frame::Request(request)) => request,
                Ok(_) => {
                    warn!("client sent a host frame");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "undecodable client frame");
                    continue;
                }
            };

            if request.method == "connect" {
                if driver.is_some() {
                    reject(&outbox, request.id, "already accepted");
                    continue;
                }
                match self.handshake(&request, &conn).await {
                    Ok((accepted, reply)) => {
                        push(&outbox, Frame::Response(Response::ok(request.id, reply)));
                        tasks.spawn(forward_heads(
                            Arc::clone(&accepted),
                            outbox.clone(),
                            conn.clone(),
                        ));
                        driver = Some(accepted);
                    }
                    Err(e) => push(&outbox, Frame::Response(Response::error(request.id, &e))),
                }
                continue;
            }

            let Some(driver) = driver.as_ref() else {
                reject(&outbox, request.id, "not accepted");
                continue;
            };
            if !ALLOWED_METHODS.contains(&request.method.as_str()) {
                debug!(method = %request.method, "method rejected");
                reject(&outbox, request.id, "method not found");
                continue;
            }

            tasks.spawn(serve_request(Arc::clone(driver), request, outbox.clone(), conn.clone()));
        }

        conn.interrupt();
        tasks.shutdown().await;
        drop(outbox);
        let _ = writer.await;
        debug!(accepted = driver.is_some(), "connection closed");
    }

    async fn handshake(
        &self,
        request: &Request,
        conn: &InterruptToken,
    ) -> Result<(Arc<dyn Driver>, Value), DriverError> {
        let genesis_id: Option<String> = arg(&request.args, 0)?;
        let expected = genesis_id.as_deref().map(normalize_hex);
        let driver = conn.wrap(self.acceptor.accept(genesis_id, conn)).await??;

        let actual = normalize_hex(&driver.genesis().id);
        if let Some(expected) = expected &&
            expected != actual
        {
            return Err(TransportError::GenesisMismatch { expected, actual }.into());
        }
        let reply = json!({ "genesis": driver.genesis(), "head": &*driver.head() });
        info!(genesis = %driver.genesis().id, head = %driver.head().id, "client accepted");
        Ok((driver, reply))
    }
}

/// Pushes every head the connection's driver accepts.
async fn forward_heads(driver: Arc<dyn Driver>, outbox: Outbox, conn: InterruptToken) {
    loop {
        match conn.wrap(driver.poll_head()).await {
            Err(_) => return,
            Ok(Ok(head)) => notify(&outbox, "head", json!(&*head)),
            Ok(Err(e)) if e.is_interrupted() => return,
            Ok(Err(e)) => {
                warn!(error = %e, "host driver head poll failed");
                if conn.sleep(HEAD_RETRY_DELAY).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn serve_request(
    driver: Arc<dyn Driver>,
    request: Request,
    outbox: Outbox,
    conn: InterruptToken,
) {
    let id = request.id;
    let Ok(outcome) = conn.wrap(dispatch(driver.as_ref(), request, &outbox)).await else {
        return;
    };
    let response = match outcome {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::error(id, &e),
    };
    push(&outbox, Frame::Response(response));
}

fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, DriverError> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| DriverError::InvalidArgument(format!("argument {index}: {e}")))
}

fn revision_arg(args: &[Value], index: usize) -> Result<Revision, DriverError> {
    Ok(arg::<Option<Revision>>(args, index)?.unwrap_or_else(Revision::best))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, DriverError> {
    serde_json::to_value(value).map_err(|e| DriverError::InvalidResponse(e.to_string()))
}

async fn dispatch(
    driver: &dyn Driver,
    request: Request,
    outbox: &Outbox,
) -> Result<Value, DriverError> {
    let args = &request.args;
    match request.method.as_str() {
        "pollHead" => to_value(&*driver.poll_head().await?),
        "getBlock" => to_value(driver.get_block(revision_arg(args, 0)?).await?),
        "getTransaction" => {
            let id: String = arg(args, 0)?;
            let allow_pending: Option<bool> = arg(args, 1)?;
            to_value(driver.get_transaction(&id, allow_pending.unwrap_or(false)).await?)
        }
        "getReceipt" => to_value(driver.get_receipt(&arg::<String>(args, 0)?).await?),
        "getAccount" => {
            to_value(driver.get_account(&arg::<String>(args, 0)?, revision_arg(args, 1)?).await?)
        }
        "getCode" => {
            to_value(driver.get_code(&arg::<String>(args, 0)?, revision_arg(args, 1)?).await?)
        }
        "getStorage" => to_value(
            driver
                .get_storage(
                    &arg::<String>(args, 0)?,
                    &arg::<String>(args, 1)?,
                    revision_arg(args, 2)?,
                )
                .await?,
        ),
        "explain" => {
            let explain: ExplainArg = arg(args, 0)?;
            let ties: Option<Vec<String>> = arg(args, 2)?;
            to_value(driver.explain(&explain, revision_arg(args, 1)?, ties.as_deref()).await?)
        }
        "filterEventLogs" => {
            to_value(driver.filter_event_logs(&arg::<EventFilterArg>(args, 0)?).await?)
        }
        "filterTransferLogs" => {
            to_value(driver.filter_transfer_logs(&arg::<TransferFilterArg>(args, 0)?).await?)
        }
        "signTx" => {
            let message: Vec<TxClause> = arg(args, 0)?;
            let options: Option<SignTxOptions> = arg(args, 1)?;
            let mut session = driver.sign_tx(message, options.unwrap_or_default()).await?;
            if session.prepared().await {
                notify(outbox, "prepared", json!(request.id));
            }
            to_value(session.finish().await?)
        }
        "signCert" => {
            let message: CertMessage = arg(args, 0)?;
            let options: Option<SignCertOptions> = arg(args, 1)?;
            let mut session = driver.sign_cert(message, options.unwrap_or_default()).await?;
            if session.prepared().await {
                notify(outbox, "prepared", json!(request.id));
            }
            to_value(session.finish().await?)
        }
        "isAddressOwned" => to_value(driver.is_address_owned(&arg::<String>(args, 0)?).await?),
        other => Err(DriverError::Unsupported(other.to_string())),
    }
}
