//! Control-service adapter speaking line-delimited JSON frames over TCP.
//!
//! One request frame per line out, one response or event frame per line in.
//! Responses are matched to callers by frame id; `status` events go to the
//! registered listener. When the peer closes the stream every in-flight call
//! fails and the client is told the service went away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vpnsched_protocol::frames::{Frame, ReqFrame, ResFrame};
use vpnsched_protocol::methods;
use vpnsched_protocol::payloads::{
    PermissionPayload, ProfileIdParams, ProfilePayload, StatusPayload,
};

use crate::{
    client::ServiceLink,
    error::ControlError,
    service::{ControlService, ServiceConnector},
    types::{PermissionGate, PermissionRequest, StatusUpdate, VpnProfile},
};

type Waiters = Arc<DashMap<String, oneshot::Sender<ResFrame>>>;
type Listener = Arc<Mutex<Option<ServiceLink>>>;

/// Opens TCP connections to the control service.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    address: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RpcConnector {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl ServiceConnector for RpcConnector {
    async fn connect(&self, link: ServiceLink) -> Result<Arc<dyn ControlService>, ControlError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                ControlError::Connection(format!("connect to {} timed out", self.address))
            })?
            .map_err(|e| ControlError::Connection(format!("connect to {}: {e}", self.address)))?;

        info!(address = %self.address, "control service socket open");
        Ok(Arc::new(RpcService::start(
            stream,
            link,
            self.request_timeout,
        )))
    }
}

/// A live connection to the control service.
pub struct RpcService {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    waiters: Waiters,
    listener: Listener,
    /// Set by the reader once the peer is gone.
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl RpcService {
    fn start(stream: TcpStream, link: ServiceLink, request_timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        let waiters: Waiters = Arc::new(DashMap::new());
        let listener: Listener = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            read,
            Arc::clone(&waiters),
            Arc::clone(&listener),
            Arc::clone(&closed),
            link,
        ));
        Self {
            writer: tokio::sync::Mutex::new(write),
            waiters,
            listener,
            closed,
            request_timeout,
            reader,
        }
    }

    /// Send one request and wait for its response payload.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, ControlError> {
        let req = ReqFrame::new(method, params);
        let id = req.id.clone();
        let line = Frame::Req(req)
            .to_line()
            .map_err(|e| ControlError::remote(method, e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), tx);
        // The reader clears waiters after setting `closed`, so checking after
        // the insert cannot miss a hang-up.
        if self.closed.load(Ordering::SeqCst) {
            self.waiters.remove(&id);
            return Err(ControlError::Connection("connection closed".to_string()));
        }

        {
            let mut writer = self.writer.lock().await;
            let written = match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                self.waiters.remove(&id);
                return Err(ControlError::Connection(format!("write {method}: {e}")));
            }
        }
        debug!(method, %id, "request sent");

        let res = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => {
                return Err(ControlError::Connection(format!(
                    "connection closed before {method} replied"
                )))
            }
            Err(_) => {
                // A peer that stops answering is as good as gone.
                self.closed.store(true, Ordering::SeqCst);
                self.waiters.clear();
                warn!(method, "control service stopped responding");
                return Err(ControlError::Connection(format!("{method} timed out")));
            }
        };

        if let Some(reason) = res.failure_reason() {
            return Err(ControlError::remote(method, reason));
        }
        Ok(res.payload)
    }

    async fn permission(
        &self,
        method: &str,
        gate: PermissionGate,
    ) -> Result<Option<PermissionRequest>, ControlError> {
        let payload: PermissionPayload = match self.call(method, None).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ControlError::remote(method, format!("bad payload: {e}")))?,
            None => PermissionPayload::default(),
        };
        Ok(payload.token.map(|token| PermissionRequest { gate, token }))
    }

    async fn call_with_id(&self, method: &str, id: &str) -> Result<(), ControlError> {
        let params = serde_json::to_value(ProfileIdParams { id: id.to_string() })
            .map_err(|e| ControlError::remote(method, e.to_string()))?;
        self.call(method, Some(params)).await?;
        Ok(())
    }
}

impl Drop for RpcService {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ControlService for RpcService {
    async fn prepare_api_permission(&self) -> Result<Option<PermissionRequest>, ControlError> {
        self.permission(methods::PERMISSION_PREPARE_API, PermissionGate::Api)
            .await
    }

    async fn prepare_vpn_permission(&self) -> Result<Option<PermissionRequest>, ControlError> {
        self.permission(methods::PERMISSION_PREPARE_VPN, PermissionGate::Vpn)
            .await
    }

    async fn list_profiles(&self) -> Result<Vec<VpnProfile>, ControlError> {
        let method = methods::PROFILES_LIST;
        let profiles: Vec<ProfilePayload> = match self.call(method, None).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ControlError::remote(method, format!("bad payload: {e}")))?,
            None => Vec::new(),
        };
        Ok(profiles
            .into_iter()
            .map(|p| VpnProfile {
                id: p.id,
                name: p.name,
            })
            .collect())
    }

    async fn start_profile(&self, id: &str) -> Result<(), ControlError> {
        self.call_with_id(methods::PROFILE_START, id).await
    }

    async fn disconnect(&self) -> Result<(), ControlError> {
        self.call(methods::VPN_DISCONNECT, None).await?;
        Ok(())
    }

    async fn set_default_profile(&self, id: &str) -> Result<(), ControlError> {
        self.call_with_id(methods::PROFILE_SET_DEFAULT, id).await
    }

    async fn register_status_listener(&self, listener: ServiceLink) -> Result<(), ControlError> {
        *self.listener.lock().expect("listener lock poisoned") = Some(listener);
        self.call(methods::STATUS_SUBSCRIBE, None).await?;
        Ok(())
    }

    async fn unregister_status_listener(&self) -> Result<(), ControlError> {
        self.listener.lock().expect("listener lock poisoned").take();
        self.call(methods::STATUS_UNSUBSCRIBE, None).await?;
        Ok(())
    }

    async fn close(&self) {
        self.reader.abort();
        self.closed.store(true, Ordering::SeqCst);
        self.waiters.clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!("control service connection closed");
    }
}

async fn read_loop(
    read: OwnedReadHalf,
    waiters: Waiters,
    listener: Listener,
    closed: Arc<AtomicBool>,
    link: ServiceLink,
) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(line.trim(), &waiters, &listener),
            Ok(None) => {
                info!("control service closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "control service read failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every in-flight call.
    waiters.clear();
    link.disconnected();
}

fn handle_line(line: &str, waiters: &Waiters, listener: &Listener) {
    if line.is_empty() {
        return;
    }
    let frame = match Frame::from_line(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unparseable frame from control service");
            return;
        }
    };

    match frame {
        Frame::Res(res) => match waiters.remove(&res.id) {
            Some((_, tx)) => {
                let _ = tx.send(res);
            }
            None => debug!(id = %res.id, "response for unknown request"),
        },
        Frame::Event(event) if event.event == methods::EVENT_STATUS => {
            let status = match event
                .payload
                .map(serde_json::from_value::<StatusPayload>)
                .transpose()
            {
                Ok(Some(status)) => status,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "malformed status event");
                    return;
                }
            };
            let link = listener.lock().expect("listener lock poisoned").clone();
            if let Some(link) = link {
                link.status(StatusUpdate {
                    profile_id: status.profile_id,
                    state: status.state,
                    message: status.message,
                });
            }
        }
        Frame::Event(event) => debug!(event = %event.event, "ignoring event"),
        Frame::Req(req) => debug!(method = %req.method, "ignoring request from service"),
    }
}
