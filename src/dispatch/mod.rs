//! The session dispatcher: multiplexes the single decrypted frame stream
//! into request replies, the message decryption pipeline, app-state sync
//! and the event surface.
//!
//! One reader task loops `recv → decrypt → decode → dispatch` and never
//! blocks on user callbacks; two serial queues (`message_queue`,
//! `appstate_queue`) own the work that must stay ordered. Outbound frames
//! go through the writer mutex inside [`IqSender`].

pub mod history;
pub mod request;
pub mod usync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;

use log::{debug, warn};
use prost::Message as ProstMessage;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use crate::appstate::{AppStateEngine, Operation, ALL_COLLECTIONS};
use crate::binary::Node;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::proto::e2e;
use crate::proto::sync::SyncActionData;
use crate::signal::{
    parse_distribution, serialize_distribution, SenderKeyName, SignalAddress, SignalError,
    SignalSessionStore,
};
use crate::socket::{do_handshake, NoiseReader};
use crate::store::{BlobStore, Device, KeyStore};
use crate::transport::{TransportRx, TransportTx};
use crate::types::{
    Connected, DisconnectReason, Disconnected, ErrorEvent, Event, EventHandlers, Jid,
    MessageEvent, MessageInfo, ReceiptEvent, ReceiptType,
};

use history::HistoryAssembler;
use request::{IqSender, RequestRouter, SessionGuard, SessionId};

/// Commands serialized on the app-state queue.
enum AppStateCommand {
    Pull {
        collections: Vec<String>,
        done: oneshot::Sender<Result<()>>,
    },
    Push {
        name: String,
        actions: Vec<(Operation, SyncActionData)>,
        done: oneshot::Sender<Result<()>>,
    },
}

struct SessionCtx {
    config: Config,
    device: StdRwLock<Device>,
    handlers: Arc<EventHandlers>,
    router: Arc<RequestRouter>,
    iq: IqSender,
    signal: SignalSessionStore,
    appstate: AppStateEngine,
    blobs: Arc<dyn BlobStore>,
    history: std::sync::Mutex<(HistoryAssembler, Option<Instant>)>,
    closed: AtomicBool,
}

impl SessionCtx {
    fn own_jid(&self) -> Option<Jid> {
        self.device.read().unwrap().jid.clone()
    }

    fn emit(&self, event: Event) {
        self.handlers.emit(event);
    }

    fn emit_error(&self, error: &Error) {
        self.emit(Event::Error(ErrorEvent {
            kind: error.kind(),
            detail: error.to_string(),
        }));
    }

    /// Tear the session down once, failing every waiter.
    fn shutdown(&self, reason: DisconnectReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.router.close_all();
        self.emit(Event::Disconnected(Disconnected { reason }));
    }
}

/// A live, authenticated session.
pub struct Session {
    ctx: Arc<SessionCtx>,
    app_tx: mpsc::Sender<AppStateCommand>,
    session_id: SessionId,
    guard: Arc<SessionGuard>,
}

impl Session {
    /// Connect the configured transport, run the handshake and start the
    /// dispatch tasks.
    pub async fn connect(
        config: Config,
        device: Device,
        store: Arc<dyn KeyStore>,
        blobs: Arc<dyn BlobStore>,
        handlers: Arc<EventHandlers>,
    ) -> Result<Session> {
        let (tx, rx) = crate::transport::connect(&config).await?;
        Self::establish(tx, rx, config, device, store, blobs, handlers).await
    }

    /// Like [`Session::connect`] but over a pre-connected transport (tests,
    /// loopback peers).
    pub async fn establish(
        tx: TransportTx,
        rx: TransportRx,
        config: Config,
        device: Device,
        store: Arc<dyn KeyStore>,
        blobs: Arc<dyn BlobStore>,
        handlers: Arc<EventHandlers>,
    ) -> Result<Session> {
        let link = match do_handshake(tx, rx, &device, &config).await {
            Ok(link) => link,
            Err(e) => {
                handlers.emit(Event::Error(ErrorEvent {
                    kind: e.kind(),
                    detail: e.to_string(),
                }));
                handlers.emit(Event::Disconnected(Disconnected {
                    reason: DisconnectReason::HandshakeFailure(e.to_string()),
                }));
                return Err(e);
            }
        };
        debug!(
            "noise transport up, server static {}",
            hex::encode(&link.remote_static[..8])
        );

        let writer = Arc::new(tokio::sync::Mutex::new(link.writer));
        let router = Arc::new(RequestRouter::new());
        let iq = IqSender {
            writer,
            router: router.clone(),
            timeout: config.request_timeout,
        };

        let signal = SignalSessionStore::new(&device, store.clone());
        let appstate = AppStateEngine::new(store.clone(), blobs.clone(), handlers.clone());

        let ctx = Arc::new(SessionCtx {
            history: std::sync::Mutex::new((HistoryAssembler::new(handlers.clone()), None)),
            config,
            device: StdRwLock::new(device),
            handlers,
            router,
            iq,
            signal,
            appstate,
            blobs,
            closed: AtomicBool::new(false),
        });

        let guard = Arc::new(SessionGuard::default());
        let session_id = guard.begin();

        let (msg_tx, msg_rx) = mpsc::channel::<Node>(64);
        let (app_tx, app_rx) = mpsc::channel::<AppStateCommand>(16);

        tokio::spawn(reader_loop(ctx.clone(), link.reader, msg_tx));
        tokio::spawn(message_worker(ctx.clone(), msg_rx));
        tokio::spawn(appstate_worker(ctx.clone(), app_rx));
        tokio::spawn(keepalive_loop(ctx.clone(), guard.clone(), session_id));
        tokio::spawn(history_idle_loop(ctx.clone(), guard.clone(), session_id));

        ctx.emit(Event::Connected(Connected {
            session_id: session_id.uuid(),
        }));

        Ok(Session {
            ctx,
            app_tx,
            session_id,
            guard,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.closed.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id.uuid()
    }

    /// Close locally: fail waiters, notify handlers, close the write side.
    pub async fn close(&self) {
        self.guard.end();
        self.ctx.shutdown(DisconnectReason::Requested);
        self.ctx.iq.writer.lock().await.close().await;
    }

    /// Send a raw node (stream-level stanzas).
    pub async fn send_node(&self, node: &Node) -> Result<()> {
        self.ctx.iq.send(node).await
    }

    /// Send an iq and await the matching reply.
    pub async fn send_iq(&self, node: Node) -> Result<Node> {
        self.ctx.iq.send_iq(node).await
    }

    /// Send a text message to a user or group.
    pub async fn send_text(&self, to: &Jid, text: &str) -> Result<String> {
        self.send_message(to, &[], &e2e::Message::text(text)).await
    }

    /// Send an application message. For groups, `participants` is the
    /// current roster (primaries); for 1:1 it is ignored.
    pub async fn send_message(
        &self,
        to: &Jid,
        participants: &[Jid],
        message: &e2e::Message,
    ) -> Result<String> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let id = generate_message_id();
        let node = if to.is_group() {
            self.build_group_message(&id, to, participants, message).await?
        } else {
            self.build_direct_message(&id, to, message).await?
        };
        self.ctx.iq.send(&node).await?;
        Ok(id)
    }

    async fn device_targets(&self, users: &[Jid]) -> Result<Vec<Jid>> {
        let reply = self.ctx.iq.send_iq(usync::build_device_query(users)).await?;
        let devices = usync::parse_device_response(&reply)?;
        let own = self
            .ctx
            .own_jid()
            .ok_or_else(|| Error::Protocol("sending requires a registered jid".into()))?;
        Ok(usync::fan_out_targets(&own, &devices, false))
    }

    async fn ensure_sessions(&self, devices: &[Jid]) -> Result<()> {
        let missing: Vec<Jid> = devices
            .iter()
            .filter(|jid| !self.ctx.signal.has_session(&SignalAddress::from(*jid)))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let reply = self
            .ctx
            .iq
            .send_iq(usync::build_prekey_query(&missing))
            .await?;
        for (jid, bundle) in usync::parse_prekey_response(&reply)? {
            self.ctx
                .signal
                .create_session(&SignalAddress::from(&jid), &bundle)
                .await
                .map_err(|e| Error::Decryption(e.to_string()))?;
        }
        Ok(())
    }

    async fn build_direct_message(
        &self,
        id: &str,
        to: &Jid,
        message: &e2e::Message,
    ) -> Result<Node> {
        let own = self
            .ctx
            .own_jid()
            .ok_or_else(|| Error::Protocol("sending requires a registered jid".into()))?;
        let devices = self
            .device_targets(&[to.to_primary(), own.to_primary()])
            .await?;
        self.ensure_sessions(&devices).await?;

        let padded = pad_message(message.encode_to_vec());
        let mut node = Node::new("message")
            .attr("id", id)
            .attr("type", "text")
            .attr("to", to.to_primary());
        for device in devices {
            let outgoing = self
                .ctx
                .signal
                .encrypt(&SignalAddress::from(&device), &padded)
                .await
                .map_err(|e| Error::Decryption(e.to_string()))?;
            node.add_child(
                Node::new("to").attr("jid", device).child(
                    Node::new("enc")
                        .attr("v", "2")
                        .attr("type", outgoing.kind.as_wire())
                        .bytes(outgoing.data),
                ),
            );
        }
        Ok(node)
    }

    async fn build_group_message(
        &self,
        id: &str,
        group: &Jid,
        participants: &[Jid],
        message: &e2e::Message,
    ) -> Result<Node> {
        let own = self
            .ctx
            .own_jid()
            .ok_or_else(|| Error::Protocol("sending requires a registered jid".into()))?;

        let mut users: Vec<Jid> = participants.iter().map(Jid::to_primary).collect();
        if !users.contains(&own.to_primary()) {
            users.push(own.to_primary());
        }
        let devices = self.device_targets(&users).await?;
        self.ensure_sessions(&devices).await?;

        let name = SenderKeyName::new(group.to_string(), SignalAddress::from(&own));
        let (distribution, _fresh) = self
            .ctx
            .signal
            .sender_key_distribution(&name)
            .await
            .map_err(|e| Error::Decryption(e.to_string()))?;

        // The distribution rides to every recipient device over the 1:1
        // sessions, then the payload itself goes out once as skmsg.
        let skdm = e2e::Message {
            sender_key_distribution_message: Some(e2e::SenderKeyDistributionHolder {
                group_id: Some(group.to_string()),
                axolotl_sender_key_distribution_message: Some(serialize_distribution(
                    &distribution,
                )),
            }),
            ..Default::default()
        };
        let padded_skdm = pad_message(skdm.encode_to_vec());

        let mut node = Node::new("message")
            .attr("id", id)
            .attr("type", "text")
            .attr("to", group.clone());
        for device in devices {
            let outgoing = self
                .ctx
                .signal
                .encrypt(&SignalAddress::from(&device), &padded_skdm)
                .await
                .map_err(|e| Error::Decryption(e.to_string()))?;
            node.add_child(
                Node::new("to").attr("jid", device).child(
                    Node::new("enc")
                        .attr("v", "2")
                        .attr("type", outgoing.kind.as_wire())
                        .bytes(outgoing.data),
                ),
            );
        }

        let padded = pad_message(message.encode_to_vec());
        let ciphertext = self
            .ctx
            .signal
            .group_encrypt(&name, &padded)
            .await
            .map_err(|e| Error::Decryption(e.to_string()))?;
        node.add_child(
            Node::new("enc")
                .attr("v", "2")
                .attr("type", "skmsg")
                .bytes(ciphertext),
        );
        Ok(node)
    }

    /// Queue an app-state pull; resolves when the sync completes.
    pub async fn pull_app_state(&self, collections: &[&str]) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.app_tx
            .send(AppStateCommand::Pull {
                collections: collections.iter().map(|s| s.to_string()).collect(),
                done,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Pull every collection.
    pub async fn pull_all_app_state(&self) -> Result<()> {
        self.pull_app_state(&ALL_COLLECTIONS).await
    }

    /// Queue an app-state push; resolves when the server accepted it and
    /// the loopback events fired.
    pub async fn push_app_state(
        &self,
        name: &str,
        actions: Vec<(Operation, SyncActionData)>,
    ) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.app_tx
            .send(AppStateCommand::Push {
                name: name.to_string(),
                actions,
                done,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Mute or unmute a chat (app-state mutation on `regular_high`).
    pub async fn mute_chat(&self, chat: &Jid, muted: bool, end: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.push_app_state("regular_high", crate::appstate::mute_actions(chat, muted, end, now))
            .await
    }
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

async fn reader_loop(ctx: Arc<SessionCtx>, mut reader: NoiseReader, msg_tx: mpsc::Sender<Node>) {
    loop {
        match reader.recv_node().await {
            Ok(Some(node)) => dispatch_node(&ctx, node, &msg_tx).await,
            Ok(None) => {
                debug!("transport reached EOF");
                ctx.shutdown(DisconnectReason::TransportError("connection closed".into()));
                return;
            }
            Err(e) if e.is_fatal() => {
                warn!("fatal transport error: {}", e);
                ctx.emit_error(&e);
                ctx.shutdown(DisconnectReason::TransportError(e.to_string()));
                return;
            }
            Err(e) => {
                // Malformed frame: drop it, keep the stream.
                warn!("dropping undecodable frame: {}", e);
                ctx.emit_error(&e);
            }
        }
    }
}

async fn dispatch_node(ctx: &Arc<SessionCtx>, node: Node, msg_tx: &mpsc::Sender<Node>) {
    let tag = node.tag.clone();
    match tag.as_str() {
        "iq" => {
            if let Some(id) = node.attr_str("id") {
                if ctx.router.complete(id, node.clone()) {
                    return;
                }
            }
            if node.descendant(&["ping"]).is_some() {
                let mut reply = Node::new("iq").attr("type", "result");
                if let Some(id) = node.attr_str("id") {
                    reply.set_attr("id", id);
                }
                let _ = ctx.iq.send(&reply).await;
                return;
            }
            debug!("dropping unmatched iq {:?}", node.attr_str("id"));
        }
        "message" => {
            // Hand off; the reader must not run user callbacks.
            if msg_tx.send(node).await.is_err() {
                warn!("message queue gone; dropping inbound message");
            }
        }
        "receipt" => {
            send_ack(ctx, &node).await;
            if let Some(event) = parse_receipt_event(&node) {
                ctx.emit(Event::Receipt(event));
            }
        }
        "notification" | "call" => {
            send_ack(ctx, &node).await;
            debug!("acked {} stanza", node.tag);
        }
        "ack" => {}
        "xmlstreamend" => {
            ctx.shutdown(DisconnectReason::TransportError("stream ended by peer".into()));
        }
        other => {
            debug!("dropping unhandled stanza <{}>", other);
        }
    }
}

async fn message_worker(ctx: Arc<SessionCtx>, mut rx: mpsc::Receiver<Node>) {
    while let Some(node) = rx.recv().await {
        handle_message(&ctx, node).await;
    }
}

async fn appstate_worker(ctx: Arc<SessionCtx>, mut rx: mpsc::Receiver<AppStateCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            AppStateCommand::Pull { collections, done } => {
                let names: Vec<&str> = collections.iter().map(String::as_str).collect();
                let result = tokio::time::timeout(
                    ctx.config.sync_pull_timeout,
                    ctx.appstate.pull(&ctx.iq, &names),
                )
                .await
                .unwrap_or_else(|_| Err(Error::RequestTimeout("app state pull".into())));
                if let Err(e) = &result {
                    ctx.emit_error(e);
                }
                let _ = done.send(result);
            }
            AppStateCommand::Push { name, actions, done } => {
                let result = ctx.appstate.push(&ctx.iq, &name, &actions).await;
                if let Err(e) = &result {
                    ctx.emit_error(e);
                }
                let _ = done.send(result);
            }
        }
    }
}

/// In-protocol keepalive. Ticks stop mattering once the session id is
/// stale.
async fn keepalive_loop(ctx: Arc<SessionCtx>, guard: Arc<SessionGuard>, id: SessionId) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + ctx.config.keepalive_interval,
        ctx.config.keepalive_interval,
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !guard.is_current(id) || ctx.closed.load(Ordering::SeqCst) {
            return;
        }

        let ping = request::iq("get", "urn:xmpp:ping", Some(&crate::types::SERVER_JID))
            .child(Node::new("ping"));
        if let Err(e) = ctx.iq.send_iq(ping).await {
            if !guard.is_current(id) {
                return;
            }
            warn!("keepalive ping failed: {}", e);
        }
    }
}

/// Finalizes a quiet history sync stream after the idle window.
async fn history_idle_loop(ctx: Arc<SessionCtx>, guard: Arc<SessionGuard>, id: SessionId) {
    let tick = ctx.config.history_idle / 4;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !guard.is_current(id) || ctx.closed.load(Ordering::SeqCst) {
            return;
        }
        flush_idle_history(&ctx);
    }
}

fn flush_idle_history(ctx: &Arc<SessionCtx>) {
    let mut history = ctx.history.lock().unwrap();
    if let Some(last) = history.1 {
        if last.elapsed() >= ctx.config.history_idle {
            history.0.on_idle();
            history.1 = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound message pipeline
// ---------------------------------------------------------------------------

async fn handle_message(ctx: &Arc<SessionCtx>, node: Node) {
    let Some(id) = node.attr_str("id").map(str::to_string) else {
        warn!("message without id; dropping");
        return;
    };
    let Some(from) = node.attr_jid("from") else {
        warn!("message without from; dropping");
        return;
    };
    let participant = node.attr_jid("participant");
    let timestamp = node.attr_int("t").unwrap_or_else(|| chrono::Utc::now().timestamp());
    let push_name = node.attr_str("notify").map(str::to_string);

    let own = ctx.own_jid();
    let is_group = from.is_group();
    let sender = if is_group {
        participant.clone().unwrap_or_else(|| from.clone())
    } else {
        from.clone()
    };
    let is_from_me = own
        .as_ref()
        .map(|me| me.user == sender.user)
        .unwrap_or(false);

    let info = MessageInfo {
        id: id.clone(),
        sender: sender.clone(),
        chat: from.to_primary(),
        is_from_me,
        is_group,
        timestamp,
        push_name,
    };

    for enc in node.children_by_tag("enc") {
        let Some(ciphertext) = enc.content_bytes() else {
            continue;
        };
        let enc_type = enc.attr_str("type").unwrap_or("");
        let address = SignalAddress::from(&sender);

        let result = match enc_type {
            "pkmsg" => ctx.signal.decrypt_prekey(&address, ciphertext).await,
            "msg" => ctx.signal.decrypt_whisper(&address, ciphertext).await,
            "skmsg" => {
                let name = SenderKeyName::new(from.to_string(), address.clone());
                ctx.signal.group_decrypt(&name, ciphertext).await
            }
            other => {
                warn!("unknown enc type {:?} on message {}", other, id);
                continue;
            }
        };

        match result {
            Ok(padded) => match unpad_message(padded) {
                Ok(plaintext) => match e2e::Message::decode(plaintext.as_slice()) {
                    Ok(message) => {
                        process_plaintext(ctx, &info, &from, &sender, message).await;
                    }
                    Err(e) => {
                        warn!("message {} protobuf decode failed: {}", id, e);
                        ctx.emit_error(&Error::Protocol(e.to_string()));
                    }
                },
                Err(e) => {
                    warn!("message {} has bad padding", id);
                    ctx.emit_error(&e);
                }
            },
            Err(SignalError::DuplicateMessage) => {
                debug!("dropping duplicate ciphertext on message {}", id);
            }
            Err(e) => {
                warn!("failed to decrypt {} from {}: {}", enc_type, sender, e);
                ctx.emit_error(&Error::Decryption(e.to_string()));
                // Retry receipts are optional; log in place of sending.
                debug!("would schedule retry receipt for message {}", id);
            }
        }
    }

    // Delivery receipt goes out regardless of decryption outcome. Messages
    // from our own user get a sender receipt instead.
    let receipt_type = if is_from_me {
        ReceiptType::Sender
    } else {
        ReceiptType::Delivered
    };
    let receipt = build_receipt(&from, &id, participant.as_ref(), &receipt_type);
    if let Err(e) = ctx.iq.send(&receipt).await {
        warn!("failed to send receipt for {}: {}", id, e);
    }
}

async fn process_plaintext(
    ctx: &Arc<SessionCtx>,
    info: &MessageInfo,
    chat: &Jid,
    sender: &Jid,
    message: e2e::Message,
) {
    // Sender-key bootstrap rides inside 1:1 payloads.
    if let Some(holder) = &message.sender_key_distribution_message {
        let group_id = holder.group_id.clone().unwrap_or_else(|| chat.to_string());
        match holder
            .axolotl_sender_key_distribution_message
            .as_deref()
            .ok_or_else(|| SignalError::InvalidMessage("empty distribution".into()))
            .and_then(parse_distribution)
        {
            Ok(distribution) => {
                let name = SenderKeyName::new(group_id, SignalAddress::from(sender));
                if let Err(e) = ctx
                    .signal
                    .process_sender_key_distribution(&name, &distribution)
                    .await
                {
                    warn!("failed to install sender key from {}: {}", sender, e);
                }
            }
            Err(e) => warn!("bad sender key distribution from {}: {}", sender, e),
        }
    }

    if let Some(protocol) = &message.protocol_message {
        if let Some(share) = &protocol.app_state_sync_key_share {
            if let Err(e) = ctx.appstate.handle_key_share(share) {
                ctx.emit_error(&e);
            }
        }
        if let Some(notification) = &protocol.history_sync_notification {
            handle_history_notification(ctx, notification);
        }
    }

    ctx.emit(Event::Message(MessageEvent {
        info: info.clone(),
        message,
    }));
}

fn handle_history_notification(ctx: &Arc<SessionCtx>, notification: &e2e::HistorySyncNotification) {
    let path = notification.direct_path.as_deref().unwrap_or_default();
    let media_key = notification.media_key.as_deref().unwrap_or_default();
    let blob = match ctx.blobs.download(path, media_key) {
        Ok(blob) => blob,
        Err(e) => {
            warn!("history chunk download failed: {}", e);
            ctx.emit_error(&Error::Store(e.to_string()));
            return;
        }
    };
    match history::parse_history_blob(&blob) {
        Ok(sync) => {
            let mut history = ctx.history.lock().unwrap();
            history.0.on_chunk(&sync);
            history.1 = if history.0.is_finalized() {
                None
            } else {
                Some(Instant::now())
            };
        }
        Err(e) => {
            warn!("history chunk parse failed: {}", e);
            ctx.emit_error(&e);
        }
    }
}

// ---------------------------------------------------------------------------
// Node builders and payload padding
// ---------------------------------------------------------------------------

/// Random uppercase-hex message id.
pub fn generate_message_id() -> String {
    format!("3EB0{:012X}", rand::thread_rng().gen::<u64>() & 0xFFFF_FFFF_FFFF)
}

/// Append 1..=15 padding bytes, each holding the padding length.
pub fn pad_message(mut plaintext: Vec<u8>) -> Vec<u8> {
    let pad = rand::thread_rng().gen_range(1..=15u8);
    plaintext.extend(std::iter::repeat(pad).take(pad as usize));
    plaintext
}

/// Strip the trailing padding; the last byte is the padding length.
pub fn unpad_message(mut padded: Vec<u8>) -> Result<Vec<u8>> {
    let pad = *padded
        .last()
        .ok_or_else(|| Error::Protocol("empty plaintext".into()))? as usize;
    if pad == 0 || pad > 15 || pad > padded.len() {
        return Err(Error::Protocol(format!("invalid padding length {}", pad)));
    }
    padded.truncate(padded.len() - pad);
    Ok(padded)
}

/// `<receipt>` for an inbound message.
pub fn build_receipt(
    chat: &Jid,
    message_id: &str,
    participant: Option<&Jid>,
    receipt_type: &ReceiptType,
) -> Node {
    let mut node = Node::new("receipt")
        .attr("id", message_id)
        .attr("to", chat.to_primary());
    if let Some(participant) = participant {
        node.set_attr("participant", participant.clone());
    }
    if let Some(wire) = receipt_type.as_wire() {
        node.set_attr("type", wire);
    }
    node
}

/// `<ack>` mirroring an inbound stanza.
fn build_ack(node: &Node) -> Option<Node> {
    let id = node.attr_str("id")?;
    let from = node.attr_jid("from")?;
    let mut ack = Node::new("ack")
        .attr("class", node.tag.clone())
        .attr("id", id)
        .attr("to", from);
    if let Some(participant) = node.attr_jid("participant") {
        ack.set_attr("participant", participant);
    }
    if let Some(t) = node.attr_str("type") {
        ack.set_attr("type", t);
    }
    Some(ack)
}

async fn send_ack(ctx: &Arc<SessionCtx>, node: &Node) {
    if let Some(ack) = build_ack(node) {
        if let Err(e) = ctx.iq.send(&ack).await {
            warn!("failed to ack <{}>: {}", node.tag, e);
        }
    }
}

fn parse_receipt_event(node: &Node) -> Option<ReceiptEvent> {
    let chat = node.attr_jid("from")?;
    let mut ids = vec![node.attr_str("id")?.to_string()];
    if let Some(list) = node.child_by_tag("list") {
        ids.extend(
            list.children_by_tag("item")
                .iter()
                .filter_map(|item| item.attr_str("id").map(str::to_string)),
        );
    }
    let sender = node.attr_jid("participant").unwrap_or_else(|| chat.clone());
    Some(ReceiptEvent {
        message_ids: ids,
        chat: chat.clone(),
        sender,
        receipt_type: ReceiptType::from_wire(node.attr_str("type")),
        timestamp: node
            .attr_int("t")
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
    })
}
