//! The session event loop: one cooperative tick at a time.
//!
//! Each tick drains worker results, asks the transport whether a frame is
//! waiting (a zero-timeout probe, never a blocking read), and processes at
//! most one inbound frame and one pending local message. That bound keeps
//! per-tick work predictable and makes the send/receive interleaving
//! observable. Transient I/O failures surface as notices and a short
//! backoff; only an explicit quit stops the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Mutex};

use crate::api::AiClient;
use crate::core::constants::{
    MAX_IMAGE_FILE_BYTES, RECV_ERROR_BACKOFF, TICK_INTERVAL, USER_LIST_POLL_INTERVAL,
};
use crate::core::directory::PeerDirectory;
use crate::core::session::{SessionEvent, SessionState, SessionStateMachine};
use crate::proto::actions::{classify_inbound, extract_user_list, InboundFrame, WireAction};
use crate::proto::framing::FrameSender;
use crate::proto::parser::{ChatEvent, LineParser};
use crate::proto::transport::ChatTransport;

/// Results handed back into the loop by short-lived worker tasks. Workers
/// never touch loop state directly.
#[derive(Debug)]
pub enum WorkerMessage {
    Notice(String),
}

/// The single-slot pending local message.
///
/// Deliberately not a queue: a new submission before the previous one was
/// picked up replaces it, matching the one-outbound-per-tick discipline.
#[derive(Clone, Default)]
pub struct PendingOutbound(Arc<Mutex<Option<String>>>);

impl PendingOutbound {
    pub async fn submit(&self, msg: String) {
        *self.0.lock().await = Some(msg);
    }

    async fn take(&self) -> Option<String> {
        self.0.lock().await.take()
    }
}

pub type SharedDirectory = Arc<Mutex<PeerDirectory>>;
pub type SharedSender<W> = Arc<Mutex<FrameSender<W>>>;

/// Everything the front-end needs to talk to a running loop.
pub struct LoopHandle {
    pub pending: PendingOutbound,
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
    pub directory: SharedDirectory,
    pub active: Arc<AtomicBool>,
}

pub struct EventLoop<T, W> {
    transport: T,
    sender: SharedSender<W>,
    session: SessionStateMachine,
    ai: Arc<AiClient>,
    parser: LineParser,
    pending: PendingOutbound,
    directory: SharedDirectory,
    events_tx: mpsc::UnboundedSender<ChatEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    active: Arc<AtomicBool>,
    quit: bool,
}

impl<T, W> EventLoop<T, W>
where
    T: ChatTransport,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        transport: T,
        sender: SharedSender<W>,
        session: SessionStateMachine,
        ai: Arc<AiClient>,
    ) -> (Self, LoopHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let pending = PendingOutbound::default();
        let directory: SharedDirectory = Arc::new(Mutex::new(PeerDirectory::default()));
        let active = Arc::new(AtomicBool::new(true));

        let handle = LoopHandle {
            pending: pending.clone(),
            events: events_rx,
            directory: Arc::clone(&directory),
            active: Arc::clone(&active),
        };
        let event_loop = Self {
            transport,
            sender,
            session,
            ai,
            parser: LineParser::default(),
            pending,
            directory,
            events_tx,
            worker_tx,
            worker_rx,
            active,
            quit: false,
        };
        (event_loop, handle)
    }

    /// Run until explicit quit. Also keeps the online-user snapshot fresh by
    /// polling the server on a fixed cadence.
    pub async fn run(mut self) {
        self.spawn_user_list_poller();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        while !self.quit {
            ticker.tick().await;
            self.tick().await;
        }
        self.active.store(false, Ordering::SeqCst);
        tracing::debug!("event loop stopped");
    }

    fn spawn_user_list_poller(&self) {
        let sender = Arc::clone(&self.sender);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(USER_LIST_POLL_INTERVAL).await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                let payload = WireAction::List { results: None }.to_payload();
                if sender.lock().await.send(&payload).await.is_err() {
                    tracing::debug!("user-list poll failed, stopping poller");
                    break;
                }
            }
        });
    }

    fn session_alive(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::LoggedIn | SessionState::Chatting
        )
    }

    fn dispatch(&mut self, event: ChatEvent) {
        if self.events_tx.send(event).is_err() {
            // Subscriber went away; nothing left to serve.
            self.quit = true;
        }
    }

    /// One tick: worker drain, at most one inbound frame, at most one
    /// pending outbound message.
    async fn tick(&mut self) {
        while let Ok(msg) = self.worker_rx.try_recv() {
            if !self.session_alive() {
                tracing::debug!("dropping worker result for ended session");
                continue;
            }
            match msg {
                WorkerMessage::Notice(body) => self.dispatch(ChatEvent::Notice { body }),
            }
        }

        if self.session.state() != SessionState::Offline && self.transport.poll_ready().await {
            match self.transport.receive().await {
                Ok(payload) => self.handle_inbound(&payload).await,
                Err(e) if e.is_disconnect() => {
                    tracing::warn!("peer disconnected: {e}");
                    self.dispatch(ChatEvent::Notice {
                        body: "Connection lost. You are offline.".into(),
                    });
                    let _ = self.session.apply(SessionEvent::ConnectionLost);
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
                Err(e) => {
                    tracing::warn!("receive failed: {e}");
                    self.dispatch(ChatEvent::Notice {
                        body: "Connection interrupted. Please check your network.".into(),
                    });
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }

        if let Some(msg) = self.pending.take().await {
            self.handle_outbound(msg).await;
        }
    }

    async fn handle_inbound(&mut self, payload: &[u8]) {
        match classify_inbound(payload) {
            InboundFrame::Image { sender, data } => match BASE64.decode(data.trim()) {
                Ok(bytes) => self.dispatch(ChatEvent::Image {
                    sender,
                    data: bytes,
                }),
                Err(e) => {
                    tracing::warn!("undecodable image payload: {e}");
                    self.dispatch(ChatEvent::Notice {
                        body: "Failed to receive image".into(),
                    });
                }
            },
            InboundFrame::UserList { results } => {
                let users = extract_user_list(&results);
                let my_name = self.session.my_name().map(str::to_owned);
                self.directory
                    .lock()
                    .await
                    .refresh(users.clone(), my_name.as_deref());
                self.dispatch(ChatEvent::UserList { users });
            }
            InboundFrame::Line(text) => {
                // The server announces an accepted chat connection with a
                // "joined" broadcast; that is our cue to enter Chatting.
                if text.contains("joined") && self.session.state() == SessionState::LoggedIn {
                    let _ = self.session.apply(SessionEvent::PeerConnectAccepted);
                }
                for event in self.parser.parse(&text) {
                    self.dispatch(event);
                }
            }
        }
    }

    async fn handle_outbound(&mut self, msg: String) {
        // Local echo goes through the same date tracker as inbound traffic
        // so a date is never announced twice.
        let now = chrono::Local::now();
        let date = now.format("%d.%m.%y").to_string();
        let time = now.format("%H:%M").to_string();
        if let Some(separator) = self.parser.check_date(&date) {
            self.dispatch(separator);
        }
        let me = self.session.my_name().unwrap_or("Me").to_string();
        self.dispatch(ChatEvent::Text {
            date,
            time,
            sender: me.clone(),
            body: msg.clone(),
        });

        let translation = match self.session.translate(&msg) {
            Ok(t) => t,
            Err(e) => {
                self.dispatch(ChatEvent::Notice {
                    body: e.to_string(),
                });
                return;
            }
        };

        if let Some(query) = translation.ai_query {
            self.spawn_ai_query(query);
        }
        if let Some(prompt) = translation.image_prompt {
            self.dispatch(ChatEvent::Notice {
                body: format!("[Generating image for: {prompt} ...]"),
            });
            self.spawn_image_generation(prompt, me.clone());
        }
        if let Some(path) = translation.image_file {
            self.dispatch(ChatEvent::Notice {
                body: format!("[Sending image: {path}]"),
            });
            self.spawn_image_send(path, me);
        }

        let Some(token) = translation.token else {
            return;
        };
        let quitting = token == "q";
        // Bind first so the sender guard is released before dispatching.
        let send_result = self.sender.lock().await.send(token.as_bytes()).await;
        if let Err(e) = send_result {
            tracing::warn!("send failed: {e}");
            self.dispatch(ChatEvent::Notice {
                body: format!("Send failed: {e}"),
            });
            let _ = self.session.apply(SessionEvent::ConnectionLost);
            return;
        }
        if quitting {
            if self.session.apply(SessionEvent::Quit).is_err() {
                // Quitting before any peer chat was accepted; drop straight
                // to offline.
                let _ = self.session.apply(SessionEvent::ConnectionLost);
            }
            self.dispatch(ChatEvent::Notice {
                body: "You left the chat system.".into(),
            });
            self.quit = true;
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn spawn_ai_query(&self, query: String) {
        let sender = Arc::clone(&self.sender);
        let worker_tx = self.worker_tx.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let payload = WireAction::AiQuery { query }.to_payload();
            if !active.load(Ordering::SeqCst) {
                tracing::debug!("session ended, dropping AI query");
                return;
            }
            if let Err(e) = sender.lock().await.send(&payload).await {
                let _ = worker_tx.send(WorkerMessage::Notice(format!(
                    "Failed to send AI query: {e}"
                )));
            }
        });
    }

    /// Read a local image file off-loop and broadcast it as an image frame.
    /// Files past the size cap are refused before any bytes hit the wire.
    fn spawn_image_send(&self, path: String, from: String) {
        let sender = Arc::clone(&self.sender);
        let worker_tx = self.worker_tx.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMessage::Notice(format!(
                        "Could not read image {path}: {e}"
                    )));
                    return;
                }
            };
            if bytes.len() > MAX_IMAGE_FILE_BYTES {
                let _ = worker_tx.send(WorkerMessage::Notice(format!(
                    "Image {path} is too large to send ({} bytes, limit {MAX_IMAGE_FILE_BYTES})",
                    bytes.len()
                )));
                return;
            }
            let payload = WireAction::Image {
                from,
                data: BASE64.encode(bytes),
            }
            .to_payload();
            if !active.load(Ordering::SeqCst) {
                tracing::debug!("session ended, dropping image send");
                return;
            }
            if let Err(e) = sender.lock().await.send(&payload).await {
                let _ = worker_tx.send(WorkerMessage::Notice(format!("Failed to send image: {e}")));
            }
        });
    }

    /// Generate locally when an AI backend is configured and broadcast the
    /// result as an image frame; otherwise ask the server to generate.
    fn spawn_image_generation(&self, prompt: String, from: String) {
        let ai = Arc::clone(&self.ai);
        let sender = Arc::clone(&self.sender);
        let worker_tx = self.worker_tx.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let payload = if ai.is_enabled() {
                match ai.generate_image(&prompt).await {
                    Ok(bytes) => WireAction::Image {
                        from,
                        data: BASE64.encode(bytes),
                    }
                    .to_payload(),
                    Err(e) => {
                        let _ = worker_tx
                            .send(WorkerMessage::Notice(format!("Image generation failed: {e}")));
                        return;
                    }
                }
            } else {
                WireAction::AiImage { prompt }.to_payload()
            };
            if !active.load(Ordering::SeqCst) {
                tracing::debug!("session ended, dropping generated image");
                return;
            }
            if let Err(e) = sender.lock().await.send(&payload).await {
                let _ = worker_tx.send(WorkerMessage::Notice(format!("Failed to send image: {e}")));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::framing::{FrameError, FrameReceiver};
    use crate::core::session::SessionEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    struct MockTransport {
        frames: VecDeque<Result<Vec<u8>, FrameError>>,
    }

    impl MockTransport {
        fn with_frames(frames: Vec<Vec<u8>>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn poll_ready(&self) -> bool {
            !self.frames.is_empty()
        }

        async fn receive(&mut self) -> Result<Vec<u8>, FrameError> {
            self.frames.pop_front().unwrap_or(Err(FrameError::Disconnected))
        }
    }

    fn chatting_session(name: &str) -> SessionStateMachine {
        let mut sm = SessionStateMachine::new();
        sm.apply(SessionEvent::Connect).unwrap();
        sm.apply(SessionEvent::AuthenticateOk).unwrap();
        sm.apply(SessionEvent::PeerConnectAccepted).unwrap();
        sm.set_my_name(name);
        sm
    }

    fn test_loop(
        frames: Vec<Vec<u8>>,
    ) -> (
        EventLoop<MockTransport, DuplexStream>,
        LoopHandle,
        FrameReceiver<DuplexStream>,
    ) {
        let (client, server) = duplex(1 << 16);
        let sender = Arc::new(Mutex::new(FrameSender::new(client)));
        let (event_loop, handle) = EventLoop::new(
            MockTransport::with_frames(frames),
            sender,
            chatting_session("me"),
            Arc::new(AiClient::disabled()),
        );
        (event_loop, handle, FrameReceiver::new(server))
    }

    fn drain_events(handle: &mut LoopHandle) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(e) = handle.events.try_recv() {
            events.push(e);
        }
        events
    }

    async fn expect_no_frame(peer: &mut FrameReceiver<DuplexStream>) {
        let res = tokio::time::timeout(Duration::from_millis(20), peer.receive()).await;
        assert!(res.is_err(), "no frame should have been sent");
    }

    #[tokio::test]
    async fn tick_processes_one_inbound_and_one_outbound() {
        let inbound: Vec<Vec<u8>> = (0..3)
            .map(|i| format!("(07.12.25,19:0{i}) alice : hi {i}").into_bytes())
            .collect();
        let (mut event_loop, mut handle, mut peer) = test_loop(inbound);

        for i in 0..3 {
            handle.pending.submit(format!("reply {i}")).await;
            event_loop.tick().await;
        }

        // All three inbound frames and all three sends drained in three
        // ticks, strictly alternating receive-then-send.
        let texts: Vec<ChatEvent> = drain_events(&mut handle)
            .into_iter()
            .filter(|e| matches!(e, ChatEvent::Text { .. }))
            .collect();
        assert_eq!(texts.len(), 6);
        for (i, pair) in texts.chunks(2).enumerate() {
            match &pair[0] {
                ChatEvent::Text { sender, body, .. } => {
                    assert_eq!(sender, "alice");
                    assert_eq!(body, &format!("hi {i}"));
                }
                other => panic!("unexpected event {other:?}"),
            }
            match &pair[1] {
                ChatEvent::Text { sender, body, .. } => {
                    assert_eq!(sender, "me");
                    assert_eq!(body, &format!("reply {i}"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        for i in 0..3 {
            let sent = peer.receive().await.unwrap();
            assert_eq!(sent, format!("reply {i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn usage_error_sends_nothing() {
        let (mut event_loop, mut handle, mut peer) = test_loop(Vec::new());

        handle.pending.submit("/connect".into()).await;
        event_loop.tick().await;

        let events = drain_events(&mut handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { body } if body.contains("Usage"))));
        expect_no_frame(&mut peer).await;
    }

    #[tokio::test]
    async fn pending_outbound_is_a_single_overwriting_slot() {
        let (mut event_loop, mut handle, mut peer) = test_loop(Vec::new());

        handle.pending.submit("first".into()).await;
        handle.pending.submit("second".into()).await;
        event_loop.tick().await;

        assert_eq!(peer.receive().await.unwrap(), b"second");
        expect_no_frame(&mut peer).await;
    }

    #[tokio::test]
    async fn image_frames_are_handled_inside_the_loop() {
        let payload = WireAction::Image {
            from: "bob".into(),
            data: BASE64.encode(b"png-bytes"),
        }
        .to_payload();
        let (mut event_loop, mut handle, _peer) = test_loop(vec![payload]);

        event_loop.tick().await;

        let events = drain_events(&mut handle);
        assert_eq!(events.len(), 1, "image frames bypass the line parser");
        match &events[0] {
            ChatEvent::Image { sender, data } => {
                assert_eq!(sender, "bob");
                assert_eq!(data, b"png-bytes");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_list_refreshes_directory_wholesale() {
        let reply = |names: &str| {
            WireAction::List {
                results: Some(format!("online: {{{names}}}")),
            }
            .to_payload()
        };
        let (mut event_loop, mut handle, _peer) = test_loop(vec![
            reply("'me': 'online', 'alice': 'online'"),
            reply("'me': 'online'"),
        ]);

        event_loop.tick().await;
        {
            let dir = handle.directory.lock().await;
            assert_eq!(dir.suggest("", true), vec!["alice"]);
        }

        event_loop.tick().await;
        {
            let dir = handle.directory.lock().await;
            assert!(dir.suggest("", true).is_empty());
            assert!(dir.contains("me"));
        }

        let events = drain_events(&mut handle);
        assert!(events.iter().all(|e| matches!(e, ChatEvent::UserList { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_notifies_and_keeps_the_loop_alive() {
        let (mut event_loop, mut handle, _peer) = test_loop(Vec::new());
        event_loop
            .transport
            .frames
            .push_back(Err(FrameError::Disconnected));

        event_loop.tick().await;

        assert!(!event_loop.quit, "transient I/O failure must not stop the loop");
        assert_eq!(event_loop.session.state(), SessionState::Offline);
        let events = drain_events(&mut handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { body } if body.contains("Connection lost"))));

        // Once offline the loop stops probing the dead socket.
        event_loop.tick().await;
        assert!(drain_events(&mut handle).is_empty());
    }

    #[tokio::test]
    async fn send_failure_surfaces_notice_and_drops_offline() {
        let (mut event_loop, mut handle, peer) = test_loop(Vec::new());
        // Dropping the peer makes the next write fail.
        drop(peer);

        handle.pending.submit("hello".into()).await;
        event_loop.tick().await;

        assert_eq!(event_loop.session.state(), SessionState::Offline);
        assert!(!event_loop.quit, "a failed send must not stop the loop");
        let events = drain_events(&mut handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { body } if body.contains("Send failed"))));
    }

    #[tokio::test]
    async fn sendimage_broadcasts_the_file_as_an_image_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"png-bytes").unwrap();

        let (mut event_loop, mut handle, mut peer) = test_loop(Vec::new());
        handle
            .pending
            .submit(format!("/sendimage {}", path.display()))
            .await;
        event_loop.tick().await;

        let sent = peer.receive().await.unwrap();
        let decoded: WireAction = serde_json::from_slice(&sent).unwrap();
        match decoded {
            WireAction::Image { from, data } => {
                assert_eq!(from, "me");
                assert_eq!(BASE64.decode(data).unwrap(), b"png-bytes");
            }
            other => panic!("unexpected action {other:?}"),
        }
        let events = drain_events(&mut handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { body } if body.contains("Sending image"))));
    }

    #[tokio::test]
    async fn oversize_image_file_is_refused_locally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.png");
        std::fs::write(&path, vec![0u8; MAX_IMAGE_FILE_BYTES + 1]).unwrap();

        let (mut event_loop, mut handle, mut peer) = test_loop(Vec::new());
        handle
            .pending
            .submit(format!("/sendimage {}", path.display()))
            .await;
        event_loop.tick().await;

        // Let the file-reading worker finish, then drain its result.
        tokio::time::sleep(Duration::from_millis(200)).await;
        event_loop.tick().await;

        let events = drain_events(&mut handle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { body } if body.contains("too large"))));
        expect_no_frame(&mut peer).await;
    }

    #[tokio::test]
    async fn quit_token_terminates_the_loop() {
        let (mut event_loop, mut handle, mut peer) = test_loop(Vec::new());

        handle.pending.submit("/quit".into()).await;
        event_loop.tick().await;

        assert!(event_loop.quit);
        assert_eq!(event_loop.session.state(), SessionState::Offline);
        assert_eq!(peer.receive().await.unwrap(), b"q");
    }

    #[tokio::test]
    async fn joined_broadcast_promotes_logged_in_to_chatting() {
        let (client, _server) = duplex(1 << 16);
        let sender = Arc::new(Mutex::new(FrameSender::new(client)));
        let mut sm = SessionStateMachine::new();
        sm.apply(SessionEvent::Connect).unwrap();
        sm.apply(SessionEvent::AuthenticateOk).unwrap();
        sm.set_my_name("me");

        let (mut event_loop, mut handle) = EventLoop::new(
            MockTransport::with_frames(vec![b"bob has joined the chat".to_vec()]),
            sender,
            sm,
            Arc::new(AiClient::disabled()),
        );

        event_loop.tick().await;
        assert_eq!(event_loop.session.state(), SessionState::Chatting);
        assert!(drain_events(&mut handle)
            .iter()
            .any(|e| matches!(e, ChatEvent::Notice { .. })));
    }
}
