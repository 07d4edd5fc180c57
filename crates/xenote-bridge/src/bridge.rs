//! Message bridge between the embedded editor and its parent frame.
//!
//! Inbound messages are dispatched on their topic: load responses update the
//! stored content and notify listeners through the bridge's [`Emitter`]; save
//! requests answer with the currently staged document. The editor stages
//! snapshots as it changes (usually through the debounced entry point) and
//! the first snapshot ever staged is announced to the parent with `staged`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use xenote_core::config::Config;
use xenote_core::document::{
    AppState, BinaryFiles, Element, LoadStatus, LocalDataState, SaveData, StagedDocument,
};
use xenote_core::error::{Result, XenoteError};
use xenote_core::protocol::{Message, Topic, target_origin};

use crate::debounce::Debouncer;
use crate::emitter::{Emitter, Listener, Subscription};
use crate::lock;
use crate::serializer::{DocumentSerializer, SvgExportOptions, background_color};
use crate::transport::{InboundReceiver, Transport};

/// Emitted after `res loaddata` has been stored.
pub const EVENT_LOAD: &str = "load";

/// Emitted when the parent reports that loading failed.
pub const EVENT_LOAD_ERROR: &str = "load error";

/// Construction options for a [`MessageBridge`].
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// URL of the embedding document; outbound messages target its origin.
    pub referrer: String,
    /// Quiet period for [`MessageBridge::stage_for_save_debounced`].
    pub stage_debounce: Duration,
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            referrer: config.referrer().unwrap_or_default().to_string(),
            stage_debounce: config.stage_debounce(),
        }
    }
}

/// State shared with the inbound listener, the debounce timer and in-flight
/// saves.
struct BridgeInner {
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn DocumentSerializer>,
    referrer: String,
    emitter: Emitter<Value>,
    /// Raw payload of the last `res loaddata`.
    content: Mutex<Option<Value>>,
    /// `None` until the first stage; never reverts.
    staged: Mutex<Option<StagedDocument>>,
    status: Mutex<LoadStatus>,
    /// Replies to `req savedata` still being built.
    saves: Mutex<JoinSet<()>>,
}

impl BridgeInner {
    fn handle_message(self: &Arc<Self>, message: Message) {
        match message.known_topic() {
            Some(Topic::LoadData) => {
                *lock(&self.content) = message.data;
                *lock(&self.status) = LoadStatus::Loaded;
                debug!("Document content received");
                self.emitter.emit(EVENT_LOAD, None);
            }
            Some(Topic::LoadError) => {
                *lock(&self.status) = LoadStatus::LoadFailed;
                warn!("Parent frame failed to load the document");
                self.emitter.emit(EVENT_LOAD_ERROR, None);
            }
            Some(Topic::RequestSave) => {
                let inner = Arc::clone(self);
                let mut saves = lock(&self.saves);
                while saves.try_join_next().is_some() {}
                saves.spawn(async move {
                    if let Err(e) = inner.send_data().await {
                        error!(error = %e, "Failed to answer save request");
                    }
                });
            }
            _ => debug!(topic = %message.topic, "Ignoring message"),
        }
    }

    fn send_message(&self, message: &Message) {
        let result = target_origin(&self.referrer)
            .and_then(|origin| self.transport.post_message(message, &origin));
        match result {
            Ok(()) => debug!(topic = %message.topic, "Sent message"),
            Err(e) => error!(topic = %message.topic, error = %e, "Failed to send message"),
        }
    }

    fn stage(&self, document: StagedDocument) {
        let first = {
            let mut staged = lock(&self.staged);
            let first = staged.is_none();
            *staged = Some(document);
            first
        };
        if first {
            info!("Document staged for save");
            self.send_message(&Message::new(Topic::Staged));
        }
    }

    fn local_data_state(&self) -> LocalDataState {
        let content = lock(&self.content);
        let Some(content) = content.as_ref() else {
            return LocalDataState::default();
        };

        let elements = match parse_field(content, "elements") {
            Some(Value::Array(items)) => self.serializer.clear_elements_for_storage(&items),
            Some(other) => {
                warn!(kind = %json_kind(&other), "Loaded elements are not an array");
                Vec::new()
            }
            None => Vec::new(),
        };

        let app_state = match parse_field(content, "appState") {
            Some(Value::Object(saved)) => {
                let mut state = self.serializer.default_app_state();
                state.extend(self.serializer.clear_app_state_for_storage(&saved));
                Some(state)
            }
            Some(other) => {
                warn!(kind = %json_kind(&other), "Loaded app-state is not an object");
                None
            }
            None => None,
        };

        LocalDataState {
            elements,
            app_state,
        }
    }

    async fn save_data(&self) -> Result<SaveData> {
        let document = lock(&self.staged).clone().ok_or(XenoteError::NothingStaged)?;

        let visible = self.serializer.non_deleted_elements(&document.elements);
        let options = SvgExportOptions {
            export_background: false,
            view_background_color: background_color(&document.app_state),
            ..Default::default()
        };
        let svg = self
            .serializer
            .export_to_svg(&visible, &options, Some(&document.files))
            .await?;

        let elements =
            serde_json::to_string(&self.serializer.clear_elements_for_storage(&document.elements))?;
        let app_state = serde_json::to_string(&document.persisted_app_state())?;

        Ok(SaveData {
            elements,
            app_state,
            files: document.files,
            svg,
        })
    }

    async fn send_data(&self) -> Result<()> {
        let data = self.save_data().await?;
        self.send_message(&Message::with_data(Topic::SaveData, serde_json::to_value(data)?));
        Ok(())
    }

    /// Wait for every save reply spawned so far.
    async fn join_saves(&self) {
        let mut saves = std::mem::take(&mut *lock(&self.saves));
        if !saves.is_empty() {
            debug!(pending = saves.len(), "Waiting for save replies");
        }
        while let Some(result) = saves.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(error = %e, "Save reply task failed");
                }
            }
        }
    }
}

/// Read a persisted field of loaded content.
///
/// Fields arrive as JSON strings; absent, null or empty values count as
/// missing, and unparseable strings are logged and treated as missing.
fn parse_field(content: &Value, key: &str) -> Option<Value> {
    match content.get(key)? {
        Value::Null => None,
        Value::String(raw) if raw.is_empty() => None,
        Value::String(raw) => match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(field = key, error = %e, "Loaded content is not valid JSON");
                None
            }
        },
        other => Some(other.clone()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The editor's end of the frame bridge.
pub struct MessageBridge {
    inner: Arc<BridgeInner>,
    stage_debounce: Debouncer<StagedDocument>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn DocumentSerializer>,
        options: BridgeOptions,
    ) -> Self {
        let inner = Arc::new(BridgeInner {
            transport,
            serializer,
            referrer: options.referrer,
            emitter: Emitter::new(),
            content: Mutex::new(None),
            staged: Mutex::new(None),
            status: Mutex::new(LoadStatus::Unloaded),
            saves: Mutex::new(JoinSet::new()),
        });

        let staging = Arc::clone(&inner);
        let stage_debounce =
            Debouncer::new(options.stage_debounce, move |document: StagedDocument| {
                staging.stage(document)
            });

        Self {
            inner,
            stage_debounce,
            listener: Mutex::new(None),
        }
    }

    /// Start handling messages from `inbound`, in arrival order.
    ///
    /// Replaces (and stops) any listener attached earlier.
    pub fn listen(&self, mut inbound: InboundReceiver) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                inner.handle_message(message);
            }
            debug!("Inbound channel closed");
        });

        if let Some(previous) = lock(&self.listener).replace(handle) {
            warn!("Replacing existing inbound listener");
            previous.abort();
        }
    }

    /// Wait until the inbound channel closes, every queued message has been
    /// dispatched and every save reply has been sent.
    pub async fn join_listener(&self) {
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Inbound listener failed");
                }
            }
        }
        self.inner.join_saves().await;
    }

    /// Dispatch one inbound message.
    ///
    /// A save request answers asynchronously on a spawned task, so this must
    /// be called within a tokio runtime.
    pub fn handle_message(&self, message: Message) {
        self.inner.handle_message(message);
    }

    /// Post `message` to the parent frame. Failures are logged, never returned.
    pub fn send_message(&self, message: &Message) {
        self.inner.send_message(message);
    }

    /// Ask the parent for the document. The outcome arrives as a
    /// [`EVENT_LOAD`] or [`EVENT_LOAD_ERROR`] event, if at all.
    pub fn load(&self) {
        *lock(&self.inner.status) = LoadStatus::AwaitingLoad;
        self.inner.send_message(&Message::new(Topic::RequestLoad));
    }

    /// Elements and app-state restored from the loaded content.
    ///
    /// App-state is merged over the defaults; it is `None` when the content
    /// carried none.
    pub fn get_local_data_state(&self) -> LocalDataState {
        self.inner.local_data_state()
    }

    /// Replace the staged document. The first call also notifies the parent.
    pub fn stage_for_save(&self, elements: Vec<Element>, app_state: AppState, files: BinaryFiles) {
        self.inner.stage(StagedDocument::new(elements, app_state, files));
    }

    /// [`stage_for_save`](Self::stage_for_save), applied once the configured
    /// quiet period passes without another call.
    pub fn stage_for_save_debounced(
        &self,
        elements: Vec<Element>,
        app_state: AppState,
        files: BinaryFiles,
    ) {
        self.stage_debounce.call(StagedDocument::new(elements, app_state, files));
    }

    /// Build the save payload for the staged document.
    ///
    /// Fails with [`XenoteError::NothingStaged`] if nothing was ever staged.
    pub async fn get_save_data(&self) -> Result<SaveData> {
        self.inner.save_data().await
    }

    /// Send the staged document to the parent as `res savedata`.
    pub async fn send_data(&self) -> Result<()> {
        self.inner.send_data().await
    }

    /// Save on the editor's own initiative.
    pub async fn save(&self) -> Result<()> {
        self.send_data().await
    }

    /// Tell the parent the current flow was aborted.
    pub fn cancel(&self) {
        self.inner.send_message(&Message::new(Topic::Cancel));
    }

    pub fn on(&self, event: &str, listener: Listener<Value>) -> Subscription<Value> {
        self.inner.emitter.on(event, listener)
    }

    pub fn on_fn<F>(&self, event: &str, f: F) -> Subscription<Value>
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.emitter.on_fn(event, f)
    }

    pub fn events(&self) -> &Emitter<Value> {
        &self.inner.emitter
    }

    pub fn load_status(&self) -> LoadStatus {
        *lock(&self.inner.status)
    }

    pub fn is_staged(&self) -> bool {
        lock(&self.inner.staged).is_some()
    }

    pub fn staged(&self) -> Option<StagedDocument> {
        lock(&self.inner.staged).clone()
    }

    /// Apply any pending debounced stage, stop the inbound listener and drop
    /// all event listeners.
    ///
    /// Save replies already in flight are not cancelled; call
    /// [`join_listener`](Self::join_listener) first to wait for them.
    pub fn dispose(&self) {
        self.stage_debounce.flush();
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        self.inner.emitter.destroy();
        debug!("Bridge disposed");
    }
}

impl Drop for MessageBridge {
    fn drop(&mut self) {
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::serializer::StorageSerializer;
    use crate::transport::{ChannelTransport, OutboundReceiver, inbound_channel};

    const PARENT: &str = "https://host.example";

    fn bridge_with_referrer(referrer: &str) -> (MessageBridge, OutboundReceiver) {
        let (transport, rx) = ChannelTransport::new(PARENT);
        let bridge = MessageBridge::new(
            Arc::new(transport),
            Arc::new(StorageSerializer::default()),
            BridgeOptions {
                referrer: referrer.to_string(),
                stage_debounce: Duration::from_millis(200),
            },
        );
        (bridge, rx)
    }

    fn bridge() -> (MessageBridge, OutboundReceiver) {
        bridge_with_referrer("https://host.example/notes/42")
    }

    fn obj(value: Value) -> AppState {
        value.as_object().cloned().unwrap()
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<String> {
        let mut topics = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            topics.push(msg.topic);
        }
        topics
    }

    fn count_event(bridge: &MessageBridge, event: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bridge.on_fn(event, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_load_requests_document() {
        let (bridge, mut rx) = bridge();
        assert_eq!(bridge.load_status(), LoadStatus::Unloaded);

        bridge.load();
        assert_eq!(bridge.load_status(), LoadStatus::AwaitingLoad);
        assert_eq!(rx.try_recv().unwrap(), Message::new(Topic::RequestLoad));
    }

    #[test]
    fn test_load_data_stores_content_and_emits() {
        let (bridge, _rx) = bridge();
        let loads = count_event(&bridge, EVENT_LOAD);

        bridge.handle_message(Message::with_data(
            Topic::LoadData,
            json!({ "elements": "[]", "appState": "{}" }),
        ));

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.load_status(), LoadStatus::Loaded);

        let state = bridge.get_local_data_state();
        assert!(state.elements.is_empty());
        assert_eq!(
            state.app_state,
            Some(StorageSerializer::default().default_app_state())
        );
    }

    #[test]
    fn test_local_data_state_is_idempotent() {
        let (bridge, _rx) = bridge();
        bridge.handle_message(Message::with_data(
            Topic::LoadData,
            json!({
                "elements": r#"[{"id":"a","type":"rectangle"},{"id":"b","type":"rectangle","isDeleted":true}]"#,
                "appState": r##"{"viewBackgroundColor":"#000","selectedElementIds":{"a":true}}"##,
            }),
        ));

        let first = bridge.get_local_data_state();
        let second = bridge.get_local_data_state();
        assert_eq!(first, second);

        assert_eq!(first.elements.len(), 1);
        assert_eq!(first.elements[0]["id"], json!("a"));
        let app_state = first.app_state.unwrap();
        assert_eq!(app_state["viewBackgroundColor"], json!("#000"));
        assert_eq!(app_state["theme"], json!("light"));
        assert!(app_state.get("selectedElementIds").is_none());
    }

    #[test]
    fn test_load_error_emits_and_leaves_content_unset() {
        let (bridge, _rx) = bridge();
        let loads = count_event(&bridge, EVENT_LOAD);
        let errors = count_event(&bridge, EVENT_LOAD_ERROR);

        bridge.load();
        bridge.handle_message(Message::new(Topic::LoadError));

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.load_status(), LoadStatus::LoadFailed);
        assert_eq!(bridge.get_local_data_state(), LocalDataState::default());
    }

    #[test]
    fn test_missing_and_malformed_content_degrades() {
        let (bridge, _rx) = bridge();

        bridge.handle_message(Message::with_data(Topic::LoadData, json!({})));
        let state = bridge.get_local_data_state();
        assert!(state.elements.is_empty());
        assert!(state.app_state.is_none());

        bridge.handle_message(Message::with_data(
            Topic::LoadData,
            json!({ "elements": "not json", "appState": "[1, 2]" }),
        ));
        let state = bridge.get_local_data_state();
        assert!(state.elements.is_empty());
        assert!(state.app_state.is_none());

        bridge.handle_message(Message::new(Topic::LoadData));
        assert_eq!(bridge.get_local_data_state(), LocalDataState::default());
    }

    #[test]
    fn test_unknown_topics_are_ignored() {
        let (bridge, mut rx) = bridge();
        let loads = count_event(&bridge, EVENT_LOAD);

        bridge.handle_message(Message {
            topic: "req theme".into(),
            data: Some(json!({ "dark": true })),
        });
        bridge.handle_message(Message::new(Topic::Staged));

        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.load_status(), LoadStatus::Unloaded);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_staged_sent_once_even_for_empty_document() {
        let (bridge, mut rx) = bridge();
        assert!(!bridge.is_staged());

        bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());
        assert!(bridge.is_staged());
        bridge.stage_for_save(vec![json!({ "id": "a" })], AppState::new(), BinaryFiles::new());
        bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());

        assert_eq!(drain(&mut rx), vec!["staged".to_string()]);
    }

    #[test]
    fn test_stage_replaces_wholesale() {
        let (bridge, _rx) = bridge();
        bridge.stage_for_save(
            vec![json!({ "id": "a" })],
            obj(json!({ "viewBackgroundColor": "#111", "theme": "dark" })),
            obj(json!({ "f1": {} })),
        );
        bridge.stage_for_save(
            vec![json!({ "id": "b" })],
            obj(json!({ "viewBackgroundColor": "#222" })),
            BinaryFiles::new(),
        );

        let staged = bridge.staged().unwrap();
        assert_eq!(staged.elements, vec![json!({ "id": "b" })]);
        assert_eq!(staged.app_state, obj(json!({ "viewBackgroundColor": "#222" })));
        assert!(staged.files.is_empty());
    }

    #[tokio::test]
    async fn test_save_data_before_staging_fails() {
        let (bridge, mut rx) = bridge();
        let err = bridge.get_save_data().await.unwrap_err();
        assert!(matches!(err, XenoteError::NothingStaged));
        assert!(bridge.send_data().await.is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_save_data_keeps_only_background_color() {
        let (bridge, _rx) = bridge();
        bridge.stage_for_save(
            vec![],
            obj(json!({ "viewBackgroundColor": "#fff" })),
            BinaryFiles::new(),
        );

        let data = bridge.get_save_data().await.unwrap();
        assert_eq!(data.app_state, r##"{"viewBackgroundColor":"#fff"}"##);
        assert_eq!(data.elements, "[]");
        assert!(data.files.is_empty());
        assert!(data.svg.starts_with("<svg"));
    }

    #[tokio::test]
    async fn test_save_data_sanitizes_and_renders_without_background() {
        let (bridge, _rx) = bridge();
        bridge.stage_for_save(
            vec![
                json!({ "id": "a", "type": "rectangle", "x": 0, "y": 0, "width": 10, "height": 10 }),
                json!({ "id": "b", "type": "rectangle", "x": 500, "y": 500, "width": 10, "height": 10, "isDeleted": true }),
            ],
            obj(json!({ "viewBackgroundColor": "#abcdef", "zoom": { "value": 3 } })),
            obj(json!({ "f1": { "mimeType": "image/png" } })),
        );

        let data = bridge.get_save_data().await.unwrap();
        let elements: Vec<Value> = serde_json::from_str(&data.elements).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0]["id"], json!("a"));
        assert_eq!(data.app_state, r##"{"viewBackgroundColor":"#abcdef"}"##);
        assert!(data.files.contains_key("f1"));
        // Deleted element is not part of the drawing bounds and no background is painted.
        assert!(data.svg.contains(r#"viewBox="0 0 30 30""#));
        assert!(!data.svg.contains("#abcdef"));
    }

    #[tokio::test]
    async fn test_save_request_answers_with_save_data() {
        let (bridge, mut rx) = bridge();
        bridge.stage_for_save(
            vec![],
            obj(json!({ "viewBackgroundColor": "#fff" })),
            BinaryFiles::new(),
        );
        assert_eq!(rx.recv().await.unwrap().topic, "staged");

        bridge.handle_message(Message::new(Topic::RequestSave));
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.known_topic(), Some(Topic::SaveData));

        let data: SaveData = serde_json::from_value(reply.data.unwrap()).unwrap();
        assert_eq!(data.app_state, r##"{"viewBackgroundColor":"#fff"}"##);
    }

    #[tokio::test]
    async fn test_save_and_cancel() {
        let (bridge, mut rx) = bridge();
        bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());
        bridge.save().await.unwrap();
        bridge.cancel();

        assert_eq!(
            drain(&mut rx),
            vec!["staged".to_string(), "res savedata".to_string(), "req cancel".to_string()]
        );
    }

    #[tokio::test]
    async fn test_send_failures_are_swallowed() {
        for referrer in ["", "https://elsewhere.example/page"] {
            let (bridge, mut rx) = bridge_with_referrer(referrer);
            bridge.load();
            bridge.cancel();
            bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());
            // The document still counts as staged even though the notice was lost.
            assert!(bridge.is_staged());
            bridge.send_data().await.unwrap();
            assert!(drain(&mut rx).is_empty());
        }
    }

    #[tokio::test]
    async fn test_wildcard_referrer_reaches_any_parent() {
        let (bridge, mut rx) = bridge_with_referrer("*");
        bridge.load();
        bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());
        bridge.send_data().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec!["req loaddata".to_string(), "staged".to_string(), "res savedata".to_string()]
        );
    }

    /// Storage serializer whose export takes a while.
    struct SlowExport(StorageSerializer);

    #[async_trait::async_trait]
    impl DocumentSerializer for SlowExport {
        fn clear_elements_for_storage(&self, elements: &[Element]) -> Vec<Element> {
            self.0.clear_elements_for_storage(elements)
        }

        fn clear_app_state_for_storage(&self, app_state: &AppState) -> AppState {
            self.0.clear_app_state_for_storage(app_state)
        }

        fn default_app_state(&self) -> AppState {
            self.0.default_app_state()
        }

        fn non_deleted_elements(&self, elements: &[Element]) -> Vec<Element> {
            self.0.non_deleted_elements(elements)
        }

        async fn export_to_svg(
            &self,
            elements: &[Element],
            options: &SvgExportOptions,
            files: Option<&BinaryFiles>,
        ) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.export_to_svg(elements, options, files).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_listener_waits_for_save_replies() {
        let (transport, mut rx) = ChannelTransport::new(PARENT);
        let bridge = MessageBridge::new(
            Arc::new(transport),
            Arc::new(SlowExport(StorageSerializer::default())),
            BridgeOptions {
                referrer: PARENT.to_string(),
                stage_debounce: Duration::from_millis(200),
            },
        );
        bridge.stage_for_save(vec![], AppState::new(), BinaryFiles::new());

        let (inbound_tx, inbound_rx) = inbound_channel();
        bridge.listen(inbound_rx);
        inbound_tx.send(Message::new(Topic::RequestSave)).unwrap();
        inbound_tx.send(Message::new(Topic::RequestSave)).unwrap();
        drop(inbound_tx);

        let started = tokio::time::Instant::now();
        bridge.join_listener().await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(
            drain(&mut rx),
            vec!["staged".to_string(), "res savedata".to_string(), "res savedata".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_staging_keeps_last_call() {
        let (bridge, mut rx) = bridge();

        for i in 0..10 {
            bridge.stage_for_save_debounced(
                vec![json!({ "id": i })],
                AppState::new(),
                BinaryFiles::new(),
            );
        }
        assert!(!bridge.is_staged());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let staged = bridge.staged().unwrap();
        assert_eq!(staged.elements, vec![json!({ "id": 9 })]);
        assert_eq!(drain(&mut rx), vec!["staged".to_string()]);

        bridge.stage_for_save_debounced(vec![], AppState::new(), BinaryFiles::new());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(bridge.staged().unwrap().elements.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_listen_dispatches_inbound_messages() {
        let (bridge, _rx) = bridge();
        let (loaded_tx, mut loaded_rx) = tokio::sync::mpsc::unbounded_channel();
        bridge.on_fn(EVENT_LOAD, move |_| {
            let _ = loaded_tx.send(());
        });

        let (inbound_tx, inbound_rx) = inbound_channel();
        bridge.listen(inbound_rx);
        inbound_tx
            .send(Message::with_data(Topic::LoadData, json!({ "elements": "[]" })))
            .unwrap();

        loaded_rx.recv().await.unwrap();
        assert_eq!(bridge.load_status(), LoadStatus::Loaded);
    }

    #[tokio::test]
    async fn test_join_listener_drains_queue() {
        let (bridge, _rx) = bridge();
        let errors = count_event(&bridge, EVENT_LOAD_ERROR);
        let (inbound_tx, inbound_rx) = inbound_channel();
        bridge.listen(inbound_rx);

        for _ in 0..3 {
            inbound_tx.send(Message::new(Topic::LoadError)).unwrap();
        }
        drop(inbound_tx);

        bridge.join_listener().await;
        assert_eq!(errors.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_flushes_and_detaches() {
        let (bridge, mut rx) = bridge();
        let loads = count_event(&bridge, EVENT_LOAD);
        let (inbound_tx, inbound_rx) = inbound_channel();
        bridge.listen(inbound_rx);

        bridge.stage_for_save_debounced(vec![json!({ "id": "last" })], AppState::new(), BinaryFiles::new());
        bridge.dispose();

        // The pending stage was applied right away.
        assert_eq!(bridge.staged().unwrap().elements, vec![json!({ "id": "last" })]);
        assert_eq!(drain(&mut rx), vec!["staged".to_string()]);

        // Listener is gone: the send fails or the message is never handled.
        let _ = inbound_tx.send(Message::with_data(Topic::LoadData, json!({})));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.load_status(), LoadStatus::Unloaded);
        assert_eq!(bridge.events().listener_count(EVENT_LOAD), 0);
    }
}
