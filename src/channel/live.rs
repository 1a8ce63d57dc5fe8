//! WebSocket adapter for a Gemini-Live-style JSON protocol.
//!
//! ```text
//! connect_async(endpoint?key=…)
//!   → {"setup": {...}}              (model, voice, instruction, tools)
//!   ← {"setupComplete": {}}          handshake done
//!
//! writer task:  ChannelPeer.audio / .results → realtimeInput / toolResponse
//! reader task:  serverContent / toolCall      → InboundEvent
//! ```
//!
//! Closing the [`ChannelHandle`] stops the writer (after flushing any tool
//! results already queued) and sends a close frame.  The reader exits once
//! the server acknowledges the close or the session stops listening.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::audio::WireAudio;
use crate::channel::events::{InboundEvent, OutboundEvent, ToolCall, ToolResult};
use crate::channel::{ChannelConnector, ChannelError, ChannelHandle, ChannelPeer, SessionSetup};
use crate::config::LiveConfig;
use crate::session::Speaker;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Server message schema (only the fields we consume)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallMessage>,
    tool_call_cancellation: Option<Value>,
    go_away: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallMessage {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    args: Value,
}

// ---------------------------------------------------------------------------
// Message mapping
// ---------------------------------------------------------------------------

/// Demultiplex one server message into zero or more inbound events.
///
/// Within a `serverContent` message the order is: user transcription, model
/// parts, model transcription, interruption, turn completion.
pub fn parse_server_message(text: &str) -> Result<Vec<InboundEvent>, ChannelError> {
    let msg: ServerMessage = serde_json::from_str(text)
        .map_err(|e| ChannelError::Transport(format!("unparseable server message: {e}")))?;

    let mut events = Vec::new();

    if let Some(content) = msg.server_content {
        if let Some(delta) = content.input_transcription.and_then(|t| t.text) {
            push_transcript(&mut events, Speaker::User, delta);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    events.push(InboundEvent::Audio(WireAudio {
                        mime_type: inline.mime_type,
                        data: inline.data,
                    }));
                }
                if let Some(text) = part.text {
                    push_transcript(&mut events, Speaker::Model, text);
                }
            }
        }
        if let Some(delta) = content.output_transcription.and_then(|t| t.text) {
            push_transcript(&mut events, Speaker::Model, delta);
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
    }

    if let Some(call) = msg.tool_call {
        events.extend(call.function_calls.into_iter().map(|fc| {
            InboundEvent::ToolCall(ToolCall {
                call_id: fc.id,
                name: fc.name,
                arguments: fc.args,
            })
        }));
    }

    if msg.tool_call_cancellation.is_some() {
        log::debug!("live: ignoring tool call cancellation");
    }
    if let Some(go_away) = msg.go_away {
        log::warn!("live: server announced disconnect: {go_away}");
    }

    Ok(events)
}

fn push_transcript(events: &mut Vec<InboundEvent>, speaker: Speaker, delta: String) {
    if !delta.is_empty() {
        events.push(InboundEvent::Transcript { speaker, delta });
    }
}

/// Serialize an outbound event as a client message.
pub fn encode_client_message(event: &OutboundEvent) -> String {
    let value = match event {
        OutboundEvent::Audio(audio) => json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": audio.mime_type, "data": audio.data }]
            }
        }),
        OutboundEvent::ToolResult(result) => json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": result.call_id,
                    "name": result.name,
                    "response": { "result": result.result }
                }]
            }
        }),
    };
    value.to_string()
}

/// Build the opening `setup` message.
pub fn encode_setup(setup: &SessionSetup) -> String {
    let mut body = json!({
        "model": setup.model,
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": setup.voice } }
            }
        },
        "inputAudioTranscription": {},
        "outputAudioTranscription": {}
    });
    if !setup.system_instruction.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": setup.system_instruction }] });
    }
    if !setup.tools.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": setup.tools }]);
    }
    json!({ "setup": body }).to_string()
}

fn is_setup_complete(text: &str) -> bool {
    serde_json::from_str::<ServerMessage>(text)
        .map(|msg| msg.setup_complete.is_some())
        .unwrap_or(false)
}

fn frame_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// LiveConnector
// ---------------------------------------------------------------------------

pub struct LiveConnector {
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
}

impl LiveConnector {
    pub fn from_config(cfg: &LiveConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone().unwrap_or_default(),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
        }
    }

    fn url(&self) -> String {
        if self.api_key.is_empty() {
            self.endpoint.clone()
        } else {
            format!("{}?key={}", self.endpoint, self.api_key)
        }
    }

    async fn handshake(&self, setup: &SessionSetup) -> Result<WsStream, ChannelError> {
        let (mut ws, _resp) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| ChannelError::Handshake(e.to_string()))?;

        ws.send(Message::Text(encode_setup(setup)))
            .await
            .map_err(|e| ChannelError::Handshake(e.to_string()))?;

        while let Some(msg) = ws.next().await {
            let msg = msg.map_err(|e| ChannelError::Handshake(e.to_string()))?;
            if let Message::Close(frame) = &msg {
                let reason = frame
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed during setup".into());
                return Err(ChannelError::Handshake(reason));
            }
            if let Some(text) = frame_text(msg) {
                if is_setup_complete(&text) {
                    return Ok(ws);
                }
                log::debug!("live: ignoring pre-setup message");
            }
        }
        Err(ChannelError::Handshake("connection ended during setup".into()))
    }
}

#[async_trait]
impl ChannelConnector for LiveConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<ChannelHandle, ChannelError> {
        log::info!("live: connecting to {} (model {})", self.endpoint, setup.model);

        let ws = tokio::time::timeout(self.connect_timeout, self.handshake(setup))
            .await
            .map_err(|_| ChannelError::Timeout(self.connect_timeout.as_secs()))??;

        log::info!("live: setup complete");

        let (sink, stream) = ws.split();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (handle, peer) = ChannelHandle::pair(move || {
            let _ = shutdown_tx.send(());
        });
        let ChannelPeer {
            inbound,
            audio,
            results,
        } = peer;

        tokio::spawn(run_writer(sink, audio, results, shutdown_rx));
        tokio::spawn(run_reader(stream, inbound));

        Ok(handle)
    }
}

async fn run_writer(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut audio: tokio::sync::mpsc::Receiver<WireAudio>,
    mut results: tokio::sync::mpsc::UnboundedReceiver<ToolResult>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(result) = results.recv() => OutboundEvent::ToolResult(result),
            Some(frame) = audio.recv() => OutboundEvent::Audio(frame),
            else => break,
        };
        if let Err(e) = sink.send(Message::Text(encode_client_message(&event))).await {
            log::warn!("live: send failed: {e}");
            return;
        }
    }

    // Results queued just before close (e.g. the reply to `navigate`) still go out.
    while let Ok(result) = results.try_recv() {
        let msg = encode_client_message(&OutboundEvent::ToolResult(result));
        if sink.send(Message::Text(msg)).await.is_err() {
            return;
        }
    }
    if let Err(e) = sink.close().await {
        log::debug!("live: close frame not sent: {e}");
    }
}

async fn run_reader(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    inbound: tokio::sync::mpsc::Sender<InboundEvent>,
) {
    let reason = loop {
        let msg = match stream.next().await {
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by remote".into());
            }
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break e.to_string(),
            None => break "connection ended".into(),
        };

        let Some(text) = frame_text(msg) else {
            continue;
        };
        match parse_server_message(&text) {
            Ok(events) => {
                for event in events {
                    if inbound.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => log::warn!("live: {e}"),
        }
    };

    log::warn!("live: connection lost: {reason}");
    let _ = inbound.send(InboundEvent::Closed { reason }).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    use super::*;
    use crate::tools::ToolDeclaration;

    #[test]
    fn parses_inline_audio() {
        let events = parse_server_message(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![InboundEvent::Audio(WireAudio {
                mime_type: "audio/pcm;rate=24000".into(),
                data: "AAA=".into(),
            })]
        );
    }

    #[test]
    fn parses_transcriptions_user_first() {
        let events = parse_server_message(
            r#"{"serverContent":{
                "outputTranscription":{"text":"Sure"},
                "inputTranscription":{"text":"Make a post"}
            }}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                InboundEvent::Transcript {
                    speaker: Speaker::User,
                    delta: "Make a post".into()
                },
                InboundEvent::Transcript {
                    speaker: Speaker::Model,
                    delta: "Sure".into()
                },
            ]
        );
    }

    #[test]
    fn model_text_part_is_model_transcript() {
        let events =
            parse_server_message(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hi"}]}}}"#)
                .unwrap();
        assert_eq!(
            events,
            vec![InboundEvent::Transcript {
                speaker: Speaker::Model,
                delta: "hi".into()
            }]
        );
    }

    #[test]
    fn turn_complete_follows_content() {
        let events = parse_server_message(
            r#"{"serverContent":{"outputTranscription":{"text":"done"},"turnComplete":true}}"#,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], InboundEvent::TurnComplete);
    }

    #[test]
    fn parses_interruption() {
        let events = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(events, vec![InboundEvent::Interrupted]);
    }

    #[test]
    fn one_event_per_function_call() {
        let events = parse_server_message(
            r#"{"toolCall":{"functionCalls":[
                {"id":"a","name":"navigate","args":{"screen":"calendar"}},
                {"id":"b","name":"createDraftItem","args":{"content":"x"}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            InboundEvent::ToolCall(call) => {
                assert_eq!(call.call_id, "a");
                assert_eq!(call.name, "navigate");
                assert_eq!(call.arguments["screen"], "calendar");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn setup_complete_yields_no_events() {
        assert!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap().is_empty());
        assert!(is_setup_complete(r#"{"setupComplete":{}}"#));
        assert!(!is_setup_complete(r#"{"serverContent":{}}"#));
    }

    #[test]
    fn garbage_is_a_transport_error() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(ChannelError::Transport(_))
        ));
    }

    #[test]
    fn encodes_audio_as_media_chunk() {
        let msg = encode_client_message(&OutboundEvent::Audio(WireAudio {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAAA".into(),
        }));
        let v: Value = serde_json::from_str(&msg).unwrap();
        let chunk = &v["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn encodes_tool_result_with_call_id() {
        let msg = encode_client_message(&OutboundEvent::ToolResult(ToolResult {
            call_id: "x1".into(),
            name: "doTheThing".into(),
            result: "Unknown capability: doTheThing".into(),
        }));
        let v: Value = serde_json::from_str(&msg).unwrap();
        let resp = &v["toolResponse"]["functionResponses"][0];
        assert_eq!(resp["id"], "x1");
        assert_eq!(resp["name"], "doTheThing");
        assert_eq!(resp["response"]["result"], "Unknown capability: doTheThing");
    }

    #[test]
    fn setup_carries_model_voice_and_tools() {
        let setup = SessionSetup {
            model: "models/live".into(),
            voice: "Puck".into(),
            system_instruction: "Be brief.".into(),
            tools: vec![ToolDeclaration {
                name: "navigate".into(),
                description: "Go somewhere".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let v: Value = serde_json::from_str(&encode_setup(&setup)).unwrap();
        let body = &v["setup"];
        assert_eq!(body["model"], "models/live");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "navigate");
        assert!(body["inputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_omits_empty_instruction_and_tools() {
        let v: Value = serde_json::from_str(&encode_setup(&SessionSetup::default())).unwrap();
        assert!(v["setup"].get("systemInstruction").is_none());
        assert!(v["setup"].get("tools").is_none());
    }

    #[test]
    fn url_appends_key_when_present() {
        let mut cfg = LiveConfig::default();
        cfg.endpoint = "wss://example.test/ws".into();
        cfg.api_key = Some("k".into());
        assert_eq!(LiveConnector::from_config(&cfg).url(), "wss://example.test/ws?key=k");
        cfg.api_key = None;
        assert_eq!(LiveConnector::from_config(&cfg).url(), "wss://example.test/ws");
    }

    // ---- socket behaviour against a local server ----------------------------

    const SETUP_COMPLETE: &str = r#"{"setupComplete":{}}"#;

    /// Accept one WebSocket client on an ephemeral port and run `script` on it.
    async fn serve<T, F, Fut>(script: F) -> (String, JoinHandle<T>)
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            script(ws).await
        });
        (format!("ws://{addr}"), task)
    }

    fn local(endpoint: String, connect_timeout: Duration) -> LiveConnector {
        LiveConnector {
            endpoint,
            api_key: String::new(),
            connect_timeout,
        }
    }

    #[tokio::test]
    async fn silent_server_times_out_handshake() {
        let (url, _server) = serve(|mut ws| async move {
            let _setup = ws.next().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;

        let result = local(url, Duration::from_millis(200))
            .connect(&SessionSetup::default())
            .await;
        match result {
            Err(e) => assert_eq!(e, ChannelError::Timeout(0)),
            Ok(_) => panic!("handshake should time out"),
        }
    }

    #[tokio::test]
    async fn close_during_setup_is_handshake_error() {
        let (url, _server) = serve(|mut ws| async move {
            let _setup = ws.next().await;
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "unknown model".into(),
                }))
                .await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let result = local(url, Duration::from_secs(5))
            .connect(&SessionSetup::default())
            .await;
        match result {
            Err(e) => assert_eq!(e, ChannelError::Handshake("unknown model".into())),
            Ok(_) => panic!("setup should be refused"),
        }
    }

    #[tokio::test]
    async fn queued_result_is_sent_before_close_frame() {
        let (url, server) = serve(|mut ws| async move {
            let mut seen = Vec::new();
            if let Some(Ok(setup)) = ws.next().await {
                seen.push(setup);
            }
            ws.send(Message::Text(SETUP_COMPLETE.into())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let done = msg.is_close();
                seen.push(msg);
                if done {
                    break;
                }
            }
            seen
        })
        .await;

        let handle = local(url, Duration::from_secs(5))
            .connect(&SessionSetup::default())
            .await
            .unwrap();
        handle
            .send_result(ToolResult {
                call_id: "n1".into(),
                name: "navigate".into(),
                result: "Navigated to calendar".into(),
            })
            .unwrap();
        handle.close();

        let seen = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.len(), 3, "{seen:?}");
        match &seen[0] {
            Message::Text(text) => assert!(text.contains("\"setup\"")),
            other => panic!("expected setup, got {other:?}"),
        }
        match &seen[1] {
            Message::Text(text) => {
                let v: Value = serde_json::from_str(text).unwrap();
                let response = &v["toolResponse"]["functionResponses"][0];
                assert_eq!(response["id"], "n1");
                assert_eq!(response["response"]["result"], "Navigated to calendar");
            }
            other => panic!("expected tool response, got {other:?}"),
        }
        assert!(seen[2].is_close());
    }

    #[tokio::test]
    async fn server_close_reason_reaches_session() {
        let (url, _server) = serve(|mut ws| async move {
            let _setup = ws.next().await;
            ws.send(Message::Text(SETUP_COMPLETE.into())).await.unwrap();
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "session expired".into(),
            })))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut handle = local(url, Duration::from_secs(5))
            .connect(&SessionSetup::default())
            .await
            .unwrap();
        let mut inbound = handle.take_inbound().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(InboundEvent::Closed {
                reason: "session expired".into()
            })
        );
    }
}
