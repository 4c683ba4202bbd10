use futures::{stream, FutureExt, Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use url::Url;

use super::{Event, EventStream, EventTransport};
use crate::error::{PipewatchError, Result};
use crate::session::Token;

/// Socket.IO (Engine.IO v4) client over a plain WebSocket.
///
/// Only what the dashboard needs: authenticate on the default namespace,
/// answer pings, and decode event packets.
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    url: Url,
}

impl SocketIoTransport {
    /// Derive the WebSocket endpoint from the HTTP API base URL.
    pub fn new(base_url: &Url) -> Result<Self> {
        let mut url = base_url.clone();

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(PipewatchError::Config(format!(
                    "Invalid base URL scheme for event channel: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| PipewatchError::Config("Failed to set event channel scheme".into()))?;

        url.set_path(&format!("{}/socket.io/", url.path().trim_end_matches('/')));
        url.set_query(Some("EIO=4&transport=websocket"));

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl EventTransport for SocketIoTransport {
    fn connect(&self, token: Token) -> futures::future::BoxFuture<'static, Result<EventStream>> {
        let url = self.url.clone();
        async move {
            info!("Connecting to event channel: {url}");
            let (mut ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| PipewatchError::Channel(format!("Failed to connect: {e}")))?;

            handshake(&mut ws, &token).await?;
            info!("Event channel connected");

            let events = stream::unfold(Some(ws), |state| async move {
                let mut ws = state?;
                loop {
                    let text = match next_text(&mut ws).await {
                        Ok(Some(text)) => text,
                        Ok(None) => {
                            info!("Event channel closed by server");
                            return None;
                        }
                        Err(e) => {
                            warn!("Event channel error: {e}");
                            return None;
                        }
                    };

                    match decode_frame(&text) {
                        Frame::Ping => {
                            if let Err(e) = ws.send(Message::text("3")).await {
                                warn!("Failed to write to event channel: {e}");
                                return None;
                            }
                        }
                        Frame::Disconnect => {
                            info!("Event channel disconnected by server");
                            return None;
                        }
                        Frame::Event(event) => return Some((event, Some(ws))),
                        _ => debug!("Ignoring frame: {text}"),
                    }
                }
            });

            Ok(events.boxed())
        }
        .boxed()
    }
}

/// Join the default namespace with the credential.
///
/// A `CONNECT_ERROR` means the server refused the credential and maps to
/// [`PipewatchError::Unauthorized`].
async fn handshake<S>(ws: &mut S, token: &Token) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    loop {
        let Some(text) = next_text(ws)
            .await
            .map_err(|e| PipewatchError::Channel(e.to_string()))?
        else {
            return Err(PipewatchError::Channel(
                "Connection closed during handshake".into(),
            ));
        };

        let reply = match decode_frame(&text) {
            Frame::Open => connect_packet(token),
            Frame::Ping => "3".to_string(),
            Frame::Connected => return Ok(()),
            Frame::ConnectError(message) => {
                warn!("Event channel rejected the credential: {message}");
                return Err(PipewatchError::Unauthorized);
            }
            Frame::Disconnect => {
                return Err(PipewatchError::Channel(
                    "Disconnected during handshake".into(),
                ))
            }
            Frame::Event(_) | Frame::Ignored => {
                debug!("Ignoring frame before connect: {text}");
                continue;
            }
        };

        ws.send(Message::text(reply))
            .await
            .map_err(|e| PipewatchError::Channel(format!("Failed to write: {e}")))?;
    }
}

/// Next text frame; `None` once the socket closed.
async fn next_text<S>(ws: &mut S) -> std::result::Result<Option<String>, WsError>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

/// Decoded WebSocket text frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Engine.IO handshake; time to join the namespace.
    Open,
    /// Engine.IO heartbeat; must be answered with a pong.
    Ping,
    /// Namespace join acknowledged.
    Connected,
    ConnectError(String),
    Disconnect,
    Event(Event),
    Ignored,
}

/// Socket.IO namespace connect packet carrying the credential.
pub(crate) fn connect_packet(token: &Token) -> String {
    format!("40{}", json!({ "token": token.as_str() }))
}

pub(crate) fn decode_frame(text: &str) -> Frame {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Frame::Open,
        Some('1') => Frame::Disconnect,
        Some('2') => Frame::Ping,
        Some('4') => decode_packet(chars.as_str()),
        _ => Frame::Ignored,
    }
}

fn decode_packet(packet: &str) -> Frame {
    let Some(kind) = packet.chars().next() else {
        return Frame::Ignored;
    };
    let rest = skip_namespace(&packet[kind.len_utf8()..]);

    match kind {
        '0' => Frame::Connected,
        '1' => Frame::Disconnect,
        '2' => decode_event(rest.trim_start_matches(|c: char| c.is_ascii_digit())),
        '4' => Frame::ConnectError(
            serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| rest.to_string()),
        ),
        _ => Frame::Ignored,
    }
}

/// Drop an explicit `/namespace,` prefix.
fn skip_namespace(packet: &str) -> &str {
    if packet.starts_with('/') {
        packet.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        packet
    }
}

fn decode_event(payload: &str) -> Frame {
    let Ok(Value::Array(args)) = serde_json::from_str::<Value>(payload) else {
        return Frame::Ignored;
    };

    let event = match args.first().and_then(Value::as_str) {
        Some("build_status_update") => Event::BuildStatusUpdate,
        Some("build_finished") => Event::BuildFinished,
        Some("build_log") => Event::BuildLog(log_line(args.get(1))),
        _ => return Frame::Ignored,
    };

    Frame::Event(event)
}

fn log_line(payload: Option<&Value>) -> String {
    match payload {
        Some(Value::String(line)) => line.clone(),
        Some(value @ Value::Object(_)) => ["line", "text", "message"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str))
            .map_or_else(|| value.to_string(), str::to_owned),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one Socket.IO session: open, wait for the join, then send
    /// `frames` in order.
    async fn serve_once(frames: Vec<&'static str>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::text(r#"0{"sid":"x","pingInterval":25000,"pingTimeout":20000}"#))
                .await
                .unwrap();
            let join = ws.next().await.unwrap().unwrap();
            assert!(join.to_text().unwrap().starts_with("40{"));
            for frame in frames {
                ws.send(Message::text(frame)).await.unwrap();
            }
            // Drain pongs until the client hangs up
            while let Some(Ok(_)) = ws.next().await {}
        });

        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[test]
    fn test_socketio_url_from_http_base() {
        let base = Url::parse("http://localhost:5000/").unwrap();
        let transport = SocketIoTransport::new(&base).unwrap();
        assert_eq!(
            transport.url().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_socketio_url_keeps_prefix_and_tls() {
        let base = Url::parse("https://ci.example.com/backend/").unwrap();
        let transport = SocketIoTransport::new(&base).unwrap();
        assert_eq!(
            transport.url().as_str(),
            "wss://ci.example.com/backend/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_connect_packet_carries_token() {
        assert_eq!(connect_packet(&Token::from("abc")), r#"40{"token":"abc"}"#);
    }

    #[test]
    fn test_engine_frames() {
        assert_eq!(decode_frame(r#"0{"sid":"x","pingInterval":25000}"#), Frame::Open);
        assert_eq!(decode_frame("2"), Frame::Ping);
        assert_eq!(decode_frame("1"), Frame::Disconnect);
        assert_eq!(decode_frame(r#"40{"sid":"y"}"#), Frame::Connected);
        assert_eq!(decode_frame("41"), Frame::Disconnect);
        assert_eq!(decode_frame("6"), Frame::Ignored);
        assert_eq!(decode_frame(""), Frame::Ignored);
    }

    #[test]
    fn test_status_events() {
        assert_eq!(
            decode_frame(r#"42["build_status_update",{"pipeline_id":1,"build_id":2,"status":"queued"}]"#),
            Frame::Event(Event::BuildStatusUpdate)
        );
        assert_eq!(
            decode_frame(r#"42["build_finished",{"build_id":2}]"#),
            Frame::Event(Event::BuildFinished)
        );
    }

    #[test]
    fn test_log_events() {
        assert_eq!(
            decode_frame(r#"42["build_log","Step 1: cargo build"]"#),
            Frame::Event(Event::BuildLog("Step 1: cargo build".into()))
        );
        assert_eq!(
            decode_frame(r#"42["build_log",{"text":"compiling"}]"#),
            Frame::Event(Event::BuildLog("compiling".into()))
        );
    }

    #[test]
    fn test_event_with_namespace_and_ack_id() {
        assert_eq!(
            decode_frame(r#"42/builds,17["build_finished"]"#),
            Frame::Event(Event::BuildFinished)
        );
    }

    #[test]
    fn test_unknown_and_malformed_events_are_ignored() {
        assert_eq!(decode_frame(r#"42["report_ready",{}]"#), Frame::Ignored);
        assert_eq!(decode_frame("42not json"), Frame::Ignored);
    }

    #[test]
    fn test_connect_error_message() {
        assert_eq!(
            decode_frame(r#"44{"message":"invalid token"}"#),
            Frame::ConnectError("invalid token".into())
        );
    }

    #[tokio::test]
    async fn test_rejected_credential_is_unauthorized() {
        let base = serve_once(vec![r#"44{"message":"invalid token"}"#]).await;
        let transport = SocketIoTransport::new(&base).unwrap();

        let result = transport.connect(Token::from("stale")).await;
        assert!(matches!(result, Err(PipewatchError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_connected_channel_yields_events() {
        let base = serve_once(vec![
            r#"40{"sid":"y"}"#,
            "2",
            r#"42["build_finished",{"build_id":2}]"#,
            r#"42["build_log","done"]"#,
        ])
        .await;
        let transport = SocketIoTransport::new(&base).unwrap();

        let events: Vec<Event> = transport
            .connect(Token::from("abc"))
            .await
            .unwrap()
            .take(2)
            .collect()
            .await;
        assert_eq!(
            events,
            vec![Event::BuildFinished, Event::BuildLog("done".into())]
        );
    }
}
