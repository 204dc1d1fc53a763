//! # WebSocket Frame Streaming
//!
//! Push transport for a session created over HTTP. Clients connect to
//! `/ws/streams/{id}` and the server sends one binary message per output frame.
//!
//! ## Protocol:
//! 1. **Connection**: the session must exist and not be streaming yet; it
//!    moves to `streaming`. A second connection gets `session_busy` and is
//!    closed without touching the session
//! 2. **Ready**: server sends a JSON `ready` message with the frame geometry
//! 3. **Frames**: every `1 / fps` seconds, one binary message (see below)
//! 4. **Audio**: inbound binary messages are audio chunks for the driver
//! 5. **Close**: disconnecting tears the session down
//!
//! ## Frame Message Layout (little-endian):
//! ```text
//! pts: u64 | width: u32 | height: u32 | flags: u8 | rgb24 pixels
//! ```
//! `flags` bit 0 is set while speaking, bit 1 when a transformer produced the frame.

use crate::avatar::driver::OutputFrame;
use crate::avatar::feed::PushOutcome;
use crate::avatar::session::{AvatarSession, SessionState};
use crate::handlers::streams::find_session;
use crate::state::AppState;
use crate::video::frame::ChannelOrder;
use crate::video::source::FrameSource;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub const FRAME_HEADER_LEN: usize = 17;
pub const FLAG_SPEAKING: u8 = 0b01;
pub const FLAG_TRANSFORMED: u8 = 0b10;

/// JSON messages sent by the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<u64>,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

/// JSON messages sent by the server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready {
        session_id: String,
        width: u32,
        height: u32,
        fps: u32,
        channel_order: ChannelOrder,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: Option<u64>,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Serialize a frame into one binary WebSocket message.
pub fn encode_frame(output: &OutputFrame) -> Vec<u8> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    LittleEndian::write_u64(&mut header[0..8], output.pts);
    LittleEndian::write_u32(&mut header[8..12], output.frame.width());
    LittleEndian::write_u32(&mut header[12..16], output.frame.height());
    header[16] = frame_flags(output);

    let pixels = output.frame.data();
    let mut message = Vec::with_capacity(FRAME_HEADER_LEN + pixels.len());
    message.extend_from_slice(&header);
    message.extend_from_slice(pixels);
    message
}

fn frame_flags(output: &OutputFrame) -> u8 {
    let mut flags = 0;
    if output.speaking {
        flags |= FLAG_SPEAKING;
    }
    if output.transformed {
        flags |= FLAG_TRANSFORMED;
    }
    flags
}

/// WebSocket actor bound to one avatar session.
pub struct AvatarStreamSocket {
    state: web::Data<AppState>,
    session: Arc<AvatarSession>,
    last_heartbeat: Instant,
    /// This socket owns the session's frame clock.
    attached: bool,
    /// A tick is being produced; the next interval waits for it instead of
    /// racing it, so frames leave in pts order.
    tick_in_flight: bool,
    frames_sent: u64,
    ticks_skipped: u64,
}

impl AvatarStreamSocket {
    pub fn new(state: web::Data<AppState>, session: Arc<AvatarSession>) -> Self {
        Self {
            state,
            session,
            last_heartbeat: Instant::now(),
            attached: false,
            tick_in_flight: false,
            frames_sent: 0,
            ticks_skipped: 0,
        }
    }

    fn send_json(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session.id, error = %err, "Failed to encode WebSocket message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(session_id = %self.session.id, code, "WebSocket error: {}", message);
        self.send_json(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn tick(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.session.state() == SessionState::Closed {
            info!(session_id = %self.session.id, "Session closed, ending stream");
            ctx.stop();
            return;
        }
        if self.tick_in_flight {
            self.ticks_skipped += 1;
            debug!(session_id = %self.session.id, skipped = self.ticks_skipped, "Previous tick still running");
            return;
        }

        self.tick_in_flight = true;
        let driver = Arc::clone(&self.session.driver);
        let produce = async move { driver.produce_frame().await };

        ctx.spawn(produce.into_actor(self).map(|output, act, ctx| {
            act.tick_in_flight = false;
            ctx.binary(encode_frame(&output));
            act.frames_sent += 1;
        }));
    }

    fn handle_audio(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if self.session.driver.add_audio(chunk) == PushOutcome::Dropped {
            debug!(
                session_id = %self.session.id,
                dropped = self.session.driver.audio_dropped(),
                "Audio chunk dropped"
            );
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping { timestamp }) => {
                self.last_heartbeat = Instant::now();
                self.send_json(ctx, &ServerMessage::Pong { timestamp });
            }
            Ok(ClientMessage::Pong { .. }) => {
                self.last_heartbeat = Instant::now();
            }
            Err(err) => {
                self.send_error(ctx, "invalid_message", &format!("Invalid JSON: {}", err));
            }
        }
    }
}

impl Actor for AvatarStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        match self.session.start_streaming() {
            Ok(()) => self.attached = true,
            Err(SessionState::Streaming) => {
                self.send_error(ctx, "session_busy", "Session is already streaming");
                ctx.stop();
                return;
            }
            Err(_) => {
                self.send_error(ctx, "session_closed", "Session is already closed");
                ctx.stop();
                return;
            }
        }

        let config = self.session.driver.config().clone();
        let canvas = self.session.store.canvas();
        info!(session_id = %self.session.id, fps = config.fps, "WebSocket stream started");

        self.send_json(
            ctx,
            &ServerMessage::Ready {
                session_id: self.session.id.clone(),
                width: canvas.width,
                height: canvas.height,
                fps: config.fps,
                channel_order: ChannelOrder::Rgb24,
            },
        );

        ctx.run_interval(config.frame_interval(), |act, ctx| act.tick(ctx));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
            act.send_json(ctx, &ServerMessage::Ping { timestamp });
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            session_id = %self.session.id,
            frames_sent = self.frames_sent,
            ticks_skipped = self.ticks_skipped,
            "WebSocket stream stopped"
        );
        if self.attached {
            self.state.close_session(&self.session.id);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AvatarStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio(&data);
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// GET /ws/streams/{id}
///
/// Upgrades to a WebSocket streaming the session's frames. Unknown sessions get
/// a 404 before the upgrade.
pub async fn avatar_stream(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let session = find_session(&state, &path.into_inner())?;
    info!(
        session_id = %session.id,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket stream request"
    );

    ws::start(AvatarStreamSocket::new(state, session), &req, stream)
}
