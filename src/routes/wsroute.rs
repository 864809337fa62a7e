use crate::state::AppState;
use crate::websocket::handlers;
use crate::websocket::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// Outbound frame produced by the connection registry
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundFrame(String);

/// One accepted chat socket
struct WsSession {
    conn: ConnectionId,
    state: AppState,
    last_heartbeat: Instant,
    outbound: Option<UnboundedReceiver<String>>,
    inbound: UnboundedSender<String>,
    inbound_rx: Option<UnboundedReceiver<String>>,
}

impl WsSession {
    fn new(conn: ConnectionId, state: AppState, outbound: UnboundedReceiver<String>) -> Self {
        let (inbound, inbound_rx) = unbounded_channel();
        Self {
            conn,
            state,
            last_heartbeat: Instant::now(),
            outbound: Some(outbound),
            inbound,
            inbound_rx: Some(inbound_rx),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::warn!(connection_id = %act.conn, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.conn, "WebSocket session started");
        self.start_heartbeat(ctx);

        // Bridge the registry's receiver into the actor
        if let Some(mut outbound) = self.outbound.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(frame) = outbound.recv().await {
                    addr.do_send(OutboundFrame(frame));
                }
            });
        }

        // Frames from one socket are handled in arrival order
        if let Some(mut inbound) = self.inbound_rx.take() {
            let state = self.state.clone();
            let conn = self.conn;
            actix::spawn(async move {
                while let Some(text) = inbound.recv().await {
                    handlers::handle_text_frame(&state, conn, &text).await;
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.conn, "WebSocket session stopped");

        let state = self.state.clone();
        let conn = self.conn;
        actix::spawn(async move {
            handlers::connection_closed(&state, conn).await;
        });
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                if self.inbound.send(text.to_string()).is_err() {
                    tracing::warn!(connection_id = %self.conn, "inbound worker gone, closing");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.conn, "binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.conn, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.conn, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let conn = ConnectionId::new();
    let outbound = handlers::connection_opened(&state, conn).await;

    let session = WsSession::new(conn, state.get_ref().clone(), outbound);
    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // Upgrade failed; the session actor never ran
            handlers::connection_closed(&state, conn).await;
            Err(e)
        }
    }
}
