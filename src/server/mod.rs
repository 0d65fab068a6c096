//! WebSocket front end: one long-lived session per client.
//!
//! Each session reads a frame, waits for its result, replies, and only then
//! reads the next message, so replies come back in request order. Frame work
//! runs on the blocking pool, capped by `inference_workers`.

pub mod processor;
pub mod protocol;
pub mod registry;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Semaphore, mpsc},
};
use tokio_tungstenite::tungstenite::{
    Error as WsError, Message,
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    pipeline::{
        compositor::{MAX_STROKE_THICKNESS, SketchState},
        decode::Payload,
    },
};

use self::{
    processor::{FrameError, FrameOptions, FrameProcessor},
    protocol::{ControlMessage, Inbound, ServerMessage, parse_text},
    registry::{OUTBOUND_CAPACITY, RegistryError, SessionId, SessionRegistry, SharedSketch},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything a connection needs, shared across sessions.
pub struct AppContext {
    config: Config,
    processor: Arc<FrameProcessor>,
    registry: SessionRegistry,
    workers: Arc<Semaphore>,
}

impl AppContext {
    pub fn new(config: Config, processor: FrameProcessor) -> Arc<Self> {
        let registry = SessionRegistry::new(config.canvas.clone());
        let workers = Arc::new(Semaphore::new(config.server.inference_workers));
        Arc::new(Self {
            config,
            processor: Arc::new(processor),
            registry,
            workers,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

pub async fn run_server(ctx: Arc<AppContext>, cancel: CancellationToken) -> Result<()> {
    let addr = ctx.config.server.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!(
        "listening on ws://{}{} ({} mode by default)",
        listener.local_addr()?,
        ctx.config.server.path,
        ctx.config.server.default_mode.label()
    );
    serve(listener, ctx, cancel).await
}

/// Accepts until `cancel` fires, then tells every session to go away and
/// waits briefly for them to drain.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>, cancel: CancellationToken) -> Result<()> {
    let sessions = CancellationToken::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        log::warn!("accept failed: {err}");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                let session_cancel = sessions.child_token();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, peer, ctx, session_cancel).await {
                        log::warn!("connection from {peer} failed: {err:#}");
                    }
                });
            }
        }
    }

    let notified = ctx.registry.broadcast(ServerMessage::Shutdown.to_ws()).await;
    log::info!("shutting down, notified {notified} session(s)");
    sessions.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while ctx.registry.len().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        log::warn!(
            "{} session(s) still open after {SHUTDOWN_GRACE:?}",
            ctx.registry.len().await
        );
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<AppContext>,
    cancel: CancellationToken,
) -> Result<()> {
    let expected_path = ctx.config.server.path.clone();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == expected_path {
            return Ok(resp);
        }
        let mut err = ErrorResponse::new(Some(format!("no socket at {}", req.uri().path())));
        *err.status_mut() = StatusCode::NOT_FOUND;
        Err(err)
    })
    .await
    .context("websocket handshake failed")?;

    let (mut sink, inbound) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = sink.send(message).await {
                log::debug!("socket write failed: {err}");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let registry = ctx.registry();
    let id = registry.register(outbound).await;
    log::info!(
        "session {id} connected from {peer} ({} active)",
        registry.len().await
    );

    run_session(&ctx, id, inbound, cancel).await;

    registry.deregister(id).await;
    let _ = writer.await;
    log::info!("session {id} closed ({} active)", registry.len().await);
    Ok(())
}

/// Drives one registered session until the client leaves or `cancel` fires.
pub async fn run_session<S>(ctx: &AppContext, id: SessionId, mut inbound: S, cancel: CancellationToken)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let Some(sketch) = ctx.registry.sketch(id).await else {
        log::warn!("session {id} has no sketch, dropping it");
        return;
    };
    let mut options = FrameOptions {
        mode: ctx.config.server.default_mode,
        annotate: ctx.config.server.annotate,
    };

    let hello = ServerMessage::Hello {
        mode: options.mode,
        canvas: [ctx.config.canvas.width, ctx.config.canvas.height],
    };
    if reply(ctx, id, hello).await.is_err() {
        return;
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };

        let responses = match next {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(err)) => {
                log::debug!("session {id}: read failed: {err}");
                break;
            }
            Some(Ok(Message::Binary(bytes))) => {
                process_frame(ctx, id, Payload::Binary(bytes.to_vec()), options, &sketch).await
            }
            Some(Ok(Message::Text(text))) => match parse_text(text.as_str()) {
                Inbound::Frame(payload) => process_frame(ctx, id, payload, options, &sketch).await,
                Inbound::Control(control) => vec![apply_control(id, &mut options, &sketch, control)],
                Inbound::Invalid(reason) => {
                    log::debug!("session {id}: {reason}");
                    vec![ServerMessage::failed(reason)]
                }
            },
            Some(Ok(_)) => continue,
        };

        for response in responses {
            // Blocks while the client's queue is full, which stops this
            // session from reading further frames.
            if reply(ctx, id, response).await.is_err() {
                return;
            }
        }
    }
}

async fn reply(ctx: &AppContext, id: SessionId, message: ServerMessage) -> Result<(), RegistryError> {
    ctx.registry.send(id, message.to_ws()).await.inspect_err(|err| {
        log::debug!("session {id}: {err}");
    })
}

async fn process_frame(
    ctx: &AppContext,
    id: SessionId,
    payload: Payload,
    options: FrameOptions,
    sketch: &SharedSketch,
) -> Vec<ServerMessage> {
    let Ok(permit) = ctx.workers.clone().acquire_owned().await else {
        return vec![ServerMessage::failed("worker pool closed")];
    };
    let processor = ctx.processor.clone();
    let sketch = sketch.clone();

    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        processor.process(&payload, options, &sketch)
    })
    .await
    .unwrap_or_else(|err| Err(FrameError::WorkerFailed(err.to_string())));

    match result {
        Ok(processed) => processed.into_messages(),
        Err(err) => {
            log::warn!("session {id}: frame failed: {err}");
            vec![ServerMessage::failed(err.to_string())]
        }
    }
}

fn apply_control(
    id: SessionId,
    options: &mut FrameOptions,
    sketch: &Mutex<SketchState>,
    control: ControlMessage,
) -> ServerMessage {
    let action = control.action();
    let mut sketch = sketch.lock().unwrap_or_else(PoisonError::into_inner);

    match control {
        ControlMessage::SetMode { mode: next } => {
            if options.mode != next {
                log::info!("session {id}: {} -> {} mode", options.mode.label(), next.label());
                sketch.reset_stroke();
                options.mode = next;
            }
        }
        ControlMessage::SetThickness { thickness } if !(1..=MAX_STROKE_THICKNESS).contains(&thickness) => {
            return ServerMessage::failed(format!(
                "thickness must be between 1 and {MAX_STROKE_THICKNESS}, got {thickness}"
            ));
        }
        ControlMessage::SetColor { color } => {
            sketch.set_color(color);
            log::debug!("session {id}: brush {:?} at {}px", sketch.color().0, sketch.thickness());
        }
        ControlMessage::SetThickness { thickness } => {
            sketch.set_thickness(thickness);
            log::debug!("session {id}: brush {:?} at {}px", sketch.color().0, sketch.thickness());
        }
        ControlMessage::SetAnnotate { enabled } => options.annotate = enabled,
        ControlMessage::ResetStroke => sketch.reset_stroke(),
        ControlMessage::Clear => sketch.clear(),
        ControlMessage::Snapshot => {
            return match sketch.encode_png() {
                Ok(png) => ServerMessage::canvas(&png),
                Err(err) => ServerMessage::failed(format!("{err:#}")),
            };
        }
    }
    ServerMessage::Ack { action }
}
