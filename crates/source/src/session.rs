//! Per-sink session: owns the control connection, drives the handshake
//! machine, holds the pipeline, and runs the keepalive and stats timers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use uuid::Uuid;

use wfdcast_protocol::message::TriggerMethod;
use wfdcast_protocol::rtsp::RtspMessage;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::negotiation::{Action, DEFAULT_WFD_TIMEOUT, Negotiator};
use crate::pipeline::Pipeline;
use crate::ports::PortPool;
use crate::transport::RtspConnection;

/// The keepalive fires this long before the session timeout would hit.
const KEEPALIVE_HEADROOM: u64 = 5;
/// How long the sink has to answer an M16.
const KEEPALIVE_RESPONSE_BUDGET: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(2);
/// Budget for the sink to answer any handshake request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(DEFAULT_WFD_TIMEOUT);

/// Control requests from outside the session task.
pub enum SessionCommand {
    /// Ask the sink to issue PLAY/PAUSE/TEARDOWN toward us.
    Trigger(TriggerMethod),
    /// Splice a file into the running stream.
    DirectStream {
        uri: String,
        done: oneshot::Sender<Result<(), SourceError>>,
    },
    /// Politely end the session via a TEARDOWN trigger.
    Teardown,
}

/// Typed observer hooks, all optional.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_options_request: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_get_parameter_request: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_keepalive_fail: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_playing_done: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_direct_stream_end: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Cheap handle for steering a running session.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn trigger(&self, method: TriggerMethod) {
        let _ = self.cmd_tx.send(SessionCommand::Trigger(method)).await;
    }

    /// Resolves when the hot-swap has fully engaged (or failed without
    /// touching the live stream).
    pub async fn direct_stream(&self, uri: &str) -> Result<(), SourceError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::DirectStream {
                uri: uri.to_string(),
                done,
            })
            .await
            .map_err(|_| SourceError::SwapAborted("session is gone".to_string()))?;
        rx.await
            .map_err(|_| SourceError::SwapAborted("session ended mid-swap".to_string()))?
    }

    pub async fn teardown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Teardown).await;
    }
}

enum Step {
    Incoming(RtspMessage),
    Command(Option<SessionCommand>),
    KeepaliveTick,
    KeepaliveCheck,
    StatsTick,
    RequestTimeout,
}

pub struct Session<S> {
    id: Uuid,
    conn: RtspConnection<S>,
    negotiator: Negotiator,
    config: Arc<SourceConfig>,
    ports: Arc<PortPool>,
    callbacks: SessionCallbacks,
    pipeline: Option<Pipeline>,
    /// Guards only the keepalive response flag.
    keepalive_flag: Arc<Mutex<bool>>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    /// Keeps the command channel open even if every handle is dropped.
    _cmd_tx: mpsc::Sender<SessionCommand>,
    sink_host: String,
    server_ports: (u16, u16),
    request_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    torn_down: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(
        stream: S,
        sink_host: String,
        local_host: String,
        config: Arc<SourceConfig>,
        ports: Arc<PortPool>,
        callbacks: SessionCallbacks,
    ) -> Result<(Session<S>, SessionHandle), SourceError> {
        let id = Uuid::new_v4();
        let server_ports = ports.allocate_pair().ok_or_else(|| {
            SourceError::BuildFailed(anyhow::anyhow!("server RTP port range exhausted"))
        })?;
        let host = if config.host_address.is_empty() {
            local_host
        } else {
            config.host_address.clone()
        };
        let negotiator = Negotiator::new(
            config.source_caps(),
            host,
            generate_rtsp_session_id(),
            server_ports,
            config.negotiated_resolution.map(|r| (r.width, r.height)),
        );
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let handle = SessionHandle {
            id,
            cmd_tx: cmd_tx.clone(),
        };
        let session = Session {
            id,
            conn: RtspConnection::new(stream),
            negotiator,
            config,
            ports,
            callbacks,
            pipeline: None,
            keepalive_flag: Arc::new(Mutex::new(false)),
            cmd_rx,
            _cmd_tx: cmd_tx,
            sink_host,
            server_ports,
            request_deadline: None,
            keepalive_deadline: None,
            torn_down: false,
        };
        Ok((session, handle))
    }

    /// Run the session to completion. Teardown always happens, whatever
    /// the outcome.
    pub async fn run(mut self) -> Result<(), SourceError> {
        tracing::info!(session_id = %self.id, sink = %self.sink_host, "session started");
        let result = self.drive().await;
        match &result {
            Ok(()) => tracing::info!(session_id = %self.id, "session closed"),
            Err(e) => tracing::warn!(session_id = %self.id, "session failed: {e}"),
        }
        self.teardown();
        result
    }

    async fn drive(&mut self) -> Result<(), SourceError> {
        let m1 = self.negotiator.start();
        self.request_deadline = Some(Instant::now() + REQUEST_TIMEOUT);
        self.conn.send(&RtspMessage::Request(m1)).await?;

        let keepalive_period = Duration::from_secs(DEFAULT_WFD_TIMEOUT - KEEPALIVE_HEADROOM);
        let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats_tick = interval_at(Instant::now() + STATS_INTERVAL, STATS_INTERVAL);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let keepalive_deadline = self.keepalive_deadline;
            let request_deadline = self.request_deadline;
            let step = tokio::select! {
                msg = self.conn.recv() => Step::Incoming(msg?),
                cmd = self.cmd_rx.recv() => Step::Command(cmd),
                _ = keepalive.tick(), if self.negotiator.keepalive_active() => Step::KeepaliveTick,
                _ = maybe_deadline(keepalive_deadline) => Step::KeepaliveCheck,
                _ = maybe_deadline(request_deadline) => Step::RequestTimeout,
                _ = stats_tick.tick(), if self.pipeline.is_some() && self.negotiator.is_streaming() => {
                    Step::StatsTick
                }
            };

            match step {
                Step::Incoming(msg) => {
                    if self.handle_message(msg).await? {
                        return Ok(());
                    }
                }
                Step::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await? {
                        return Ok(());
                    }
                }
                Step::Command(None) => {}
                Step::KeepaliveTick => {
                    let m16 = self.negotiator.keepalive_request();
                    *self.keepalive_flag.lock().unwrap_or_else(|e| e.into_inner()) = false;
                    self.keepalive_deadline = Some(Instant::now() + KEEPALIVE_RESPONSE_BUDGET);
                    self.conn.send(&RtspMessage::Request(m16)).await?;
                }
                Step::KeepaliveCheck => {
                    self.keepalive_deadline = None;
                    let alive = *self.keepalive_flag.lock().unwrap_or_else(|e| e.into_inner());
                    if !alive {
                        if let Some(cb) = &self.callbacks.on_keepalive_fail {
                            cb();
                        }
                        return Err(SourceError::KeepaliveTimeout);
                    }
                }
                Step::StatsTick => {
                    if let Some(pipeline) = &self.pipeline {
                        if pipeline.has_error() {
                            return Err(SourceError::Pipeline(
                                "media pipeline reported an error".to_string(),
                            ));
                        }
                        pipeline.sample_stats();
                    }
                }
                Step::RequestTimeout => {
                    let step = self.negotiator.pending_step().unwrap_or("request");
                    return Err(SourceError::RequestTimeout {
                        step,
                        timeout: REQUEST_TIMEOUT,
                    });
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: RtspMessage) -> Result<bool, SourceError> {
        let actions = match &msg {
            RtspMessage::Request(req) => self.negotiator.handle_request(req)?,
            RtspMessage::Response(resp) => self.negotiator.handle_response(resp)?,
        };
        self.apply_actions(actions).await
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Result<bool, SourceError> {
        match cmd {
            SessionCommand::Trigger(method) => {
                let req = self.negotiator.trigger_request(method);
                self.request_deadline = Some(Instant::now() + REQUEST_TIMEOUT);
                self.conn.send(&RtspMessage::Request(req)).await?;
            }
            SessionCommand::DirectStream { uri, done } => {
                let result = match &self.pipeline {
                    Some(pipeline) => pipeline.start_direct_stream(&uri).await,
                    None => Err(SourceError::SwapAborted(
                        "no pipeline is running".to_string(),
                    )),
                };
                // Direct-streaming errors go back to the caller; the
                // live session continues either way.
                if let Err(e) = &result {
                    tracing::warn!(session_id = %self.id, "direct stream failed: {e}");
                }
                let _ = done.send(result);
            }
            SessionCommand::Teardown => {
                let req = self.negotiator.trigger_request(TriggerMethod::Teardown);
                self.request_deadline = Some(Instant::now() + REQUEST_TIMEOUT);
                self.conn.send(&RtspMessage::Request(req)).await?;
            }
        }
        Ok(false)
    }

    /// Execute what the state machine asked for. Returns true when the
    /// session is over.
    async fn apply_actions(&mut self, actions: Vec<Action>) -> Result<bool, SourceError> {
        let mut done = false;
        for action in actions {
            match action {
                Action::Send(msg) => {
                    if matches!(&msg, RtspMessage::Request(_)) {
                        self.request_deadline = Some(Instant::now() + REQUEST_TIMEOUT);
                    }
                    self.conn.send(&msg).await?;
                }
                Action::Negotiated(config) => {
                    tracing::info!(
                        session_id = %self.id,
                        audio = config.audio.format.as_str(),
                        width = config.video.width,
                        height = config.video.height,
                        framerate = config.video.framerate,
                        rtp_port = config.rtp_port0,
                        "capabilities negotiated"
                    );
                    let pipeline = Pipeline::build(
                        &self.config,
                        &config,
                        &self.sink_host,
                        self.server_ports,
                    )?;
                    if let Some(cb) = &self.callbacks.on_direct_stream_end {
                        pipeline.set_direct_stream_end_handler(Arc::clone(cb));
                    }
                    self.pipeline = Some(pipeline);
                }
                Action::StartStream => {
                    let Some(pipeline) = &self.pipeline else {
                        return Err(SourceError::Pipeline(
                            "sink sent PLAY before negotiation finished".to_string(),
                        ));
                    };
                    pipeline.play()?;
                    if let Some(cb) = &self.callbacks.on_playing_done {
                        cb();
                    }
                }
                Action::PauseStream => {
                    if let Some(pipeline) = &self.pipeline {
                        pipeline.pause()?;
                    }
                }
                Action::Teardown => done = true,
                Action::KeepaliveAck => {
                    *self.keepalive_flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
                    self.keepalive_deadline = None;
                }
                Action::OptionsRequestDone => {
                    if let Some(cb) = &self.callbacks.on_options_request {
                        cb();
                    }
                }
                Action::GetParameterRequestDone => {
                    if let Some(cb) = &self.callbacks.on_get_parameter_request {
                        cb();
                    }
                }
                Action::ForceIdr => {
                    if let Some(pipeline) = &self.pipeline {
                        pipeline.force_idr();
                    }
                }
            }
        }
        if self.negotiator.pending_step().is_none() {
            self.request_deadline = None;
        }
        Ok(done)
    }

    /// Idempotent, fixed order: pipeline first, then timers, then the
    /// port pair; the connection closes when the session drops.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(config) = self.negotiator.negotiated() {
            tracing::debug!(url = %config.presentation_url, "releasing negotiated stream");
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        self.keepalive_deadline = None;
        self.request_deadline = None;
        self.ports.release_pair(self.server_ports.0);
        tracing::info!(
            session_id = %self.id,
            phase = ?self.negotiator.phase(),
            "session torn down"
        );
    }
}

async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t).await,
        None => std::future::pending().await,
    }
}

/// Random hex token for the RTSP Session header.
fn generate_rtsp_session_id() -> String {
    use std::fmt::Write as _;
    use std::io::Read;
    let mut bytes = [0u8; 8];
    if let Ok(f) = std::fs::File::open("/dev/urandom")
        && (&f).read_exact(&mut bytes).is_ok()
    {
        let mut hex = String::with_capacity(16);
        for b in &bytes {
            let _ = write!(hex, "{b:02X}");
        }
        return hex;
    }
    Uuid::new_v4().simple().to_string()[..16].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfdcast_protocol::rtsp::{Method, Request, Response};

    fn test_session(
        stream: tokio::io::DuplexStream,
    ) -> (Session<tokio::io::DuplexStream>, SessionHandle) {
        Session::new(
            stream,
            "192.0.2.2".to_string(),
            "192.0.2.1".to_string(),
            Arc::new(SourceConfig::default()),
            Arc::new(PortPool::default()),
            SessionCallbacks::default(),
        )
        .unwrap()
    }

    #[test]
    fn session_ids_are_hex_and_unique() {
        let a = generate_rtsp_session_id();
        let b = generate_rtsp_session_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn handshake_reaches_capability_probe() {
        let (source_end, sink_end) = tokio::io::duplex(16 * 1024);
        let (session, _handle) = test_session(source_end);
        let task = tokio::spawn(session.run());
        let mut sink = RtspConnection::new(sink_end);

        // M1 arrives first
        let m1 = match sink.recv().await.unwrap() {
            RtspMessage::Request(req) => req,
            other => panic!("expected M1 request, got {other:?}"),
        };
        assert_eq!(m1.method, Method::Options);
        assert_eq!(m1.uri, "*");
        assert_eq!(m1.headers.get("Require"), Some("org.wfa.wfd1.0"));
        sink.send(&RtspMessage::Response(
            Response::ok().header("CSeq", m1.cseq().unwrap().to_string()),
        ))
        .await
        .unwrap();

        // M2: our own OPTIONS
        let m2 = Request::new(Method::Options, "*")
            .header("CSeq", "1")
            .header("User-Agent", "SinkX/1.0");
        sink.send(&RtspMessage::Request(m2)).await.unwrap();
        let m2_reply = match sink.recv().await.unwrap() {
            RtspMessage::Response(resp) => resp,
            other => panic!("expected M2 reply, got {other:?}"),
        };
        assert_eq!(m2_reply.status, 200);
        assert_eq!(m2_reply.headers.get("User-Agent"), Some("SinkX/1.0"));

        // M3: capability probe with the five parameter names
        let m3 = match sink.recv().await.unwrap() {
            RtspMessage::Request(req) => req,
            other => panic!("expected M3 request, got {other:?}"),
        };
        assert_eq!(m3.method, Method::GetParameter);
        let body = String::from_utf8(m3.body).unwrap();
        assert!(body.contains("wfd_audio_codecs\r\n"));
        assert!(body.contains("wfd_video_formats\r\n"));
        assert!(body.contains("wfd_client_rtp_ports\r\n"));
        assert!(body.contains("wfd_display_edid\r\n"));
        assert!(body.contains("wfd_content_protection\r\n"));

        // Dropping the connection fails the session with a transport error
        drop(sink);
        match task.await.unwrap() {
            Err(SourceError::Transport(_)) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn liveness_probe_answered_any_time() {
        let (source_end, sink_end) = tokio::io::duplex(16 * 1024);
        let (session, _handle) = test_session(source_end);
        let task = tokio::spawn(session.run());
        let mut sink = RtspConnection::new(sink_end);

        let _m1 = sink.recv().await.unwrap();
        let probe = Request::new(Method::GetParameter, "rtsp://192.0.2.1/wfd1.0")
            .header("CSeq", "77");
        sink.send(&RtspMessage::Request(probe)).await.unwrap();
        let reply = match sink.recv().await.unwrap() {
            RtspMessage::Response(resp) => resp,
            other => panic!("expected reply, got {other:?}"),
        };
        assert_eq!(reply.status, 200);
        assert!(reply.body.is_empty());

        drop(sink);
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn sink_teardown_closes_the_session_cleanly() {
        let (source_end, sink_end) = tokio::io::duplex(16 * 1024);
        let (session, _handle) = test_session(source_end);
        let task = tokio::spawn(session.run());
        let mut sink = RtspConnection::new(sink_end);

        let _m1 = sink.recv().await.unwrap();
        let teardown = Request::new(Method::Teardown, "rtsp://192.0.2.1/wfd1.0/streamid=0")
            .header("CSeq", "50");
        sink.send(&RtspMessage::Request(teardown)).await.unwrap();
        let reply = match sink.recv().await.unwrap() {
            RtspMessage::Response(resp) => resp,
            other => panic!("expected reply, got {other:?}"),
        };
        assert_eq!(reply.status, 200);

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn source_teardown_command_triggers_the_sink() {
        let (source_end, sink_end) = tokio::io::duplex(16 * 1024);
        let (session, handle) = test_session(source_end);
        let task = tokio::spawn(session.run());
        let mut sink = RtspConnection::new(sink_end);

        let _m1 = sink.recv().await.unwrap();
        handle.teardown().await;

        let trigger = match sink.recv().await.unwrap() {
            RtspMessage::Request(req) => req,
            other => panic!("expected trigger request, got {other:?}"),
        };
        assert_eq!(trigger.method, Method::SetParameter);
        assert_eq!(trigger.body, b"wfd_trigger_method: TEARDOWN\r\n");
        sink.send(&RtspMessage::Response(
            Response::ok().header("CSeq", trigger.cseq().unwrap().to_string()),
        ))
        .await
        .unwrap();

        // The sink then performs the TEARDOWN it was asked for
        let teardown = Request::new(Method::Teardown, "rtsp://192.0.2.1/wfd1.0/streamid=0")
            .header("CSeq", "51");
        sink.send(&RtspMessage::Request(teardown)).await.unwrap();
        let reply = match sink.recv().await.unwrap() {
            RtspMessage::Response(resp) => resp,
            other => panic!("expected reply, got {other:?}"),
        };
        assert_eq!(reply.status, 200);

        assert!(task.await.unwrap().is_ok());
    }
}
