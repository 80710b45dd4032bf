//! The WFD handshake state machine.
//!
//! Unusually for RTSP, the *server* initiates requests toward the sink:
//! M1 (OPTIONS), M3 (GET_PARAMETER capability probe), M4 (SET_PARAMETER
//! commit), M5 (SET_PARAMETER trigger) and the M16 keepalive. The sink
//! initiates M2 (its own OPTIONS) plus SETUP/PLAY/PAUSE/TEARDOWN once
//! triggered.
//!
//! The machine is sans-io: it consumes parsed requests/responses and
//! returns [`Action`]s for the session task to execute. At most one
//! source-initiated handshake request is outstanding at a time; the
//! keepalive runs independently and is correlated by its own CSeq.

use wfdcast_protocol::caps::{NegotiatedConfig, SinkCaps, SourceCaps, negotiate};
use wfdcast_protocol::message::{
    ClientRtpPorts, ContentProtection, DisplayEdid, TriggerMethod, VideoFormats, WfdMessage,
};
use wfdcast_protocol::rtsp::{Method, Request, Response, RtspMessage, WFD_FEATURE};

use crate::error::SourceError;
use crate::transport::{DEFAULT_TRANSPORT_MASK, requested_transport};

/// Session timeout announced to the sink, in seconds.
pub const DEFAULT_WFD_TIMEOUT: u64 = 60;

/// The keepalive goes to this literal URI, not the presentation host.
pub const KEEPALIVE_URI: &str = "rtsp://localhost/wfd1.0";

const PUBLIC_METHODS: &str =
    "OPTIONS, PAUSE, PLAY, SETUP, GET_PARAMETER, SET_PARAMETER, TEARDOWN, org.wfa.wfd1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    M1Sent,
    M2Received,
    M3Sent,
    M3Received,
    M4Sent,
    M4Received,
    Ready,
    Setup,
    Playing,
    Paused,
    Teardown,
}

/// What the session must do after feeding a message in.
#[derive(Debug)]
pub enum Action {
    Send(RtspMessage),
    /// Capability intersection succeeded; build the pipeline.
    Negotiated(NegotiatedConfig),
    /// Sink sent PLAY: start RTP, keepalive and stats.
    StartStream,
    /// Sink sent PAUSE or went to standby.
    PauseStream,
    /// Sink sent TEARDOWN.
    Teardown,
    /// A response to the outstanding keepalive arrived.
    KeepaliveAck,
    /// An incoming OPTIONS was answered.
    OptionsRequestDone,
    /// An incoming liveness probe was answered.
    GetParameterRequestDone,
    /// Sink asked for a fresh IDR frame.
    ForceIdr,
}

pub struct Negotiator {
    phase: Phase,
    cseq: u32,
    source_caps: SourceCaps,
    host: String,
    rtsp_session_id: String,
    server_rtp_ports: (u16, u16),
    resolution_override: Option<(u32, u32)>,

    pending_m1: Option<u32>,
    pending_m3: Option<u32>,
    pending_m4: Option<u32>,
    pending_trigger: Option<(u32, TriggerMethod)>,
    pending_m16: Option<u32>,

    m1_done: bool,
    m2_done: bool,
    m3_done: bool,
    m4_done: bool,

    negotiated: Option<NegotiatedConfig>,
}

impl Negotiator {
    pub fn new(
        source_caps: SourceCaps,
        host: impl Into<String>,
        rtsp_session_id: impl Into<String>,
        server_rtp_ports: (u16, u16),
        resolution_override: Option<(u32, u32)>,
    ) -> Self {
        Self {
            phase: Phase::Init,
            cseq: 0,
            source_caps,
            host: host.into(),
            rtsp_session_id: rtsp_session_id.into(),
            server_rtp_ports,
            resolution_override,
            pending_m1: None,
            pending_m3: None,
            pending_m4: None,
            pending_trigger: None,
            pending_m16: None,
            m1_done: false,
            m2_done: false,
            m3_done: false,
            m4_done: false,
            negotiated: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Playing
    }

    /// Keepalive runs from first PLAY until teardown, paused included.
    pub fn keepalive_active(&self) -> bool {
        matches!(self.phase, Phase::Playing | Phase::Paused)
    }

    pub fn negotiated(&self) -> Option<&NegotiatedConfig> {
        self.negotiated.as_ref()
    }

    /// A handshake request is in flight and its answer is overdue-able.
    pub fn pending_step(&self) -> Option<&'static str> {
        if self.pending_m1.is_some() {
            Some("M1")
        } else if self.pending_m3.is_some() {
            Some("M3")
        } else if self.pending_m4.is_some() {
            Some("M4")
        } else if self.pending_trigger.is_some() {
            Some("trigger")
        } else {
            None
        }
    }

    fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// M1: announce the WFD extension. The first bytes on the wire.
    pub fn start(&mut self) -> Request {
        let cseq = self.next_cseq();
        self.pending_m1 = Some(cseq);
        self.phase = Phase::M1Sent;
        Request::new(Method::Options, "*")
            .header("CSeq", cseq.to_string())
            .header("Require", WFD_FEATURE)
    }

    /// M16: empty GET_PARAMETER as liveness probe toward the sink.
    pub fn keepalive_request(&mut self) -> Request {
        let cseq = self.next_cseq();
        self.pending_m16 = Some(cseq);
        Request::new(Method::GetParameter, KEEPALIVE_URI)
            .header("CSeq", cseq.to_string())
            .header("Session", self.rtsp_session_id.clone())
    }

    /// Source-driven trigger: ask the sink to issue PLAY/PAUSE/TEARDOWN
    /// (or SETUP, which the machine sends on its own after M4).
    pub fn trigger_request(&mut self, method: TriggerMethod) -> Request {
        let cseq = self.next_cseq();
        self.pending_trigger = Some((cseq, method));
        let body = WfdMessage {
            trigger_method: Some(method),
            ..Default::default()
        }
        .emit_full();
        Request::new(Method::SetParameter, format!("rtsp://{}/wfd1.0", self.host))
            .header("CSeq", cseq.to_string())
            .header("Content-Type", "text/parameters")
            .body(body)
    }

    fn m3_request(&mut self) -> Request {
        let cseq = self.next_cseq();
        self.pending_m3 = Some(cseq);
        self.phase = Phase::M3Sent;
        // Names-only body: the capabilities the sink must disclose.
        let probe = WfdMessage {
            audio_codecs: Some(Vec::new()),
            video_formats: Some(VideoFormats::default()),
            client_rtp_ports: Some(ClientRtpPorts {
                profile: String::new(),
                port0: 0,
                port1: 0,
                mode: String::new(),
            }),
            display_edid: Some(DisplayEdid::Unavailable),
            content_protection: Some(ContentProtection::NotProtected),
            ..Default::default()
        };
        Request::new(Method::GetParameter, format!("rtsp://{}/wfd1.0", self.host))
            .header("CSeq", cseq.to_string())
            .header("Content-Type", "text/parameters")
            .body(probe.emit_names())
    }

    fn m4_request(&mut self, config: &NegotiatedConfig) -> Request {
        let cseq = self.next_cseq();
        self.pending_m4 = Some(cseq);
        self.phase = Phase::M4Sent;
        Request::new(Method::SetParameter, format!("rtsp://{}/wfd1.0", self.host))
            .header("CSeq", cseq.to_string())
            .header("Content-Type", "text/parameters")
            .body(config.to_message().emit_full())
    }

    /// Feed one incoming request from the sink.
    pub fn handle_request(&mut self, req: &Request) -> Result<Vec<Action>, SourceError> {
        let cseq = req.headers.get("CSeq").unwrap_or("0").to_string();
        match &req.method {
            Method::Options => self.handle_options(req, &cseq),
            Method::GetParameter => {
                // Empty body is a liveness probe; answer 200 OK empty.
                let resp = Response::ok().header("CSeq", cseq);
                Ok(vec![
                    Action::Send(RtspMessage::Response(resp)),
                    Action::GetParameterRequestDone,
                ])
            }
            Method::SetParameter => self.handle_set_parameter(req, &cseq),
            Method::Setup => self.handle_setup(req, &cseq),
            Method::Play => {
                self.phase = Phase::Playing;
                let resp = Response::ok()
                    .header("CSeq", cseq)
                    .header("Session", self.rtsp_session_id.clone())
                    .header("Range", "npt=now-");
                Ok(vec![
                    Action::Send(RtspMessage::Response(resp)),
                    Action::StartStream,
                ])
            }
            Method::Pause => {
                self.phase = Phase::Paused;
                let resp = Response::ok()
                    .header("CSeq", cseq)
                    .header("Session", self.rtsp_session_id.clone());
                Ok(vec![
                    Action::Send(RtspMessage::Response(resp)),
                    Action::PauseStream,
                ])
            }
            Method::Teardown => {
                self.phase = Phase::Teardown;
                let resp = Response::ok()
                    .header("CSeq", cseq)
                    .header("Session", self.rtsp_session_id.clone());
                Ok(vec![
                    Action::Send(RtspMessage::Response(resp)),
                    Action::Teardown,
                ])
            }
            Method::Extension(name) => {
                tracing::debug!(method = %name, "unsupported method from sink");
                let resp = Response::new(501).header("CSeq", cseq);
                Ok(vec![Action::Send(RtspMessage::Response(resp))])
            }
        }
    }

    /// M2: the sink's own OPTIONS. Answer with our method list plus the
    /// WFD extension, echoing the sink's User-Agent.
    fn handle_options(&mut self, req: &Request, cseq: &str) -> Result<Vec<Action>, SourceError> {
        let mut resp = Response::ok()
            .header("CSeq", cseq.to_string())
            .header("Public", PUBLIC_METHODS);
        if let Some(agent) = req.headers.get("User-Agent") {
            resp = resp.header("User-Agent", agent.to_string());
        }
        self.m2_done = true;
        if self.phase == Phase::M1Sent && self.m1_done {
            // M1 answered and M2 handled: move on to the capability probe.
            let m3 = self.m3_request();
            return Ok(vec![
                Action::Send(RtspMessage::Response(resp)),
                Action::OptionsRequestDone,
                Action::Send(RtspMessage::Request(m3)),
            ]);
        }
        if self.phase == Phase::M1Sent {
            self.phase = Phase::M2Received;
        }
        Ok(vec![
            Action::Send(RtspMessage::Response(resp)),
            Action::OptionsRequestDone,
        ])
    }

    fn handle_set_parameter(
        &mut self,
        req: &Request,
        cseq: &str,
    ) -> Result<Vec<Action>, SourceError> {
        let msg = match WfdMessage::parse(&req.body) {
            Ok(msg) => msg,
            Err(e) => {
                // Per-message failure: reject and keep the session alive.
                tracing::warn!("discarding unparseable SET_PARAMETER: {e}");
                let resp = Response::new(400).header("CSeq", cseq.to_string());
                return Ok(vec![Action::Send(RtspMessage::Response(resp))]);
            }
        };
        let mut actions = vec![Action::Send(RtspMessage::Response(
            Response::ok().header("CSeq", cseq.to_string()),
        ))];
        if msg.idr_request {
            actions.push(Action::ForceIdr);
        }
        if msg.standby {
            self.phase = Phase::Paused;
            actions.push(Action::PauseStream);
        }
        Ok(actions)
    }

    fn handle_setup(&mut self, req: &Request, cseq: &str) -> Result<Vec<Action>, SourceError> {
        let Some(transport) = req.headers.get("Transport") else {
            let resp = Response::new(461).header("CSeq", cseq.to_string());
            return Ok(vec![Action::Send(RtspMessage::Response(resp))]);
        };
        if !transport.contains("RTP/AVP")
            || requested_transport(transport) & DEFAULT_TRANSPORT_MASK == 0
        {
            let resp = Response::new(461).header("CSeq", cseq.to_string());
            return Ok(vec![Action::Send(RtspMessage::Response(resp))]);
        }
        if !(self.m3_done && self.m4_done) {
            // Sink jumped the gun: SETUP is only valid once the
            // committed parameters are on its side.
            let resp = Response::new(455).header("CSeq", cseq.to_string());
            return Ok(vec![Action::Send(RtspMessage::Response(resp))]);
        }
        self.phase = Phase::Setup;
        let transport_out = format!(
            "{};server_port={}-{}",
            transport, self.server_rtp_ports.0, self.server_rtp_ports.1
        );
        let resp = Response::ok()
            .header("CSeq", cseq.to_string())
            .header(
                "Session",
                format!("{};timeout={DEFAULT_WFD_TIMEOUT}", self.rtsp_session_id),
            )
            .header("Transport", transport_out);
        Ok(vec![Action::Send(RtspMessage::Response(resp))])
    }

    /// Feed one response from the sink, correlated by CSeq.
    pub fn handle_response(&mut self, resp: &Response) -> Result<Vec<Action>, SourceError> {
        let Some(cseq) = resp.cseq() else {
            tracing::warn!("response without CSeq dropped");
            return Ok(Vec::new());
        };

        if self.pending_m16 == Some(cseq) {
            self.pending_m16 = None;
            // Any answer counts as liveness, success or not.
            return Ok(vec![Action::KeepaliveAck]);
        }

        if self.pending_m1 == Some(cseq) {
            self.pending_m1 = None;
            if !resp.is_success() {
                return Err(SourceError::SinkRejected {
                    step: "M1",
                    status: resp.status,
                });
            }
            self.m1_done = true;
            if self.m2_done {
                let m3 = self.m3_request();
                return Ok(vec![Action::Send(RtspMessage::Request(m3))]);
            }
            return Ok(Vec::new());
        }

        if self.pending_m3 == Some(cseq) {
            self.pending_m3 = None;
            if !resp.is_success() {
                return Err(SourceError::SinkRejected {
                    step: "M3",
                    status: resp.status,
                });
            }
            self.m3_done = true;
            self.phase = Phase::M3Received;
            // A capability body that doesn't parse is fatal: M4 must not
            // be sent from a partial view.
            let msg = WfdMessage::parse(&resp.body)?;
            let sink = SinkCaps::from_message(&msg)?;
            tracing::debug!(
                audio_offers = sink.audio.len(),
                edid_blocks = sink.edid.as_ref().map(|p| p.len() / 128).unwrap_or(0),
                hdcp = sink.hdcp.is_some(),
                "sink capabilities parsed"
            );
            let mut config = negotiate(&self.source_caps, &sink, &self.host)?;
            if let Some((width, height)) = self.resolution_override {
                config.video.width = width;
                config.video.height = height;
            }
            self.negotiated = Some(config.clone());
            let m4 = self.m4_request(&config);
            return Ok(vec![
                Action::Negotiated(config),
                Action::Send(RtspMessage::Request(m4)),
            ]);
        }

        if self.pending_m4 == Some(cseq) {
            self.pending_m4 = None;
            if !resp.is_success() {
                return Err(SourceError::SinkRejected {
                    step: "M4",
                    status: resp.status,
                });
            }
            self.m4_done = true;
            self.phase = Phase::M4Received;
            // M5: ask the sink to SETUP toward us; once it's on the
            // wire we're ready for the inbound half of the handshake.
            let m5 = self.trigger_request(TriggerMethod::Setup);
            self.phase = Phase::Ready;
            return Ok(vec![Action::Send(RtspMessage::Request(m5))]);
        }

        if let Some((id, method)) = self.pending_trigger {
            if id == cseq {
                self.pending_trigger = None;
                if !resp.is_success() {
                    tracing::warn!(
                        status = resp.status,
                        method = method.as_str(),
                        "sink declined trigger"
                    );
                }
                return Ok(Vec::new());
            }
        }

        tracing::debug!(cseq, "response matches no outstanding request");
        Ok(Vec::new())
    }
}
