//! WFD capability and parameter-line codec.
//!
//! Wi-Fi Display carries capability documents as plain text lines inside
//! GET_PARAMETER / SET_PARAMETER bodies:
//!
//! ```text
//! wfd_audio_codecs: LPCM 00000002 00, AAC 00000001 00\r\n
//! wfd_video_formats: 30 00 01 01 00000040 00000000 00000000 00 0000 0000 00 none none\r\n
//! wfd_client_rtp_ports: RTP/AVP/UDP;unicast 19000 0 mode=play\r\n
//! ```
//!
//! Numeric tokens are zero-padded hex without a `0x` prefix, except RTP
//! ports which are decimal. Two serializations exist: a names-only form
//! (the capability probe body, bare keys) and a full-value form. Unknown
//! keys are skipped on parse so newer sinks don't break older sources.

use std::fmt::Write as _;

use thiserror::Error;

pub const KEY_AUDIO_CODECS: &str = "wfd_audio_codecs";
pub const KEY_VIDEO_FORMATS: &str = "wfd_video_formats";
pub const KEY_CONTENT_PROTECTION: &str = "wfd_content_protection";
pub const KEY_DISPLAY_EDID: &str = "wfd_display_edid";
pub const KEY_COUPLED_SINK: &str = "wfd_coupled_sink";
pub const KEY_TRIGGER_METHOD: &str = "wfd_trigger_method";
pub const KEY_PRESENTATION_URL: &str = "wfd_presentation_URL";
pub const KEY_CLIENT_RTP_PORTS: &str = "wfd_client_rtp_ports";
pub const KEY_ROUTE: &str = "wfd_route";
pub const KEY_I2C: &str = "wfd_I2C";
pub const KEY_AV_FORMAT_CHANGE_TIMING: &str = "wfd_av_format_change_timing";
pub const KEY_PREFERRED_DISPLAY_MODE: &str = "wfd_preferred_display_mode";
pub const KEY_STANDBY_RESUME_CAPABILITY: &str = "wfd_standby_resume_capability";
pub const KEY_STANDBY: &str = "wfd_standby";
pub const KEY_CONNECTOR_TYPE: &str = "wfd_connector_type";
pub const KEY_IDR_REQUEST: &str = "wfd_idr_request";

/// EDID blocks are 128 bytes each; at most 256 may be announced.
pub const EDID_BLOCK_SIZE: usize = 128;
pub const EDID_MAX_BLOCKS: usize = 256;

#[derive(Debug, Error)]
pub enum MessageError {
    /// A non-empty line had neither a `key: value` shape nor a known
    /// bare-flag key.
    #[error("malformed parameter line: {0:?}")]
    MalformedHeader(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Lpcm,
    Aac,
    Ac3,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Lpcm => "LPCM",
            AudioFormat::Aac => "AAC",
            AudioFormat::Ac3 => "AC3",
        }
    }

    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "LPCM" => Some(AudioFormat::Lpcm),
            "AAC" => Some(AudioFormat::Aac),
            "AC3" => Some(AudioFormat::Ac3),
            _ => None,
        }
    }

    /// Position of this format in the 8-bit codec bitmap.
    pub fn bit(self) -> u8 {
        match self {
            AudioFormat::Lpcm => 1 << 0,
            AudioFormat::Aac => 1 << 1,
            AudioFormat::Ac3 => 1 << 2,
        }
    }
}

/// One entry of `wfd_audio_codecs`.
///
/// `modes` is format dependent: LPCM uses a sampling-frequency bitmap,
/// AAC and AC3 use a channel-layout bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCodec {
    pub format: AudioFormat,
    pub modes: u32,
    pub latency: u8,
}

/// The single H.264 descriptor of `wfd_video_formats`.
///
/// `native` packs a 3-bit resolution-family tag (0 = CEA, 1 = VESA,
/// 2 = handheld) in its low bits and a 5-bit index above them; the index
/// names the `1 << index` bit of that family's resolution bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoFormats {
    pub native: u8,
    pub preferred_display_mode: u8,
    pub profile: u8,
    pub level: u8,
    pub cea: u32,
    pub vesa: u32,
    pub hh: u32,
    pub latency: u8,
    pub min_slice_size: u16,
    pub slice_enc_params: u16,
    pub frame_rate_control: u8,
    pub max_hres: Option<u16>,
    pub max_vres: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdcpVersion {
    Hdcp2_0,
    Hdcp2_1,
}

impl HdcpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HdcpVersion::Hdcp2_0 => "HDCP2.0",
            HdcpVersion::Hdcp2_1 => "HDCP2.1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentProtection {
    /// The peer announced `none`.
    NotProtected,
    /// HDCP 2.x with the TCP port the sideband handshake listens on.
    Hdcp { version: HdcpVersion, port: u16 },
}

/// `wfd_display_edid`: either explicitly unavailable or a payload of
/// whole 128-byte blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEdid {
    Unavailable,
    Blocks(Vec<u8>),
}

impl DisplayEdid {
    pub fn block_count(&self) -> usize {
        match self {
            DisplayEdid::Unavailable => 0,
            DisplayEdid::Blocks(payload) => payload.len() / EDID_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoupledSink {
    pub status: u8,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMethod {
    Setup,
    Pause,
    Play,
    Teardown,
}

impl TriggerMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMethod::Setup => "SETUP",
            TriggerMethod::Pause => "PAUSE",
            TriggerMethod::Play => "PLAY",
            TriggerMethod::Teardown => "TEARDOWN",
        }
    }

    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "SETUP" => Some(TriggerMethod::Setup),
            "PAUSE" => Some(TriggerMethod::Pause),
            "PLAY" => Some(TriggerMethod::Play),
            "TEARDOWN" => Some(TriggerMethod::Teardown),
            _ => None,
        }
    }
}

/// `wfd_presentation_URL` carries two slots; an absent slot is the
/// literal `none`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentationUrl {
    pub url0: Option<String>,
    pub url1: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRtpPorts {
    pub profile: String,
    pub port0: u16,
    pub port1: u16,
    pub mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Secondary,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Primary => "primary",
            Route::Secondary => "secondary",
        }
    }
}

/// `wfd_I2C`: the sink's I2C access port, or explicitly none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2c {
    pub port: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvFormatChangeTiming {
    pub pts: u64,
    pub dts: u64,
}

/// A parsed WFD capability/control document: an ordered bag of optional
/// fields. Absent means the key did not appear.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WfdMessage {
    pub audio_codecs: Option<Vec<AudioCodec>>,
    pub video_formats: Option<VideoFormats>,
    pub content_protection: Option<ContentProtection>,
    pub display_edid: Option<DisplayEdid>,
    pub coupled_sink: Option<CoupledSink>,
    pub trigger_method: Option<TriggerMethod>,
    pub presentation_url: Option<PresentationUrl>,
    pub client_rtp_ports: Option<ClientRtpPorts>,
    pub route: Option<Route>,
    pub i2c: Option<I2c>,
    pub av_format_change_timing: Option<AvFormatChangeTiming>,
    /// Opaque: carried verbatim, no subfield interpretation.
    pub preferred_display_mode: Option<String>,
    pub standby_resume_capability: Option<bool>,
    pub standby: bool,
    pub connector_type: Option<u8>,
    pub idr_request: bool,
}

impl WfdMessage {
    /// Parse a parameter body. Unknown keys are ignored; a field whose
    /// value doesn't decode is dropped rather than failing the message.
    /// Only a line that is neither `key: value` nor a known bare flag is
    /// an error.
    pub fn parse(body: &[u8]) -> Result<Self, MessageError> {
        let text = String::from_utf8_lossy(body);
        let mut msg = WfdMessage::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                match line {
                    KEY_STANDBY => msg.standby = true,
                    KEY_IDR_REQUEST => msg.idr_request = true,
                    _ => return Err(MessageError::MalformedHeader(line.to_string())),
                }
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                KEY_AUDIO_CODECS => msg.audio_codecs = parse_audio_codecs(value),
                KEY_VIDEO_FORMATS => msg.video_formats = parse_video_formats(value),
                KEY_CONTENT_PROTECTION => {
                    msg.content_protection = parse_content_protection(value);
                }
                KEY_DISPLAY_EDID => msg.display_edid = parse_display_edid(value),
                KEY_COUPLED_SINK => msg.coupled_sink = parse_coupled_sink(value),
                KEY_TRIGGER_METHOD => msg.trigger_method = TriggerMethod::from_token(value),
                KEY_PRESENTATION_URL => msg.presentation_url = parse_presentation_url(value),
                KEY_CLIENT_RTP_PORTS => msg.client_rtp_ports = parse_client_rtp_ports(value),
                KEY_ROUTE => {
                    msg.route = match value {
                        "primary" => Some(Route::Primary),
                        "secondary" => Some(Route::Secondary),
                        _ => None,
                    };
                }
                KEY_I2C => {
                    msg.i2c = if value == "none" {
                        Some(I2c { port: None })
                    } else {
                        value.parse::<u32>().ok().map(|p| I2c { port: Some(p) })
                    };
                }
                KEY_AV_FORMAT_CHANGE_TIMING => {
                    msg.av_format_change_timing = parse_av_timing(value);
                }
                KEY_PREFERRED_DISPLAY_MODE => {
                    if !value.is_empty() {
                        msg.preferred_display_mode = Some(value.to_string());
                    }
                }
                KEY_STANDBY_RESUME_CAPABILITY => {
                    msg.standby_resume_capability = match value {
                        "supported" => Some(true),
                        "none" => Some(false),
                        _ => None,
                    };
                }
                KEY_STANDBY => msg.standby = true,
                KEY_CONNECTOR_TYPE => {
                    msg.connector_type = if value == "none" {
                        None
                    } else {
                        u8::from_str_radix(value, 16).ok()
                    };
                }
                KEY_IDR_REQUEST => msg.idr_request = true,
                _ => {} // forward compat: unknown keys are skipped
            }
        }
        Ok(msg)
    }

    /// Canonical full-value serialization: one field per line, CR/LF
    /// terminated, exact key text and token widths.
    pub fn emit_full(&self) -> String {
        let mut out = String::new();
        if let Some(codecs) = &self.audio_codecs {
            let _ = write!(out, "{KEY_AUDIO_CODECS}: {}\r\n", emit_audio_codecs(codecs));
        }
        if let Some(v) = &self.video_formats {
            let _ = write!(out, "{KEY_VIDEO_FORMATS}: {}\r\n", emit_video_formats(v));
        }
        if let Some(cp) = &self.content_protection {
            let _ = write!(out, "{KEY_CONTENT_PROTECTION}: {}\r\n", emit_content_protection(cp));
        }
        if let Some(edid) = &self.display_edid {
            let _ = write!(out, "{KEY_DISPLAY_EDID}: {}\r\n", emit_display_edid(edid));
        }
        if let Some(cs) = &self.coupled_sink {
            let _ = write!(out, "{KEY_COUPLED_SINK}: {}\r\n", emit_coupled_sink(cs));
        }
        if let Some(t) = self.trigger_method {
            let _ = write!(out, "{KEY_TRIGGER_METHOD}: {}\r\n", t.as_str());
        }
        if let Some(p) = &self.presentation_url {
            let _ = write!(
                out,
                "{KEY_PRESENTATION_URL}: {} {}\r\n",
                p.url0.as_deref().unwrap_or("none"),
                p.url1.as_deref().unwrap_or("none"),
            );
        }
        if let Some(ports) = &self.client_rtp_ports {
            let _ = write!(
                out,
                "{KEY_CLIENT_RTP_PORTS}: {} {} {} {}\r\n",
                ports.profile, ports.port0, ports.port1, ports.mode,
            );
        }
        if let Some(r) = self.route {
            let _ = write!(out, "{KEY_ROUTE}: {}\r\n", r.as_str());
        }
        if let Some(i2c) = &self.i2c {
            match i2c.port {
                Some(port) => {
                    let _ = write!(out, "{KEY_I2C}: {port}\r\n");
                }
                None => {
                    let _ = write!(out, "{KEY_I2C}: none\r\n");
                }
            }
        }
        if let Some(t) = &self.av_format_change_timing {
            let _ = write!(
                out,
                "{KEY_AV_FORMAT_CHANGE_TIMING}: {:010x} {:010x}\r\n",
                t.pts, t.dts
            );
        }
        if let Some(mode) = &self.preferred_display_mode {
            let _ = write!(out, "{KEY_PREFERRED_DISPLAY_MODE}: {mode}\r\n");
        }
        if let Some(supported) = self.standby_resume_capability {
            let _ = write!(
                out,
                "{KEY_STANDBY_RESUME_CAPABILITY}: {}\r\n",
                if supported { "supported" } else { "none" }
            );
        }
        if self.standby {
            let _ = write!(out, "{KEY_STANDBY}\r\n");
        }
        if let Some(c) = self.connector_type {
            let _ = write!(out, "{KEY_CONNECTOR_TYPE}: {c:02x}\r\n");
        }
        if self.idr_request {
            let _ = write!(out, "{KEY_IDR_REQUEST}\r\n");
        }
        out
    }

    /// Names-only serialization: the bare key of every present field,
    /// CR/LF terminated. This is the capability probe body.
    pub fn emit_names(&self) -> String {
        let mut out = String::new();
        let mut push = |key: &str| {
            out.push_str(key);
            out.push_str("\r\n");
        };
        if self.audio_codecs.is_some() {
            push(KEY_AUDIO_CODECS);
        }
        if self.video_formats.is_some() {
            push(KEY_VIDEO_FORMATS);
        }
        if self.content_protection.is_some() {
            push(KEY_CONTENT_PROTECTION);
        }
        if self.display_edid.is_some() {
            push(KEY_DISPLAY_EDID);
        }
        if self.coupled_sink.is_some() {
            push(KEY_COUPLED_SINK);
        }
        if self.trigger_method.is_some() {
            push(KEY_TRIGGER_METHOD);
        }
        if self.presentation_url.is_some() {
            push(KEY_PRESENTATION_URL);
        }
        if self.client_rtp_ports.is_some() {
            push(KEY_CLIENT_RTP_PORTS);
        }
        if self.route.is_some() {
            push(KEY_ROUTE);
        }
        if self.i2c.is_some() {
            push(KEY_I2C);
        }
        if self.av_format_change_timing.is_some() {
            push(KEY_AV_FORMAT_CHANGE_TIMING);
        }
        if self.preferred_display_mode.is_some() {
            push(KEY_PREFERRED_DISPLAY_MODE);
        }
        if self.standby_resume_capability.is_some() {
            push(KEY_STANDBY_RESUME_CAPABILITY);
        }
        if self.standby {
            push(KEY_STANDBY);
        }
        if self.connector_type.is_some() {
            push(KEY_CONNECTOR_TYPE);
        }
        if self.idr_request {
            push(KEY_IDR_REQUEST);
        }
        out
    }
}

fn parse_audio_codecs(value: &str) -> Option<Vec<AudioCodec>> {
    if value == "none" {
        return Some(Vec::new());
    }
    let mut out = Vec::new();
    for entry in value.split(',') {
        let mut tok = entry.split_ascii_whitespace();
        let format = AudioFormat::from_token(tok.next()?)?;
        let modes = u32::from_str_radix(tok.next()?, 16).ok()?;
        let latency = u8::from_str_radix(tok.next()?, 16).ok()?;
        out.push(AudioCodec {
            format,
            modes,
            latency,
        });
    }
    if out.is_empty() { None } else { Some(out) }
}

fn emit_audio_codecs(codecs: &[AudioCodec]) -> String {
    if codecs.is_empty() {
        return "none".to_string();
    }
    codecs
        .iter()
        .map(|c| format!("{} {:08x} {:02x}", c.format.as_str(), c.modes, c.latency))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_video_formats(value: &str) -> Option<VideoFormats> {
    let tok: Vec<&str> = value.split_ascii_whitespace().collect();
    if tok.len() != 13 {
        return None;
    }
    let res_token = |t: &str| -> Option<Option<u16>> {
        if t == "none" {
            Some(None)
        } else {
            u16::from_str_radix(t, 16).ok().map(Some)
        }
    };
    Some(VideoFormats {
        native: u8::from_str_radix(tok[0], 16).ok()?,
        preferred_display_mode: u8::from_str_radix(tok[1], 16).ok()?,
        profile: u8::from_str_radix(tok[2], 16).ok()?,
        level: u8::from_str_radix(tok[3], 16).ok()?,
        cea: u32::from_str_radix(tok[4], 16).ok()?,
        vesa: u32::from_str_radix(tok[5], 16).ok()?,
        hh: u32::from_str_radix(tok[6], 16).ok()?,
        latency: u8::from_str_radix(tok[7], 16).ok()?,
        min_slice_size: u16::from_str_radix(tok[8], 16).ok()?,
        slice_enc_params: u16::from_str_radix(tok[9], 16).ok()?,
        frame_rate_control: u8::from_str_radix(tok[10], 16).ok()?,
        max_hres: res_token(tok[11])?,
        max_vres: res_token(tok[12])?,
    })
}

fn emit_video_formats(v: &VideoFormats) -> String {
    let res = |r: Option<u16>| match r {
        Some(x) => format!("{x:04x}"),
        None => "none".to_string(),
    };
    format!(
        "{:02x} {:02x} {:02x} {:02x} {:08x} {:08x} {:08x} {:02x} {:04x} {:04x} {:02x} {} {}",
        v.native,
        v.preferred_display_mode,
        v.profile,
        v.level,
        v.cea,
        v.vesa,
        v.hh,
        v.latency,
        v.min_slice_size,
        v.slice_enc_params,
        v.frame_rate_control,
        res(v.max_hres),
        res(v.max_vres),
    )
}

fn parse_content_protection(value: &str) -> Option<ContentProtection> {
    if value == "none" {
        return Some(ContentProtection::NotProtected);
    }
    let mut tok = value.split_ascii_whitespace();
    let version = match tok.next()? {
        "HDCP2.0" => HdcpVersion::Hdcp2_0,
        "HDCP2.1" => HdcpVersion::Hdcp2_1,
        _ => return None,
    };
    let port = tok.next()?.strip_prefix("port=")?.parse::<u16>().ok()?;
    Some(ContentProtection::Hdcp { version, port })
}

fn emit_content_protection(cp: &ContentProtection) -> String {
    match cp {
        ContentProtection::NotProtected => "none".to_string(),
        ContentProtection::Hdcp { version, port } => {
            format!("{} port={}", version.as_str(), port)
        }
    }
}

fn parse_display_edid(value: &str) -> Option<DisplayEdid> {
    if value == "none" {
        return Some(DisplayEdid::Unavailable);
    }
    let (count_tok, payload_tok) = value.split_once(' ')?;
    let block_count = usize::from_str_radix(count_tok, 16).ok()?;
    if block_count == 0 || block_count > EDID_MAX_BLOCKS {
        return None;
    }
    let payload_tok = payload_tok.trim();
    if payload_tok.len() != 2 * EDID_BLOCK_SIZE * block_count {
        return None;
    }
    let bytes = payload_tok.as_bytes();
    let mut payload = Vec::with_capacity(EDID_BLOCK_SIZE * block_count);
    for pair in bytes.chunks_exact(2) {
        payload.push(decode_hex_nibble(pair[0]) << 4 | decode_hex_nibble(pair[1]));
    }
    Some(DisplayEdid::Blocks(payload))
}

fn emit_display_edid(edid: &DisplayEdid) -> String {
    match edid {
        DisplayEdid::Unavailable => "none".to_string(),
        DisplayEdid::Blocks(payload) => {
            let mut out = format!("{:04x} ", payload.len() / EDID_BLOCK_SIZE);
            for b in payload {
                let _ = write!(out, "{b:02x}");
            }
            out
        }
    }
}

/// Deployed sinks pad EDID payloads with junk; anything outside
/// `0-9a-fA-F` decodes as zero.
fn decode_hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

fn parse_coupled_sink(value: &str) -> Option<CoupledSink> {
    if value == "none" {
        return None;
    }
    let mut tok = value.split_ascii_whitespace();
    let status = u8::from_str_radix(tok.next()?, 16).ok()?;
    let address = tok.next().map(|s| s.to_string());
    Some(CoupledSink { status, address })
}

fn emit_coupled_sink(cs: &CoupledSink) -> String {
    match &cs.address {
        Some(addr) => format!("{:02x} {}", cs.status, addr),
        None => format!("{:02x}", cs.status),
    }
}

fn parse_presentation_url(value: &str) -> Option<PresentationUrl> {
    let mut tok = value.split_ascii_whitespace();
    let slot = |t: Option<&str>| -> Option<String> {
        match t {
            Some("none") | None => None,
            Some(url) => Some(url.to_string()),
        }
    };
    let url0 = slot(tok.next());
    let url1 = slot(tok.next());
    Some(PresentationUrl { url0, url1 })
}

fn parse_client_rtp_ports(value: &str) -> Option<ClientRtpPorts> {
    let mut tok = value.split_ascii_whitespace();
    let profile = tok.next()?.to_string();
    let port0 = tok.next()?.parse::<u16>().ok()?;
    let port1 = tok.next()?.parse::<u16>().ok()?;
    let mode = tok.next()?.trim_matches('"').to_string();
    Some(ClientRtpPorts {
        profile,
        port0,
        port1,
        mode,
    })
}

fn parse_av_timing(value: &str) -> Option<AvFormatChangeTiming> {
    let mut tok = value.split_ascii_whitespace();
    let pts = u64::from_str_radix(tok.next()?, 16).ok()?;
    let dts = u64::from_str_radix(tok.next()?, 16).ok()?;
    Some(AvFormatChangeTiming { pts, dts })
}
