//! Capability model: what the source offers, what the sink disclosed,
//! and the intersection that parameterizes the media pipeline.
//!
//! Every negotiable dimension is a bitmap over enum points from the WFD
//! tables; negotiation intersects the two bitmaps and picks one bit per
//! dimension. The result is single-valued everywhere — a
//! [`NegotiatedConfig`] never carries a bitmap.

use thiserror::Error;

use crate::message::{
    AudioCodec, AudioFormat, ClientRtpPorts, ContentProtection, HdcpVersion, PresentationUrl,
    VideoFormats, WfdMessage,
};

/// Audio sampling-frequency bitmap points (the LPCM `modes` layout).
pub const FREQ_44100: u32 = 1 << 0;
pub const FREQ_48000: u32 = 1 << 1;

/// H.264 profile bitmap points.
pub const PROFILE_BASELINE: u8 = 1 << 0;
pub const PROFILE_HIGH: u8 = 1 << 1;

/// H.264 level bitmap points.
pub const LEVEL_3_1: u8 = 1 << 0;
pub const LEVEL_3_2: u8 = 1 << 1;
pub const LEVEL_4: u8 = 1 << 2;
pub const LEVEL_4_1: u8 = 1 << 3;
pub const LEVEL_4_2: u8 = 1 << 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("sink did not disclose {0}")]
    MissingField(&'static str),
    #[error("no common {0} between source and sink")]
    EmptyIntersection(&'static str),
}

/// A bitmap over one negotiable dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability(pub u32);

impl Capability {
    pub fn intersect(self, other: Capability) -> Capability {
        Capability(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Highest set bit index, scanning MSB first.
    pub fn highest_bit(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some((31 - self.0.leading_zeros()) as u8)
        }
    }

    pub fn has_bit(self, bit: u8) -> bool {
        bit < 32 && self.0 & (1 << bit) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFamily {
    Cea,
    Vesa,
    Hh,
}

impl ResolutionFamily {
    /// The 3-bit family tag of the `native` byte.
    pub fn tag(self) -> u8 {
        match self {
            ResolutionFamily::Cea => 0,
            ResolutionFamily::Vesa => 1,
            ResolutionFamily::Hh => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ResolutionFamily::Cea),
            1 => Some(ResolutionFamily::Vesa),
            2 => Some(ResolutionFamily::Hh),
            _ => None,
        }
    }
}

/// One entry of a resolution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub interlaced: bool,
}

const fn m(width: u32, height: u32, framerate: u32, interlaced: bool) -> Option<VideoMode> {
    Some(VideoMode {
        width,
        height,
        framerate,
        interlaced,
    })
}

// Bit 0 of every family is reserved; defined modes start at bit 1.
static CEA_MODES: [Option<VideoMode>; 18] = [
    None,
    m(640, 480, 60, false),
    m(720, 480, 60, false),
    m(720, 480, 60, true),
    m(720, 576, 50, false),
    m(720, 576, 50, true),
    m(1280, 720, 30, false),
    m(1280, 720, 60, false),
    m(1920, 1080, 30, false),
    m(1920, 1080, 60, false),
    m(1920, 1080, 60, true),
    m(1280, 720, 25, false),
    m(1280, 720, 50, false),
    m(1920, 1080, 25, false),
    m(1920, 1080, 50, false),
    m(1920, 1080, 50, true),
    m(1280, 720, 24, false),
    m(1920, 1080, 24, false),
];

static VESA_MODES: [Option<VideoMode>; 30] = [
    None,
    m(800, 600, 30, false),
    m(800, 600, 60, false),
    m(1024, 768, 30, false),
    m(1024, 768, 60, false),
    m(1152, 864, 30, false),
    m(1152, 864, 60, false),
    m(1280, 768, 30, false),
    m(1280, 768, 60, false),
    m(1280, 800, 30, false),
    m(1280, 800, 60, false),
    m(1360, 768, 30, false),
    m(1360, 768, 60, false),
    m(1366, 768, 30, false),
    m(1366, 768, 60, false),
    m(1280, 1024, 30, false),
    m(1280, 1024, 60, false),
    m(1400, 1050, 30, false),
    m(1400, 1050, 60, false),
    m(1440, 900, 30, false),
    m(1440, 900, 60, false),
    m(1600, 900, 30, false),
    m(1600, 900, 60, false),
    m(1600, 1200, 30, false),
    m(1600, 1200, 60, false),
    m(1680, 1024, 30, false),
    m(1680, 1024, 60, false),
    m(1680, 1050, 30, false),
    m(1680, 1050, 60, false),
    m(1920, 1200, 30, false),
];

static HH_MODES: [Option<VideoMode>; 13] = [
    None,
    m(800, 480, 30, false),
    m(800, 480, 60, false),
    m(854, 480, 30, false),
    m(854, 480, 60, false),
    m(864, 480, 30, false),
    m(864, 480, 60, false),
    m(640, 360, 30, false),
    m(640, 360, 60, false),
    m(960, 540, 30, false),
    m(960, 540, 60, false),
    m(848, 480, 30, false),
    m(848, 480, 60, false),
];

/// Look up the mode behind one bit of a family bitmap.
pub fn lookup_mode(family: ResolutionFamily, bit: u8) -> Option<VideoMode> {
    let table: &[Option<VideoMode>] = match family {
        ResolutionFamily::Cea => &CEA_MODES,
        ResolutionFamily::Vesa => &VESA_MODES,
        ResolutionFamily::Hh => &HH_MODES,
    };
    table.get(bit as usize).copied().flatten()
}

/// All defined bits of a family, as a bitmap.
pub fn defined_bits(family: ResolutionFamily) -> Capability {
    let table: &[Option<VideoMode>] = match family {
        ResolutionFamily::Cea => &CEA_MODES,
        ResolutionFamily::Vesa => &VESA_MODES,
        ResolutionFamily::Hh => &HH_MODES,
    };
    let mut bits = 0u32;
    for (i, entry) in table.iter().enumerate() {
        if entry.is_some() {
            bits |= 1 << i;
        }
    }
    Capability(bits)
}

/// What this source is willing to produce.
#[derive(Debug, Clone)]
pub struct SourceCaps {
    /// Bitmap over [`AudioFormat::bit`] points.
    pub audio_formats: u8,
    /// Frequency bitmap for the LPCM path.
    pub audio_freqs: u32,
    pub audio_latency: u8,
    /// Native byte: family tag in the low 3 bits, bitmap index above.
    pub native: u8,
    pub cea: u32,
    pub vesa: u32,
    pub hh: u32,
    pub profile: u8,
    pub level: u8,
    /// HDCP sideband the source can serve, if built with one.
    pub hdcp: Option<(HdcpVersion, u16)>,
}

impl Default for SourceCaps {
    fn default() -> Self {
        Self {
            audio_formats: AudioFormat::Aac.bit() | AudioFormat::Lpcm.bit(),
            audio_freqs: FREQ_48000 | FREQ_44100,
            audio_latency: 0,
            native: 0x30, // CEA bit 6: 1280x720p30
            cea: 1 << 6,
            vesa: 0,
            hh: 0,
            profile: PROFILE_BASELINE,
            level: LEVEL_3_1,
            hdcp: None,
        }
    }
}

/// What the sink disclosed in its capability reply.
#[derive(Debug, Clone)]
pub struct SinkCaps {
    pub audio: Vec<AudioCodec>,
    pub video: VideoFormats,
    pub rtp_ports: ClientRtpPorts,
    pub hdcp: Option<(HdcpVersion, u16)>,
    pub edid: Option<Vec<u8>>,
}

impl SinkCaps {
    /// Extract the negotiation inputs from a parsed capability reply.
    /// The three dimensions the pipeline cannot run without are required.
    pub fn from_message(msg: &WfdMessage) -> Result<Self, NegotiationError> {
        let audio = msg
            .audio_codecs
            .clone()
            .ok_or(NegotiationError::MissingField("wfd_audio_codecs"))?;
        let video = msg
            .video_formats
            .ok_or(NegotiationError::MissingField("wfd_video_formats"))?;
        let rtp_ports = msg
            .client_rtp_ports
            .clone()
            .ok_or(NegotiationError::MissingField("wfd_client_rtp_ports"))?;
        let hdcp = match msg.content_protection {
            Some(ContentProtection::Hdcp { version, port }) => Some((version, port)),
            _ => None,
        };
        let edid = match &msg.display_edid {
            Some(crate::message::DisplayEdid::Blocks(payload)) => Some(payload.clone()),
            _ => None,
        };
        Ok(Self {
            audio,
            video,
            rtp_ports,
            hdcp,
            edid,
        })
    }

    fn audio_format_bitmap(&self) -> u8 {
        self.audio.iter().fold(0, |acc, c| acc | c.format.bit())
    }

    fn audio_entry(&self, format: AudioFormat) -> Option<&AudioCodec> {
        self.audio.iter().find(|c| c.format == format)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAudio {
    pub format: AudioFormat,
    pub frequency: u32,
    pub channels: u8,
    pub latency: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedVideo {
    pub family: ResolutionFamily,
    /// Chosen bit within the family bitmap.
    pub bit: u8,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub interlaced: bool,
    pub profile: u8,
    pub level: u8,
    /// The source's native byte, echoed into the committed formats line.
    pub native: u8,
}

/// The single-valued result of capability intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedConfig {
    pub audio: NegotiatedAudio,
    pub video: NegotiatedVideo,
    pub rtp_profile: String,
    pub rtp_port0: u16,
    pub rtp_port1: u16,
    pub rtp_mode: String,
    pub hdcp: Option<(HdcpVersion, u16)>,
    pub presentation_url: String,
}

/// Intersect source and sink capabilities into one configuration.
///
/// Audio codec: MSB-first over the 8-bit codec bitmap. Frequency: 48000
/// wins over 44100 when both are offered. Channels are pinned to stereo.
/// Video: the native family is tried first, then the remaining families;
/// within a family the highest common defined bit wins.
pub fn negotiate(
    source: &SourceCaps,
    sink: &SinkCaps,
    host: &str,
) -> Result<NegotiatedConfig, NegotiationError> {
    // Audio codec
    let formats = Capability(u32::from(source.audio_formats & sink.audio_format_bitmap()));
    let codec_bit = formats
        .highest_bit()
        .ok_or(NegotiationError::EmptyIntersection("audio codec"))?;
    let format = match 1u8 << codec_bit {
        b if b == AudioFormat::Lpcm.bit() => AudioFormat::Lpcm,
        b if b == AudioFormat::Aac.bit() => AudioFormat::Aac,
        b if b == AudioFormat::Ac3.bit() => AudioFormat::Ac3,
        _ => return Err(NegotiationError::EmptyIntersection("audio codec")),
    };
    let entry = sink
        .audio_entry(format)
        .ok_or(NegotiationError::EmptyIntersection("audio codec"))?;

    // Frequency: LPCM carries a frequency bitmap in its modes; AAC and
    // AC3 sample at 48 kHz in every defined mode.
    let frequency = match format {
        AudioFormat::Lpcm => {
            let freqs = Capability(source.audio_freqs & entry.modes);
            if freqs.has_bit(1) {
                48_000
            } else if freqs.has_bit(0) {
                44_100
            } else {
                return Err(NegotiationError::EmptyIntersection("audio frequency"));
            }
        }
        AudioFormat::Aac | AudioFormat::Ac3 => {
            if entry.modes == 0 {
                return Err(NegotiationError::EmptyIntersection("audio channels"));
            }
            48_000
        }
    };

    let audio = NegotiatedAudio {
        format,
        frequency,
        // Stereo only; multichannel layouts are negotiable in the
        // protocol but not produced by this source.
        channels: 2,
        latency: entry.latency,
    };

    // Video resolution: native family first, then the others.
    let native_family =
        ResolutionFamily::from_tag(source.native & 0x07).unwrap_or(ResolutionFamily::Cea);
    let mut order = vec![native_family];
    for family in [
        ResolutionFamily::Cea,
        ResolutionFamily::Vesa,
        ResolutionFamily::Hh,
    ] {
        if family != native_family {
            order.push(family);
        }
    }

    let mut chosen = None;
    for family in order {
        let (src_bits, sink_bits) = match family {
            ResolutionFamily::Cea => (source.cea, sink.video.cea),
            ResolutionFamily::Vesa => (source.vesa, sink.video.vesa),
            ResolutionFamily::Hh => (source.hh, sink.video.hh),
        };
        let mut common = Capability(src_bits & sink_bits).intersect(defined_bits(family));
        while let Some(bit) = common.highest_bit() {
            if let Some(mode) = lookup_mode(family, bit) {
                chosen = Some((family, bit, mode));
                break;
            }
            common = Capability(common.0 & !(1 << bit));
        }
        if chosen.is_some() {
            break;
        }
    }
    let (family, bit, mode) =
        chosen.ok_or(NegotiationError::EmptyIntersection("video resolution"))?;

    let video = NegotiatedVideo {
        family,
        bit,
        width: mode.width,
        height: mode.height,
        framerate: mode.framerate,
        interlaced: mode.interlaced,
        profile: PROFILE_BASELINE,
        level: LEVEL_3_1,
        native: source.native,
    };

    // Content protection is negotiated like every other dimension: the
    // committed version must be one both sides declared. The sideband
    // port is the sink's (it runs the HDCP listener).
    let hdcp = match (source.hdcp, sink.hdcp) {
        (Some((src_version, _)), Some((sink_version, sink_port)))
            if src_version == sink_version =>
        {
            Some((sink_version, sink_port))
        }
        _ => None,
    };

    Ok(NegotiatedConfig {
        audio,
        video,
        rtp_profile: sink.rtp_ports.profile.clone(),
        rtp_port0: sink.rtp_ports.port0,
        rtp_port1: sink.rtp_ports.port1,
        rtp_mode: sink.rtp_ports.mode.clone(),
        hdcp,
        presentation_url: format!("rtsp://{host}/wfd1.0/streamid=0"),
    })
}

impl NegotiatedConfig {
    /// The committed-parameters body: presentation URL, the chosen audio
    /// codec, the chosen video format, and the sink's RTP ports echoed
    /// back.
    pub fn to_message(&self) -> WfdMessage {
        // The committed audio modes field names the chosen sampling
        // frequency for every codec (48000 -> bit 1, 44100 -> bit 0).
        let modes = if self.audio.frequency == 48_000 {
            FREQ_48000
        } else {
            FREQ_44100
        };
        let (cea, vesa, hh) = match self.video.family {
            ResolutionFamily::Cea => (1u32 << self.video.bit, 0, 0),
            ResolutionFamily::Vesa => (0, 1u32 << self.video.bit, 0),
            ResolutionFamily::Hh => (0, 0, 1u32 << self.video.bit),
        };
        WfdMessage {
            audio_codecs: Some(vec![AudioCodec {
                format: self.audio.format,
                modes,
                latency: self.audio.latency,
            }]),
            video_formats: Some(VideoFormats {
                native: self.video.native,
                profile: self.video.profile,
                level: self.video.level,
                cea,
                vesa,
                hh,
                ..Default::default()
            }),
            presentation_url: Some(PresentationUrl {
                url0: Some(self.presentation_url.clone()),
                url1: None,
            }),
            client_rtp_ports: Some(ClientRtpPorts {
                profile: self.rtp_profile.clone(),
                port0: self.rtp_port0,
                port1: self.rtp_port1,
                mode: self.rtp_mode.clone(),
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_720p30_aac() -> SinkCaps {
        SinkCaps {
            audio: vec![AudioCodec {
                format: AudioFormat::Aac,
                modes: 0b111, // 2, 4 and 6 channel layouts
                latency: 0,
            }],
            video: VideoFormats {
                cea: 1 << 6, // 1280x720p30 only
                profile: PROFILE_BASELINE,
                level: LEVEL_3_1,
                ..Default::default()
            },
            rtp_ports: ClientRtpPorts {
                profile: "RTP/AVP/UDP;unicast".to_string(),
                port0: 19000,
                port1: 0,
                mode: "mode=play".to_string(),
            },
            hdcp: None,
            edid: None,
        }
    }

    #[test]
    fn intersection_commutative_and_idempotent() {
        let a = Capability(0b1010_1100);
        let b = Capability(0b0110_0110);
        assert_eq!(a.intersect(b), b.intersect(a));
        assert_eq!(a.intersect(a), a);
        assert_eq!(b.intersect(b), b);
    }

    #[test]
    fn highest_bit_is_msb_first() {
        assert_eq!(Capability(0).highest_bit(), None);
        assert_eq!(Capability(1).highest_bit(), Some(0));
        assert_eq!(Capability(0b101).highest_bit(), Some(2));
        assert_eq!(Capability(1 << 31).highest_bit(), Some(31));
    }

    #[test]
    fn lookup_total_on_defined_bits() {
        for family in [
            ResolutionFamily::Cea,
            ResolutionFamily::Vesa,
            ResolutionFamily::Hh,
        ] {
            let defined = defined_bits(family);
            for bit in 0..32 {
                if defined.has_bit(bit) {
                    let mode = lookup_mode(family, bit)
                        .unwrap_or_else(|| panic!("{family:?} bit {bit} defined but no mode"));
                    assert!(mode.width > 0);
                    assert!(mode.height > 0);
                    assert!(mode.framerate > 0);
                }
            }
        }
    }

    #[test]
    fn reserved_bit_zero_is_undefined() {
        for family in [
            ResolutionFamily::Cea,
            ResolutionFamily::Vesa,
            ResolutionFamily::Hh,
        ] {
            assert!(lookup_mode(family, 0).is_none());
        }
    }

    #[test]
    fn cea_bit_6_is_720p30() {
        let mode = lookup_mode(ResolutionFamily::Cea, 6).unwrap();
        assert_eq!((mode.width, mode.height, mode.framerate), (1280, 720, 30));
        assert!(!mode.interlaced);
    }

    #[test]
    fn negotiates_aac_stereo_720p30() {
        let source = SourceCaps::default();
        let sink = sink_720p30_aac();
        let cfg = negotiate(&source, &sink, "192.0.2.1").unwrap();

        assert_eq!(cfg.audio.format, AudioFormat::Aac);
        assert_eq!(cfg.audio.frequency, 48_000);
        assert_eq!(cfg.audio.channels, 2);
        assert_eq!(cfg.video.width, 1280);
        assert_eq!(cfg.video.height, 720);
        assert_eq!(cfg.video.framerate, 30);
        assert_eq!(cfg.video.family, ResolutionFamily::Cea);
        assert_eq!(cfg.video.bit, 6);
        assert_eq!(cfg.rtp_port0, 19000);
        assert_eq!(cfg.rtp_port1, 0);
        assert_eq!(
            cfg.presentation_url,
            "rtsp://192.0.2.1/wfd1.0/streamid=0"
        );
    }

    #[test]
    fn committed_body_matches_negotiation() {
        let source = SourceCaps::default();
        let sink = sink_720p30_aac();
        let cfg = negotiate(&source, &sink, "192.0.2.1").unwrap();
        let body = cfg.to_message().emit_full();

        assert!(body.contains("wfd_audio_codecs: AAC 00000002 00\r\n"));
        assert!(body.contains(
            "wfd_video_formats: 30 00 01 01 00000040 00000000 00000000 00 0000 0000 00 none none\r\n"
        ));
        assert!(body.contains(
            "wfd_client_rtp_ports: RTP/AVP/UDP;unicast 19000 0 mode=play\r\n"
        ));
        assert!(
            body.contains("wfd_presentation_URL: rtsp://192.0.2.1/wfd1.0/streamid=0 none\r\n")
        );
    }

    #[test]
    fn codec_priority_is_msb_first() {
        let mut source = SourceCaps::default();
        source.audio_formats =
            AudioFormat::Lpcm.bit() | AudioFormat::Aac.bit() | AudioFormat::Ac3.bit();
        let mut sink = sink_720p30_aac();
        sink.audio = vec![
            AudioCodec {
                format: AudioFormat::Lpcm,
                modes: FREQ_48000,
                latency: 0,
            },
            AudioCodec {
                format: AudioFormat::Ac3,
                modes: 0b1,
                latency: 0,
            },
        ];
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.audio.format, AudioFormat::Ac3);
    }

    #[test]
    fn lpcm_prefers_48000() {
        let mut source = SourceCaps::default();
        source.audio_formats = AudioFormat::Lpcm.bit();
        let mut sink = sink_720p30_aac();
        sink.audio = vec![AudioCodec {
            format: AudioFormat::Lpcm,
            modes: FREQ_44100 | FREQ_48000,
            latency: 0,
        }];
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.audio.frequency, 48_000);

        sink.audio[0].modes = FREQ_44100;
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.audio.frequency, 44_100);
    }

    #[test]
    fn empty_audio_intersection_fails() {
        let mut source = SourceCaps::default();
        source.audio_formats = AudioFormat::Lpcm.bit();
        let sink = sink_720p30_aac(); // AAC only
        match negotiate(&source, &sink, "h") {
            Err(NegotiationError::EmptyIntersection("audio codec")) => {}
            other => panic!("expected empty audio intersection, got {other:?}"),
        }
    }

    #[test]
    fn empty_video_intersection_fails() {
        let source = SourceCaps::default(); // CEA bit 6 only
        let mut sink = sink_720p30_aac();
        sink.video.cea = 1 << 8; // 1080p30 only
        match negotiate(&source, &sink, "h") {
            Err(NegotiationError::EmptyIntersection("video resolution")) => {}
            other => panic!("expected empty video intersection, got {other:?}"),
        }
    }

    #[test]
    fn highest_common_resolution_wins() {
        let mut source = SourceCaps::default();
        source.cea = (1 << 6) | (1 << 8); // 720p30 and 1080p30
        let mut sink = sink_720p30_aac();
        sink.video.cea = (1 << 6) | (1 << 8);
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!((cfg.video.width, cfg.video.height), (1920, 1080));
    }

    #[test]
    fn native_family_tried_first() {
        let mut source = SourceCaps::default();
        source.native = (3 << 3) | ResolutionFamily::Hh.tag(); // HH bit 3
        source.cea = 1 << 6;
        source.hh = 1 << 3;
        let mut sink = sink_720p30_aac();
        sink.video.cea = 1 << 6;
        sink.video.hh = 1 << 3;
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.video.family, ResolutionFamily::Hh);
        assert_eq!((cfg.video.width, cfg.video.height), (854, 480));
    }

    #[test]
    fn hdcp_needs_both_sides_on_the_same_version() {
        let mut source = SourceCaps::default();
        let mut sink = sink_720p30_aac();
        assert!(negotiate(&source, &sink, "h").unwrap().hdcp.is_none());

        sink.hdcp = Some((HdcpVersion::Hdcp2_1, 1189));
        assert!(negotiate(&source, &sink, "h").unwrap().hdcp.is_none());

        // A version the source never offered is not negotiable
        source.hdcp = Some((HdcpVersion::Hdcp2_0, 1189));
        assert!(negotiate(&source, &sink, "h").unwrap().hdcp.is_none());

        source.hdcp = Some((HdcpVersion::Hdcp2_1, 1189));
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.hdcp, Some((HdcpVersion::Hdcp2_1, 1189)));
    }

    #[test]
    fn hdcp_port_comes_from_the_sink() {
        let mut source = SourceCaps::default();
        source.hdcp = Some((HdcpVersion::Hdcp2_0, 1000));
        let mut sink = sink_720p30_aac();
        sink.hdcp = Some((HdcpVersion::Hdcp2_0, 1189));
        let cfg = negotiate(&source, &sink, "h").unwrap();
        assert_eq!(cfg.hdcp, Some((HdcpVersion::Hdcp2_0, 1189)));
    }

    #[test]
    fn missing_required_fields_reported() {
        let msg = WfdMessage::default();
        match SinkCaps::from_message(&msg) {
            Err(NegotiationError::MissingField("wfd_audio_codecs")) => {}
            other => panic!("expected missing audio codecs, got {other:?}"),
        }
    }
}
