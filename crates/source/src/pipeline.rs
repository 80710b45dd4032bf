//! Media graph construction: capture source → H.264/audio encode →
//! MPEG-TS mux → RTP payload → UDP, parameterized by the negotiated
//! configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use gstreamer::{self as gst, prelude::*};
use wfdcast_protocol::caps::NegotiatedConfig;
use wfdcast_protocol::message::AudioFormat;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::hotswap::SwapCtx;
use crate::stats::RtpStats;

/// WFD fixes the elementary PIDs; the muxer encodes the PID in the
/// request-pad name (4113 = 0x1011, 4352 = 0x1100).
pub const VIDEO_PID: u32 = 0x1011;
pub const AUDIO_PID: u32 = 0x1100;
pub const VIDEO_SINK_PAD: &str = "sink_4113";
pub const AUDIO_SINK_PAD: &str = "sink_4352";

/// MP2T payload type on the wire.
pub const RTP_PAYLOAD_TYPE: u32 = 33;

/// Socket buffer handed to the UDP sink.
pub const DEFAULT_BUFFER_SIZE: i32 = 0x80000;

const MUX_QUEUE_MAX_BUFFERS: u32 = 20_000;
const DUMP_TS_PATH: &str = "/root/probe.ts";

/// Selectable source stage of the video sub-bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSourceVariant {
    XCapture,
    XvCapture,
    Camera,
    VideoTest,
    Wayland,
    /// Pre-muxed content demuxed from a file path.
    FileDemux(String),
}

impl VideoSourceVariant {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(path) = name.strip_prefix("file-demux:") {
            if path.is_empty() {
                return None;
            }
            return Some(VideoSourceVariant::FileDemux(path.to_string()));
        }
        match name {
            "x-capture" => Some(VideoSourceVariant::XCapture),
            "xv-capture" => Some(VideoSourceVariant::XvCapture),
            "camera" => Some(VideoSourceVariant::Camera),
            "videotest" => Some(VideoSourceVariant::VideoTest),
            "wayland" => Some(VideoSourceVariant::Wayland),
            _ => None,
        }
    }
}

/// The running media graph for one session.
pub struct Pipeline {
    pipeline: gst::Pipeline,
    mux: gst::Element,
    payloader: gst::Element,
    stats: Arc<Mutex<RtpStats>>,
    error_flag: Arc<AtomicBool>,
    _bus_watch: gst::bus::BusWatchGuard,
    swap: Arc<SwapCtx>,
}

impl Pipeline {
    /// Build the full graph. Any element-creation or link failure tears
    /// the partial graph down and surfaces as a build failure.
    pub fn build(
        config: &SourceConfig,
        negotiated: &NegotiatedConfig,
        sink_host: &str,
        server_rtp_ports: (u16, u16),
    ) -> Result<Pipeline, SourceError> {
        let variant = VideoSourceVariant::from_name(&config.video_src_variant)
            .ok_or_else(|| {
                SourceError::BuildFailed(anyhow!(
                    "unknown video_src_variant {:?}",
                    config.video_src_variant
                ))
            })?;
        let pipeline = gst::Pipeline::new();
        match assemble(&pipeline, config, &variant, negotiated, sink_host, server_rtp_ports) {
            Ok(built) => Ok(built),
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(SourceError::BuildFailed(e))
            }
        }
    }

    pub fn play(&self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| SourceError::Pipeline(format!("failed to reach Playing: {e}")))?;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| SourceError::Pipeline(format!("failed to reach Paused: {e}")))?;
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }

    /// True once the bus saw an error; the session turns this into
    /// teardown.
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::Relaxed)
    }

    /// Current output sequence number of the RTP payloader.
    pub fn payloader_seqnum(&self) -> u32 {
        self.payloader.property::<u32>("seqnum")
    }

    /// One 2 s sampler tick: log byte/packet deltas and, once RTCP is
    /// flowing, the receiver-side view.
    pub fn sample_stats(&self) {
        let seqnum = self.payloader_seqnum();
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let delta = stats.sample(seqnum);
        if stats.rtcp_enabled {
            tracing::debug!(
                bytes = delta.bytes,
                packets = delta.packets_estimate,
                seqnum,
                fraction_lost = stats.fraction_lost,
                cumulative_lost = stats.cumulative_lost,
                jitter = stats.jitter,
                rtt = stats.rtt,
                "rtp tick"
            );
        } else {
            tracing::debug!(
                bytes = delta.bytes,
                packets = delta.packets_estimate,
                seqnum,
                "rtp tick"
            );
        }
    }

    /// Ask the encoder for a fresh IDR with headers. Travels upstream
    /// from the muxer through whichever branch is live.
    pub fn force_idr(&self) {
        let event = gstreamer_video::UpstreamForceKeyUnitEvent::builder()
            .all_headers(true)
            .build();
        if !self.mux.send_event(event) {
            tracing::warn!("force-keyunit event was not handled");
        }
    }

    pub(crate) fn swap_ctx(&self) -> Arc<SwapCtx> {
        Arc::clone(&self.swap)
    }

    /// Splice a file into the running RTP stream; resolves when the
    /// payloader has been re-linked to the file muxer.
    pub async fn start_direct_stream(&self, uri: &str) -> Result<(), SourceError> {
        crate::hotswap::engage(self.swap_ctx(), uri.to_string()).await
    }

    pub fn set_direct_stream_end_handler(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        self.swap.set_end_handler(handler);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn make(factory: &str) -> anyhow::Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .with_context(|| format!("failed to create {factory}"))
}

/// Set an encoder/muxer knob only where the element actually has it;
/// element names are configurable, so the property set varies.
fn tune(element: &gst::Element, property: &str, value: &str) {
    if element.find_property(property).is_some() {
        element.set_property_from_str(property, value);
    } else {
        tracing::debug!(
            element = %element.name(),
            property,
            "knob not available on this element"
        );
    }
}

fn link_pads(src: &gst::Pad, sink: &gst::Pad, what: &str) -> anyhow::Result<()> {
    src.link(sink)
        .map_err(|err| anyhow!("failed to link {what}: {err:?}"))?;
    Ok(())
}

fn ghost_src_pad(bin: &gst::Bin, last: &gst::Element) -> anyhow::Result<()> {
    let target = last
        .static_pad("src")
        .context("terminal element has no src pad")?;
    let ghost = gst::GhostPad::builder_with_target(&target)
        .context("failed to ghost bin src pad")?
        .name("src")
        .build();
    bin.add_pad(&ghost).context("failed to add ghost pad")?;
    Ok(())
}

fn raw_video_caps(extra_format: Option<&str>, neg: &NegotiatedConfig) -> gst::Caps {
    let mut builder = gst::Caps::builder("video/x-raw")
        .field("width", neg.video.width as i32)
        .field("height", neg.video.height as i32)
        .field(
            "framerate",
            gst::Fraction::new(neg.video.framerate as i32, 1),
        );
    if let Some(format) = extra_format {
        builder = builder.field("format", format);
    }
    builder.build()
}

fn capsfilter(caps: &gst::Caps) -> anyhow::Result<gst::Element> {
    gst::ElementFactory::make("capsfilter")
        .property("caps", caps)
        .build()
        .context("failed to create capsfilter")
}

fn build_video_encoder(config: &SourceConfig) -> anyhow::Result<gst::Element> {
    let encoder = make(&config.video_encoder_name)?;
    // Low-latency knobs for the common software fallback
    tune(&encoder, "tune", "zerolatency");
    tune(&encoder, "key-int-max", "60");
    tune(&encoder, "bframes", "0");
    Ok(encoder)
}

fn build_video_bin(
    config: &SourceConfig,
    variant: &VideoSourceVariant,
    neg: &NegotiatedConfig,
) -> anyhow::Result<gst::Bin> {
    let bin = gst::Bin::builder().name("video-src-bin").build();
    let parser = make("h264parse")?;
    tune(&parser, "config-interval", "1");
    let queue = make("queue")?;

    match variant {
        VideoSourceVariant::XCapture => {
            let src = make("ximagesrc")?;
            tune(&src, "use-damage", "false");
            let scale = make("videoscale")?;
            let convert = make("videoconvert")?;
            let raw = capsfilter(&raw_video_caps(None, neg))?;
            let encoder = build_video_encoder(config)?;
            let h264_caps = gst::Caps::builder("video/x-h264")
                .field("profile", "baseline")
                .build();
            let profile = capsfilter(&h264_caps)?;
            bin.add_many([&src, &scale, &convert, &raw, &encoder, &profile, &parser, &queue])
                .context("failed to add x-capture elements")?;
            gst::Element::link_many([&src, &scale, &convert, &raw, &encoder, &profile, &parser, &queue])
                .context("failed to link x-capture chain")?;
        }
        VideoSourceVariant::XvCapture => {
            let src = make("xvimagesrc")?;
            let raw = capsfilter(&raw_video_caps(Some("SN12"), neg))?;
            let encoder = build_video_encoder(config)?;
            tune(&encoder, "append-dci", "1");
            tune(&encoder, "idr-period", "120");
            tune(&encoder, "skip-inbuf", "5");
            bin.add_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to add xv-capture elements")?;
            gst::Element::link_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to link xv-capture chain")?;
        }
        VideoSourceVariant::Camera => {
            let src = make("camerasrc")?;
            let raw = capsfilter(&raw_video_caps(Some("SN12"), neg))?;
            let encoder = build_video_encoder(config)?;
            bin.add_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to add camera elements")?;
            gst::Element::link_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to link camera chain")?;
        }
        VideoSourceVariant::VideoTest => {
            let src = gst::ElementFactory::make("videotestsrc")
                .property("is-live", true)
                .build()
                .context("failed to create videotestsrc")?;
            let i420 = capsfilter(&raw_video_caps(Some("I420"), neg))?;
            let convert = make("videoconvert")?;
            let sn12 = capsfilter(&raw_video_caps(Some("SN12"), neg))?;
            let encoder = build_video_encoder(config)?;
            bin.add_many([&src, &i420, &convert, &sn12, &encoder, &parser, &queue])
                .context("failed to add videotest elements")?;
            gst::Element::link_many([&src, &i420, &convert, &sn12, &encoder, &parser, &queue])
                .context("failed to link videotest chain")?;
        }
        VideoSourceVariant::Wayland => {
            let src = make("waylandsrc")?;
            let raw = capsfilter(&raw_video_caps(Some("SN12"), neg))?;
            let encoder = build_video_encoder(config)?;
            bin.add_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to add wayland elements")?;
            gst::Element::link_many([&src, &raw, &encoder, &parser, &queue])
                .context("failed to link wayland chain")?;
        }
        VideoSourceVariant::FileDemux(path) => {
            let src = gst::ElementFactory::make("filesrc")
                .property("location", path)
                .build()
                .context("failed to create filesrc")?;
            let demux = make("tsdemux")?;
            bin.add_many([&src, &demux, &parser, &queue])
                .context("failed to add file-demux elements")?;
            src.link(&demux).context("failed to link filesrc to demuxer")?;
            parser.link(&queue).context("failed to link parser to queue")?;
            let parser_weak = parser.downgrade();
            demux.connect_pad_added(move |_, pad| {
                let Some(parser) = parser_weak.upgrade() else {
                    return;
                };
                let caps = pad
                    .current_caps()
                    .unwrap_or_else(|| pad.query_caps(None));
                let desc = caps.to_string();
                if !desc.contains("video") && !desc.contains("h264") {
                    return;
                }
                let Some(sink) = parser.static_pad("sink") else {
                    return;
                };
                if sink.is_linked() {
                    return;
                }
                if let Err(err) = pad.link(&sink) {
                    tracing::warn!(?err, "failed to link demuxed video pad");
                }
            });
        }
    }

    ghost_src_pad(&bin, &queue)?;
    Ok(bin)
}

fn build_audio_bin(config: &SourceConfig, neg: &NegotiatedConfig) -> anyhow::Result<gst::Bin> {
    let bin = gst::Bin::builder().name("audio-src-bin").build();
    let queue = make("queue")?;

    let mut src_builder = gst::ElementFactory::make("pulsesrc")
        .property("do-timestamp", config.audio_do_timestamp)
        .property("buffer-time", config.audio_buffer_time as i64)
        .property("latency-time", config.audio_latency_time as i64);
    if let Some(device) = &config.audio_device {
        src_builder = src_builder.property("device", device);
    }

    match neg.audio.format {
        AudioFormat::Aac | AudioFormat::Ac3 => {
            let src = src_builder.build().context("failed to create audio source")?;
            let raw_caps = gst::Caps::builder("audio/x-raw")
                .field("format", "S16LE")
                .field("rate", neg.audio.frequency as i32)
                .field("channels", i32::from(neg.audio.channels))
                .build();
            let raw = capsfilter(&raw_caps)?;
            let encoder_name = if neg.audio.format == AudioFormat::Aac {
                &config.audio_encoder_aac_name
            } else {
                &config.audio_encoder_ac3_name
            };
            let encoder = make(encoder_name)?;
            tune(&encoder, "compliance", "-2");
            tune(&encoder, "tolerance", "400000000");
            tune(&encoder, "bitrate", "128000");
            tune(&encoder, "rate-control", "2");
            bin.add_many([&src, &raw, &encoder, &queue])
                .context("failed to add audio elements")?;
            gst::Element::link_many([&src, &raw, &encoder, &queue])
                .context("failed to link audio chain")?;
        }
        AudioFormat::Lpcm => {
            // LPCM rides the TS uncompressed: one 1920-byte block per
            // 10 ms at 48 kHz stereo S16.
            let src = src_builder
                .property("blocksize", 1920u32)
                .build()
                .context("failed to create audio source")?;
            let lpcm_caps = gst::Caps::builder("audio/x-lpcm")
                .field("format", "S16BE")
                .field("rate", 48_000i32)
                .field("channels", 2i32)
                .build();
            let setter = gst::ElementFactory::make("capssetter")
                .property("caps", &lpcm_caps)
                .property("join", false)
                .build()
                .context("failed to create capssetter")?;
            let filter = capsfilter(&lpcm_caps)?;
            bin.add_many([&src, &setter, &filter, &queue])
                .context("failed to add lpcm elements")?;
            gst::Element::link_many([&src, &setter, &filter, &queue])
                .context("failed to link lpcm chain")?;
        }
    }

    ghost_src_pad(&bin, &queue)?;
    Ok(bin)
}

fn assemble(
    pipeline: &gst::Pipeline,
    config: &SourceConfig,
    variant: &VideoSourceVariant,
    neg: &NegotiatedConfig,
    sink_host: &str,
    server_rtp_ports: (u16, u16),
) -> anyhow::Result<Pipeline> {
    let video_bin = build_video_bin(config, variant, neg)?;
    let audio_bin = build_audio_bin(config, neg)?;

    let mux = gst::ElementFactory::make("mpegtsmux")
        .name("mux")
        .property("alignment", 7i32)
        .build()
        .context("failed to create mpegtsmux")?;
    tune(&mux, "wfd-mode", "true");

    let mux_queue = gst::ElementFactory::make("queue")
        .name("mux-queue")
        .property("max-size-buffers", MUX_QUEUE_MAX_BUFFERS)
        .property("max-size-bytes", 0u32)
        .property("max-size-time", 0u64)
        .build()
        .context("failed to create mux queue")?;

    let payloader = gst::ElementFactory::make("rtpmp2tpay")
        .name("pay")
        .property("pt", RTP_PAYLOAD_TYPE)
        .property("mtu", config.mtu_size)
        .build()
        .context("failed to create rtpmp2tpay")?;
    tune(&payloader, "rtp-flush", "true");

    let rtpsession = make("rtpsession")?;

    let rtp_sink = gst::ElementFactory::make("udpsink")
        .name("rtp-sink")
        .property("host", sink_host)
        .property("port", i32::from(neg.rtp_port0))
        .property("buffer-size", DEFAULT_BUFFER_SIZE)
        .property("sync", false)
        .property("async", false)
        .build()
        .context("failed to create rtp udpsink")?;

    let rtcp_port = if neg.rtp_port1 != 0 {
        neg.rtp_port1
    } else {
        neg.rtp_port0 + 1
    };
    let rtcp_sink = gst::ElementFactory::make("udpsink")
        .name("rtcp-sink")
        .property("host", sink_host)
        .property("port", i32::from(rtcp_port))
        .property("sync", false)
        .property("async", false)
        .build()
        .context("failed to create rtcp udpsink")?;

    let rtcp_src = gst::ElementFactory::make("udpsrc")
        .name("rtcp-src")
        .property("port", i32::from(server_rtp_ports.1))
        .property("caps", &gst::Caps::builder("application/x-rtcp").build())
        .build()
        .context("failed to create rtcp udpsrc")?;

    pipeline
        .add_many([
            video_bin.upcast_ref::<gst::Element>(),
            audio_bin.upcast_ref(),
            &mux,
            &mux_queue,
            &payloader,
            &rtpsession,
            &rtp_sink,
            &rtcp_sink,
            &rtcp_src,
        ])
        .context("failed to add elements to pipeline")?;

    // Elementary streams land on their fixed PIDs via pad names.
    let mux_video_pad = mux
        .request_pad_simple(VIDEO_SINK_PAD)
        .with_context(|| format!("mpegtsmux refused pad {VIDEO_SINK_PAD}"))?;
    let mux_audio_pad = mux
        .request_pad_simple(AUDIO_SINK_PAD)
        .with_context(|| format!("mpegtsmux refused pad {AUDIO_SINK_PAD}"))?;

    let video_src = video_bin
        .static_pad("src")
        .context("video bin has no src pad")?;
    link_pads(&video_src, &mux_video_pad, "video bin to muxer")?;
    let audio_src = audio_bin
        .static_pad("src")
        .context("audio bin has no src pad")?;
    link_pads(&audio_src, &mux_audio_pad, "audio bin to muxer")?;

    mux.link(&mux_queue).context("failed to link muxer to queue")?;
    mux_queue
        .link(&payloader)
        .context("failed to link queue to payloader")?;

    // RTP/RTCP wire stage: payloader feeds an rtpsession so receiver
    // reports come back through the stats path.
    let session_rtp_sink = rtpsession
        .request_pad_simple("send_rtp_sink")
        .context("rtpsession refused send_rtp_sink")?;
    let pay_src = payloader
        .static_pad("src")
        .context("payloader has no src pad")?;
    link_pads(&pay_src, &session_rtp_sink, "payloader to rtp session")?;
    let session_rtp_src = rtpsession
        .static_pad("send_rtp_src")
        .context("rtpsession exposed no send_rtp_src")?;
    let udp_sink_pad = rtp_sink
        .static_pad("sink")
        .context("udpsink has no sink pad")?;
    link_pads(&session_rtp_src, &udp_sink_pad, "rtp session to udpsink")?;

    let session_rtcp_src = rtpsession
        .request_pad_simple("send_rtcp_src")
        .context("rtpsession refused send_rtcp_src")?;
    let rtcp_sink_pad = rtcp_sink
        .static_pad("sink")
        .context("rtcp udpsink has no sink pad")?;
    link_pads(&session_rtcp_src, &rtcp_sink_pad, "rtcp to udpsink")?;

    let session_rtcp_sink = rtpsession
        .request_pad_simple("recv_rtcp_sink")
        .context("rtpsession refused recv_rtcp_sink")?;
    let rtcp_src_pad = rtcp_src
        .static_pad("src")
        .context("rtcp udpsrc has no src pad")?;
    link_pads(&rtcp_src_pad, &session_rtcp_sink, "rtcp udpsrc to session")?;

    let stats = Arc::new(Mutex::new(RtpStats::default()));

    // Count every payloaded packet on its way out.
    let probe_stats = Arc::clone(&stats);
    pay_src.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
        if let Some(gst::PadProbeData::Buffer(buffer)) = &info.data {
            let mut s = probe_stats.lock().unwrap_or_else(|e| e.into_inner());
            s.sent_bytes += buffer.size() as u64;
            s.sent_packets += 1;
        }
        gst::PadProbeReturn::Ok
    });

    // Receiver reports: merged off the streaming thread under the stats
    // mutex; the first one enables the RTCP view.
    let rtcp_stats = Arc::clone(&stats);
    rtpsession.connect("on-ssrc-active", false, move |values| {
        if let Ok(source) = values[1].get::<gst::glib::Object>() {
            let s = source.property::<gst::Structure>("stats");
            if let Some(report) = crate::stats::report_from_structure(&s) {
                rtcp_stats
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .merge_receiver_report(report);
            }
        }
        None
    });

    if config.dump_ts {
        attach_dump_probe(&mux)?;
    }

    let error_flag = Arc::new(AtomicBool::new(false));
    let error_flag_watch = Arc::clone(&error_flag);
    let bus = pipeline.bus().context("pipeline has no bus")?;
    let _bus_watch = bus
        .add_watch(move |_, msg| {
            use gst::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    tracing::error!(
                        source = ?err.src().map(|s| s.name().to_string()),
                        error = %err.error(),
                        debug = ?err.debug(),
                        "pipeline error"
                    );
                    error_flag_watch.store(true, Ordering::Relaxed);
                }
                MessageView::Warning(warn) => {
                    tracing::warn!(
                        source = ?warn.src().map(|s| s.name().to_string()),
                        warning = %warn.error(),
                        "pipeline warning"
                    );
                }
                _ => {}
            }
            gst::glib::ControlFlow::Continue
        })
        .context("failed to add bus watch")?;

    let pay_sink_pad = payloader
        .static_pad("sink")
        .context("payloader has no sink pad")?;
    let swap = Arc::new(SwapCtx::new(
        pipeline.clone(),
        video_bin.clone(),
        audio_bin.clone(),
        mux.clone(),
        mux_queue.clone(),
        pay_sink_pad,
    ));

    tracing::info!(
        variant = ?variant,
        width = neg.video.width,
        height = neg.video.height,
        framerate = neg.video.framerate,
        audio = neg.audio.format.as_str(),
        video_pid = VIDEO_PID,
        audio_pid = AUDIO_PID,
        rtp_port = neg.rtp_port0,
        mtu = config.mtu_size,
        "pipeline assembled"
    );

    Ok(Pipeline {
        pipeline: pipeline.clone(),
        mux,
        payloader,
        stats,
        error_flag,
        _bus_watch,
        swap,
    })
}

fn attach_dump_probe(mux: &gst::Element) -> anyhow::Result<()> {
    let pad = mux.static_pad("src").context("muxer has no src pad")?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(DUMP_TS_PATH)
        .with_context(|| format!("failed to open {DUMP_TS_PATH}"))?;
    let file = Arc::new(Mutex::new(file));
    pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
        if let Some(gst::PadProbeData::Buffer(buffer)) = &info.data
            && let Ok(map) = buffer.map_readable()
        {
            use std::io::Write;
            let mut f = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = f.write_all(map.as_slice());
        }
        gst::PadProbeReturn::Ok
    });
    tracing::info!(path = DUMP_TS_PATH, "dumping muxed TS");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_parse() {
        assert_eq!(
            VideoSourceVariant::from_name("x-capture"),
            Some(VideoSourceVariant::XCapture)
        );
        assert_eq!(
            VideoSourceVariant::from_name("videotest"),
            Some(VideoSourceVariant::VideoTest)
        );
        assert_eq!(
            VideoSourceVariant::from_name("file-demux:/tmp/a.ts"),
            Some(VideoSourceVariant::FileDemux("/tmp/a.ts".to_string()))
        );
        assert_eq!(VideoSourceVariant::from_name("file-demux:"), None);
        assert_eq!(VideoSourceVariant::from_name("bogus"), None);
    }

    #[test]
    fn pad_names_encode_the_fixed_pids() {
        assert_eq!(VIDEO_SINK_PAD, format!("sink_{VIDEO_PID}"));
        assert_eq!(AUDIO_SINK_PAD, format!("sink_{AUDIO_PID}"));
        assert_eq!(VIDEO_PID, 4113);
        assert_eq!(AUDIO_PID, 4352);
    }
}
