//! Live hot-swap: substitute a file-backed MPEG-TS stream for the live
//! capture at the RTP payloader's sink pad, then restore live capture
//! when the file ends.
//!
//! The payloader itself is never restarted, so the sink sees one
//! unbroken RTP sequence across both swaps. All graph surgery happens
//! inside idle probes on streaming threads; bin teardown is deferred to
//! the GLib main loop. The probes are one-shot, guarded by a CAS flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use gstreamer::{self as gst, prelude::*};

use crate::error::SourceError;
use crate::pipeline::{AUDIO_SINK_PAD, VIDEO_SINK_PAD};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const SWAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker event pushed instead of the file's EOS so the payloader keeps
/// running.
const FILL_EOS_NAME: &str = "fillEOS";

/// What URI discovery learned about the media behind a URI.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    pub source_factory: Option<String>,
    pub demux_factory: Option<String>,
    pub has_h264: bool,
    pub has_aac: bool,
    pub has_ac3: bool,
}

/// Probe a URI with a throw-away `uridecodebin → queue → fakesink`
/// graph, recording the source and demuxer factories the auto-plugger
/// picks plus which decoders appear.
pub fn discover(uri: &str) -> Result<MediaProbe, SourceError> {
    let pipeline = gst::Pipeline::new();
    let decodebin = gst::ElementFactory::make("uridecodebin")
        .property("uri", uri)
        .build()
        .map_err(|e| SourceError::BuildFailed(e.into()))?;
    pipeline
        .add(&decodebin)
        .map_err(|e| SourceError::BuildFailed(e.into()))?;

    let state = Arc::new(Mutex::new(MediaProbe::default()));
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

    let probe_state = Arc::clone(&state);
    decodebin.connect("source-setup", false, move |values| {
        if let Ok(element) = values[1].get::<gst::Element>()
            && let Some(factory) = element.factory()
        {
            probe_state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .source_factory = Some(factory.name().to_string());
        }
        None
    });

    let probe_state = Arc::clone(&state);
    pipeline.connect_deep_element_added(move |_, _, element| {
        let Some(factory) = element.factory() else {
            return;
        };
        let name = factory.name().to_string();
        let klass = factory.metadata(gst::ELEMENT_METADATA_KLASS).unwrap_or("");
        let mut probe = probe_state.lock().unwrap_or_else(|e| e.into_inner());
        if klass.contains("Demuxer") && probe.demux_factory.is_none() {
            probe.demux_factory = Some(name.clone());
        }
        if klass.contains("Decoder") {
            let lname = name.to_ascii_lowercase();
            if lname.contains("h264") {
                probe.has_h264 = true;
            }
            if lname.contains("aac") {
                probe.has_aac = true;
            }
            if lname.contains("ac3") {
                probe.has_ac3 = true;
            }
        }
    });

    let pipeline_weak = pipeline.downgrade();
    let probe_state = Arc::clone(&state);
    decodebin.connect_pad_added(move |_, pad| {
        let Some(pipeline) = pipeline_weak.upgrade() else {
            return;
        };
        let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
        let desc = caps.to_string();
        {
            let mut probe = probe_state.lock().unwrap_or_else(|e| e.into_inner());
            if desc.contains("video/x-h264") {
                probe.has_h264 = true;
            }
            if desc.contains("audio/mpeg") {
                probe.has_aac = true;
            }
            if desc.contains("audio/x-ac3") {
                probe.has_ac3 = true;
            }
        }
        let Ok(queue) = gst::ElementFactory::make("queue").build() else {
            return;
        };
        let Ok(fakesink) = gst::ElementFactory::make("fakesink")
            .property("sync", false)
            .build()
        else {
            return;
        };
        if pipeline.add_many([&queue, &fakesink]).is_err() {
            return;
        }
        let _ = queue.link(&fakesink);
        let _ = queue.sync_state_with_parent();
        let _ = fakesink.sync_state_with_parent();
        if let Some(sink) = queue.static_pad("sink") {
            let _ = pad.link(&sink);
        }
    });

    decodebin.connect_no_more_pads(move |_| {
        let _ = done_tx.send(());
    });

    if pipeline.set_state(gst::State::Paused).is_err() {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(SourceError::TypeDetectionFailed {
            uri: uri.to_string(),
        });
    }

    // Pump the bus until no-more-pads, an error, or the deadline.
    let bus = pipeline.bus();
    let deadline = Instant::now() + DISCOVERY_TIMEOUT;
    let mut failed = false;
    loop {
        if done_rx.try_recv().is_ok() {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(%uri, "discovery timed out");
            break;
        }
        let Some(bus) = &bus else { break };
        if let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(50)) {
            if let gst::MessageView::Error(err) = msg.view() {
                tracing::warn!(error = %err.error(), %uri, "discovery failed");
                failed = true;
                break;
            }
        }
    }
    let _ = pipeline.set_state(gst::State::Null);

    let probe = state.lock().unwrap_or_else(|e| e.into_inner()).clone();
    if failed || probe.source_factory.is_none() || probe.demux_factory.is_none() {
        return Err(SourceError::TypeDetectionFailed {
            uri: uri.to_string(),
        });
    }
    Ok(probe)
}

struct DirectBin {
    bin: gst::Bin,
    tsmux: gst::Element,
    /// Consumes the direct muxer's output until the swap takes it over.
    fakesink: Option<gst::Element>,
    /// Ghosted muxer src, linked to the payloader while swapped.
    ghost: Option<gst::GhostPad>,
}

/// Shared swap state between the session, the idle/EOS probes on
/// streaming threads, and the main-loop teardown step.
pub(crate) struct SwapCtx {
    pipeline: gst::Pipeline,
    video_bin: gst::Bin,
    audio_bin: gst::Bin,
    mux: gst::Element,
    mux_queue: gst::Element,
    pay_sink_pad: gst::Pad,
    /// One-shot reentry guard: two idle probes may fire concurrently
    /// from different streaming threads.
    in_pad_probe: AtomicBool,
    /// True while the payloader is fed by the direct pipeline.
    linked: AtomicBool,
    /// Set once discovery has produced a usable source/demuxer; cleared
    /// when the direct bin is gone. The swap probe refuses to run
    /// without it, and it keeps a second direct stream from being
    /// staged while one is in flight.
    type_detected: AtomicBool,
    direct: Mutex<Option<DirectBin>>,
    live_fakesink: Mutex<Option<gst::Element>>,
    end_handler: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl SwapCtx {
    pub(crate) fn new(
        pipeline: gst::Pipeline,
        video_bin: gst::Bin,
        audio_bin: gst::Bin,
        mux: gst::Element,
        mux_queue: gst::Element,
        pay_sink_pad: gst::Pad,
    ) -> Self {
        Self {
            pipeline,
            video_bin,
            audio_bin,
            mux,
            mux_queue,
            pay_sink_pad,
            in_pad_probe: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            type_detected: AtomicBool::new(false),
            direct: Mutex::new(None),
            live_fakesink: Mutex::new(None),
            end_handler: Mutex::new(None),
        }
    }

    pub(crate) fn set_end_handler(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        *self.end_handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }
}

/// Swap the payloader's upstream to a file pipeline. Resolves once the
/// idle probe has fully reattached; the live graph is untouched on
/// failure.
pub(crate) async fn engage(ctx: Arc<SwapCtx>, uri: String) -> Result<(), SourceError> {
    if ctx.linked.load(Ordering::SeqCst) || ctx.type_detected.load(Ordering::SeqCst) {
        return Err(SourceError::SwapAborted(
            "direct stream already active".to_string(),
        ));
    }

    let probe_uri = uri.clone();
    let probe = tokio::task::spawn_blocking(move || discover(&probe_uri))
        .await
        .map_err(|e| SourceError::SwapAborted(format!("discovery task died: {e}")))??;
    ctx.type_detected.store(true, Ordering::SeqCst);
    tracing::info!(
        source = probe.source_factory.as_deref().unwrap_or("?"),
        demux = probe.demux_factory.as_deref().unwrap_or("?"),
        has_h264 = probe.has_h264,
        has_aac = probe.has_aac,
        has_ac3 = probe.has_ac3,
        %uri,
        "direct stream media detected"
    );

    let direct = match build_direct_bin(&uri, &probe) {
        Ok(direct) => direct,
        Err(e) => {
            ctx.type_detected.store(false, Ordering::SeqCst);
            return Err(SourceError::BuildFailed(e));
        }
    };
    if let Err(e) = ctx.pipeline.add(&direct.bin) {
        ctx.type_detected.store(false, Ordering::SeqCst);
        return Err(SourceError::BuildFailed(e.into()));
    }
    if let Err(e) = direct.bin.sync_state_with_parent() {
        let _ = direct.bin.set_state(gst::State::Null);
        let _ = ctx.pipeline.remove(&direct.bin);
        ctx.type_detected.store(false, Ordering::SeqCst);
        return Err(SourceError::BuildFailed(e.into()));
    }
    *ctx.direct.lock().unwrap_or_else(|e| e.into_inner()) = Some(direct);

    ctx.in_pad_probe.store(false, Ordering::SeqCst);
    let (tx, rx) = tokio::sync::oneshot::channel::<Result<(), String>>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let probe_ctx = Arc::clone(&ctx);
    ctx.pay_sink_pad
        .add_probe(gst::PadProbeType::IDLE, move |_pad, _info| {
            if probe_ctx
                .in_pad_probe
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return gst::PadProbeReturn::Remove;
            }
            let result = forward_swap(&probe_ctx);
            if let Some(tx) = tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(result);
            }
            gst::PadProbeReturn::Remove
        });

    match tokio::time::timeout(SWAP_TIMEOUT, rx).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(msg))) => {
            abandon_direct(&ctx);
            return Err(SourceError::SwapAborted(msg));
        }
        Ok(Err(_)) | Err(_) => {
            abandon_direct(&ctx);
            return Err(SourceError::SwapAborted(
                "swap probe never completed".to_string(),
            ));
        }
    }

    install_eos_watch(&ctx);
    tracing::info!(%uri, "direct stream engaged");
    Ok(())
}

/// Streaming-thread half of the forward swap. Runs inside the idle
/// probe; the pad is quiescent while this executes.
fn forward_swap(ctx: &SwapCtx) -> Result<(), String> {
    if !ctx.type_detected.load(Ordering::SeqCst) {
        return Err("no detected media type behind the direct pipeline".to_string());
    }
    let mut direct_guard = ctx.direct.lock().unwrap_or_else(|e| e.into_inner());
    let direct = direct_guard
        .as_mut()
        .ok_or_else(|| "no direct pipeline staged".to_string())?;

    let q_src = ctx
        .mux_queue
        .static_pad("src")
        .ok_or_else(|| "mux queue has no src pad".to_string())?;
    let ts_src = direct
        .tsmux
        .static_pad("src")
        .ok_or_else(|| "direct muxer has no src pad".to_string())?;

    let _ = q_src.unlink(&ctx.pay_sink_pad);

    if let Some(fakesink) = direct.fakesink.take() {
        if let Some(fs_sink) = fakesink.static_pad("sink") {
            let _ = ts_src.unlink(&fs_sink);
        }
        let _ = fakesink.set_state(gst::State::Null);
        let _ = direct.bin.remove(&fakesink);
    }

    let ghost = gst::GhostPad::builder_with_target(&ts_src)
        .map_err(|e| format!("failed to ghost direct muxer src: {e}"))?
        .name("src")
        .build();
    let _ = ghost.set_active(true);
    direct
        .bin
        .add_pad(&ghost)
        .map_err(|e| format!("failed to add ghost pad: {e}"))?;
    if let Err(err) = ghost.link(&ctx.pay_sink_pad) {
        // Leave the live graph working if the swap cannot complete.
        let _ = q_src.link(&ctx.pay_sink_pad);
        return Err(format!("failed to link direct muxer to payloader: {err:?}"));
    }
    direct.ghost = Some(ghost);

    // Park the live branch behind a fakesink so it drains freely.
    let fakesink = gst::ElementFactory::make("fakesink")
        .property("sync", false)
        .property("async", false)
        .build()
        .map_err(|e| format!("failed to create parking fakesink: {e}"))?;
    ctx.pipeline
        .add(&fakesink)
        .map_err(|e| format!("failed to add parking fakesink: {e}"))?;
    if let Some(fs_sink) = fakesink.static_pad("sink") {
        let _ = q_src.link(&fs_sink);
    }
    let _ = fakesink.sync_state_with_parent();
    *ctx.live_fakesink.lock().unwrap_or_else(|e| e.into_inner()) = Some(fakesink);

    let _ = ctx.video_bin.set_state(gst::State::Paused);
    let _ = ctx.audio_bin.set_state(gst::State::Paused);
    let _ = ctx.mux.set_state(gst::State::Paused);
    let _ = ctx.mux_queue.set_state(gst::State::Paused);

    ctx.linked.store(true, Ordering::SeqCst);
    Ok(())
}

/// Watch for the file's EOS at the payloader: swallow it (replace with
/// a filler marker) and schedule the reverse swap on the main loop.
fn install_eos_watch(ctx: &Arc<SwapCtx>) {
    let watch_ctx = Arc::clone(ctx);
    ctx.pay_sink_pad
        .add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, move |_pad, info| {
            let is_eos = matches!(
                &info.data,
                Some(gst::PadProbeData::Event(ev)) if ev.type_() == gst::EventType::Eos
            );
            if !is_eos {
                return gst::PadProbeReturn::Ok;
            }
            let filler =
                gst::event::CustomDownstream::new(gst::Structure::builder(FILL_EOS_NAME).build());
            info.data = Some(gst::PadProbeData::Event(filler));
            let restore_ctx = Arc::clone(&watch_ctx);
            main_loop_invoke(move || restore_live(&restore_ctx));
            gst::PadProbeReturn::Remove
        });
}

/// Main-loop half of the reverse swap: wake the live branches, relink
/// under an idle probe, then tear the direct bin down.
fn restore_live(ctx: &Arc<SwapCtx>) {
    tracing::info!("direct stream ended, restoring live capture");
    for element in [
        ctx.video_bin.upcast_ref::<gst::Element>(),
        ctx.audio_bin.upcast_ref(),
        &ctx.mux,
        &ctx.mux_queue,
    ] {
        let _ = element.sync_state_with_parent();
    }

    ctx.in_pad_probe.store(false, Ordering::SeqCst);
    let probe_ctx = Arc::clone(ctx);
    ctx.pay_sink_pad
        .add_probe(gst::PadProbeType::IDLE, move |_pad, _info| {
            if probe_ctx
                .in_pad_probe
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return gst::PadProbeReturn::Remove;
            }
            if let Err(msg) = reverse_swap(&probe_ctx) {
                tracing::warn!(%msg, "reverse swap failed");
            }
            let teardown_ctx = Arc::clone(&probe_ctx);
            main_loop_invoke(move || teardown_direct(&teardown_ctx));
            gst::PadProbeReturn::Remove
        });
}

fn reverse_swap(ctx: &SwapCtx) -> Result<(), String> {
    let q_src = ctx
        .mux_queue
        .static_pad("src")
        .ok_or_else(|| "mux queue has no src pad".to_string())?;

    if let Some(direct) = ctx
        .direct
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_mut()
        && let Some(ghost) = direct.ghost.take()
    {
        let _ = ghost.unlink(&ctx.pay_sink_pad);
    }

    if let Some(fakesink) = ctx
        .live_fakesink
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    {
        if let Some(fs_sink) = fakesink.static_pad("sink") {
            let _ = q_src.unlink(&fs_sink);
        }
        let _ = fakesink.set_state(gst::State::Null);
        let _ = ctx.pipeline.remove(&fakesink);
    }

    q_src
        .link(&ctx.pay_sink_pad)
        .map_err(|err| format!("failed to relink live muxer queue: {err:?}"))?;
    ctx.linked.store(false, Ordering::SeqCst);
    Ok(())
}

/// Runs on the main loop: drop the direct bin and notify the observer.
fn teardown_direct(ctx: &Arc<SwapCtx>) {
    if let Some(direct) = ctx.direct.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = direct.bin.set_state(gst::State::Null);
        let _ = ctx.pipeline.remove(&direct.bin);
    }
    ctx.type_detected.store(false, Ordering::SeqCst);
    let handler = ctx
        .end_handler
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    if let Some(handler) = handler {
        handler();
    }
    tracing::info!("live capture restored");
}

/// Failed before the swap took effect: discard the staged bin.
fn abandon_direct(ctx: &Arc<SwapCtx>) {
    if let Some(direct) = ctx.direct.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = direct.bin.set_state(gst::State::Null);
        let _ = ctx.pipeline.remove(&direct.bin);
    }
    ctx.type_detected.store(false, Ordering::SeqCst);
}

fn main_loop_invoke<F: FnOnce() + Send + 'static>(func: F) {
    gst::glib::MainContext::default().invoke(func);
}

fn build_direct_bin(uri: &str, probe: &MediaProbe) -> anyhow::Result<DirectBin> {
    let source_factory = probe
        .source_factory
        .as_deref()
        .context("discovery produced no source factory")?;
    let demux_factory = probe
        .demux_factory
        .as_deref()
        .context("discovery produced no demuxer factory")?;

    let bin = gst::Bin::builder().name("direct-bin").build();
    let source = gst::ElementFactory::make(source_factory)
        .build()
        .with_context(|| format!("failed to create {source_factory}"))?;
    apply_uri(&source, uri);
    let demux = gst::ElementFactory::make(demux_factory)
        .build()
        .with_context(|| format!("failed to create {demux_factory}"))?;

    let tsmux = gst::ElementFactory::make("mpegtsmux")
        .property("alignment", 7i32)
        .build()
        .context("failed to create direct mpegtsmux")?;
    if tsmux.find_property("wfd-mode").is_some() {
        tsmux.set_property_from_str("wfd-mode", "true");
    }
    let fakesink = gst::ElementFactory::make("fakesink")
        .property("sync", false)
        .property("async", false)
        .build()
        .context("failed to create direct fakesink")?;

    let video_parse = gst::ElementFactory::make("h264parse")
        .build()
        .context("failed to create h264parse")?;
    let video_queue = gst::ElementFactory::make("queue")
        .build()
        .context("failed to create video queue")?;

    bin.add_many([&source, &demux, &video_parse, &video_queue, &tsmux, &fakesink])
        .context("failed to add direct elements")?;
    source
        .link(&demux)
        .context("failed to link source to demuxer")?;
    video_parse
        .link(&video_queue)
        .context("failed to link h264parse to queue")?;
    let mux_video_pad = tsmux
        .request_pad_simple(VIDEO_SINK_PAD)
        .with_context(|| format!("direct muxer refused pad {VIDEO_SINK_PAD}"))?;
    video_queue
        .static_pad("src")
        .context("video queue has no src pad")?
        .link(&mux_video_pad)
        .map_err(|err| anyhow::anyhow!("failed to link video queue to muxer: {err:?}"))?;

    // Audio branch only when the file actually carries one.
    let audio_parse = if probe.has_aac || probe.has_ac3 {
        let parser_name = if probe.has_ac3 { "ac3parse" } else { "aacparse" };
        let audio_parse = gst::ElementFactory::make(parser_name)
            .build()
            .with_context(|| format!("failed to create {parser_name}"))?;
        let audio_queue = gst::ElementFactory::make("queue")
            .build()
            .context("failed to create audio queue")?;
        bin.add_many([&audio_parse, &audio_queue])
            .context("failed to add direct audio elements")?;
        audio_parse
            .link(&audio_queue)
            .context("failed to link audio parse to queue")?;
        let mux_audio_pad = tsmux
            .request_pad_simple(AUDIO_SINK_PAD)
            .with_context(|| format!("direct muxer refused pad {AUDIO_SINK_PAD}"))?;
        audio_queue
            .static_pad("src")
            .context("audio queue has no src pad")?
            .link(&mux_audio_pad)
            .map_err(|err| anyhow::anyhow!("failed to link audio queue to muxer: {err:?}"))?;
        Some(audio_parse)
    } else {
        None
    };

    tsmux
        .link(&fakesink)
        .context("failed to link direct muxer to fakesink")?;

    // Demuxer pads appear per elementary stream; route by caps sniffing.
    let video_weak = video_parse.downgrade();
    let audio_weak = audio_parse.as_ref().map(|p| p.downgrade());
    demux.connect_pad_added(move |_, pad| {
        let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
        let desc = caps.to_string();
        let target = if desc.contains("video") || desc.contains("h264") {
            video_weak.upgrade()
        } else if desc.contains("audio") {
            audio_weak.as_ref().and_then(|w| w.upgrade())
        } else {
            None
        };
        let Some(target) = target else {
            tracing::debug!(caps = %desc, "ignoring demuxed pad");
            return;
        };
        let Some(sink) = target.static_pad("sink") else {
            return;
        };
        if sink.is_linked() {
            return;
        }
        if let Err(err) = pad.link(&sink) {
            tracing::warn!(?err, caps = %desc, "failed to link demuxed pad");
        }
    });

    Ok(DirectBin {
        bin,
        tsmux,
        fakesink: Some(fakesink),
        ghost: None,
    })
}

fn apply_uri(source: &gst::Element, uri: &str) {
    if source.find_property("uri").is_some() {
        source.set_property("uri", uri);
    } else if source.find_property("location").is_some() {
        let location = uri.strip_prefix("file://").unwrap_or(uri);
        source.set_property("location", location);
    } else {
        tracing::warn!(element = %source.name(), "source takes neither uri nor location");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_uri_strips_file_scheme_for_location_sources() {
        gst::init().unwrap();
        let filesrc = gst::ElementFactory::make("filesrc").build().unwrap();
        apply_uri(&filesrc, "file:///tmp/clip.ts");
        assert_eq!(
            filesrc.property::<Option<String>>("location").as_deref(),
            Some("/tmp/clip.ts")
        );
    }

    #[test]
    fn filler_event_carries_the_marker_structure() {
        gst::init().unwrap();
        let filler =
            gst::event::CustomDownstream::new(gst::Structure::builder(FILL_EOS_NAME).build());
        match filler.view() {
            gst::EventView::CustomDownstream(ev) => {
                assert_eq!(ev.structure().map(|s| s.name().as_str()), Some("fillEOS"));
            }
            other => panic!("expected custom downstream event, got {other:?}"),
        }
    }
}
