use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wfdcast_protocol::SourceCaps;
use wfdcast_protocol::caps::{FREQ_44100, FREQ_48000, LEVEL_3_1, PROFILE_BASELINE};
use wfdcast_protocol::message::AudioFormat;

/// A forced output resolution, overriding the negotiated mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Source-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Address advertised in the presentation URL. Empty means "use the
    /// local address of the accepted connection".
    #[serde(default)]
    pub host_address: String,
    /// Video source stage: "x-capture", "xv-capture", "camera",
    /// "videotest", "wayland", or "file-demux:<path>".
    #[serde(default = "default_video_src_variant")]
    pub video_src_variant: String,
    /// Capture device for the audio source (element default if absent)
    pub audio_device: Option<String>,
    /// Audio capture latency-time in microseconds
    #[serde(default = "default_audio_latency_time")]
    pub audio_latency_time: u64,
    /// Audio capture buffer-time in microseconds
    #[serde(default = "default_audio_buffer_time")]
    pub audio_buffer_time: u64,
    #[serde(default = "default_true")]
    pub audio_do_timestamp: bool,
    /// MTU handed to the RTP payloader
    #[serde(default = "default_mtu_size")]
    pub mtu_size: u32,
    #[serde(default = "default_video_encoder_name")]
    pub video_encoder_name: String,
    #[serde(default = "default_audio_encoder_aac_name")]
    pub audio_encoder_aac_name: String,
    #[serde(default = "default_audio_encoder_ac3_name")]
    pub audio_encoder_ac3_name: String,
    /// Append every muxed TS buffer to /root/probe.ts
    #[serde(default)]
    pub dump_ts: bool,
    /// Force the encoder resolution instead of the negotiated mode
    pub negotiated_resolution: Option<Resolution>,
    /// Codecs the source offers, comma separated: "aac,lpcm,ac3"
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// CEA resolution bitmap the source offers
    #[serde(default = "default_video_resolution_supported")]
    pub video_resolution_supported: u32,
    /// Native byte: family tag in the low 3 bits, bitmap index above
    #[serde(default = "default_video_native_resolution")]
    pub video_native_resolution: u8,
}

fn default_video_src_variant() -> String {
    "videotest".to_string()
}

fn default_audio_latency_time() -> u64 {
    10_000
}

fn default_audio_buffer_time() -> u64 {
    200_000
}

fn default_true() -> bool {
    true
}

fn default_mtu_size() -> u32 {
    1400
}

fn default_video_encoder_name() -> String {
    "x264enc".to_string()
}

fn default_audio_encoder_aac_name() -> String {
    "avenc_aac".to_string()
}

fn default_audio_encoder_ac3_name() -> String {
    "avenc_ac3".to_string()
}

fn default_audio_codec() -> String {
    "aac,lpcm".to_string()
}

fn default_video_resolution_supported() -> u32 {
    1 << 6 // 1280x720p30
}

fn default_video_native_resolution() -> u8 {
    0x30 // CEA family, bit 6
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host_address: String::new(),
            video_src_variant: default_video_src_variant(),
            audio_device: None,
            audio_latency_time: default_audio_latency_time(),
            audio_buffer_time: default_audio_buffer_time(),
            audio_do_timestamp: true,
            mtu_size: default_mtu_size(),
            video_encoder_name: default_video_encoder_name(),
            audio_encoder_aac_name: default_audio_encoder_aac_name(),
            audio_encoder_ac3_name: default_audio_encoder_ac3_name(),
            dump_ts: false,
            negotiated_resolution: None,
            audio_codec: default_audio_codec(),
            video_resolution_supported: default_video_resolution_supported(),
            video_native_resolution: default_video_native_resolution(),
        }
    }
}

impl SourceConfig {
    /// Codec-offer bitmap parsed from `audio_codec`. Unknown tokens are
    /// reported by [`SourceConfig::validate`], not here.
    pub fn audio_format_bitmap(&self) -> u8 {
        self.audio_codec
            .split(',')
            .filter_map(|tok| match tok.trim() {
                "lpcm" => Some(AudioFormat::Lpcm.bit()),
                "aac" => Some(AudioFormat::Aac.bit()),
                "ac3" => Some(AudioFormat::Ac3.bit()),
                _ => None,
            })
            .fold(0, |acc, b| acc | b)
    }

    /// The capability set this source puts on the table.
    pub fn source_caps(&self) -> SourceCaps {
        SourceCaps {
            audio_formats: self.audio_format_bitmap(),
            audio_freqs: FREQ_48000 | FREQ_44100,
            audio_latency: 0,
            native: self.video_native_resolution,
            cea: self.video_resolution_supported,
            vesa: 0,
            hh: 0,
            profile: PROFILE_BASELINE,
            level: LEVEL_3_1,
            hdcp: None,
        }
    }

    /// Validate configuration semantics.
    ///
    /// Issues are prefixed with "ERROR:" (fatal) or "WARNING:"
    /// (advisory). Returns `Ok(())` if no issues.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        let variant = self.video_src_variant.as_str();
        let known = ["x-capture", "xv-capture", "camera", "videotest", "wayland"];
        if !known.contains(&variant) && !variant.starts_with("file-demux:") {
            issues.push(format!(
                "ERROR: video_src_variant '{variant}' is not one of \
                 x-capture, xv-capture, camera, videotest, wayland, file-demux:<path>"
            ));
        }

        if self.audio_format_bitmap() == 0 {
            issues.push(format!(
                "ERROR: audio_codec '{}' names no known codec (lpcm, aac, ac3)",
                self.audio_codec
            ));
        }
        for tok in self.audio_codec.split(',') {
            let tok = tok.trim();
            if !tok.is_empty() && !["lpcm", "aac", "ac3"].contains(&tok) {
                issues.push(format!("WARNING: unknown audio codec '{tok}' ignored"));
            }
        }

        if self.video_resolution_supported == 0 {
            issues.push("ERROR: video_resolution_supported is empty".to_string());
        }

        if !(576..=65_000).contains(&self.mtu_size) {
            issues.push(format!(
                "WARNING: mtu_size {} is outside the usual 576..65000 range",
                self.mtu_size
            ));
        }

        if self.audio_latency_time > self.audio_buffer_time {
            issues.push(format!(
                "WARNING: audio_latency_time {} exceeds audio_buffer_time {}",
                self.audio_latency_time, self.audio_buffer_time
            ));
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

/// Load configuration from a TOML file at the given path.
/// If the file doesn't exist, returns default configuration.
pub fn load_config(path: &Path) -> Result<SourceConfig> {
    if !path.exists() {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(SourceConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: SourceConfig =
        toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: SourceConfig = toml::from_str("").unwrap();
        assert_eq!(config.video_src_variant, "videotest");
        assert_eq!(config.mtu_size, 1400);
        assert_eq!(config.audio_latency_time, 10_000);
        assert_eq!(config.audio_buffer_time, 200_000);
        assert!(config.audio_do_timestamp);
        assert_eq!(config.video_encoder_name, "x264enc");
        assert_eq!(config.audio_encoder_aac_name, "avenc_aac");
        assert_eq!(config.audio_encoder_ac3_name, "avenc_ac3");
        assert!(!config.dump_ts);
        assert!(config.negotiated_resolution.is_none());
        assert_eq!(config.audio_codec, "aac,lpcm");
        assert_eq!(config.video_resolution_supported, 1 << 6);
        assert_eq!(config.video_native_resolution, 0x30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn audio_format_bitmap_from_tokens() {
        let mut config = SourceConfig::default();
        config.audio_codec = "aac,lpcm,ac3".to_string();
        assert_eq!(
            config.audio_format_bitmap(),
            AudioFormat::Lpcm.bit() | AudioFormat::Aac.bit() | AudioFormat::Ac3.bit()
        );
        config.audio_codec = "lpcm".to_string();
        assert_eq!(config.audio_format_bitmap(), AudioFormat::Lpcm.bit());
    }

    #[test]
    fn validate_rejects_unknown_variant() {
        let mut config = SourceConfig::default();
        config.video_src_variant = "hologram".to_string();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:")));
    }

    #[test]
    fn validate_accepts_file_demux_with_path() {
        let mut config = SourceConfig::default();
        config.video_src_variant = "file-demux:/tmp/clip.ts".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_codec_set() {
        let mut config = SourceConfig::default();
        config.audio_codec = "flac".to_string();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("no known codec")));
    }

    #[test]
    fn config_parses_from_toml() {
        let config: SourceConfig = toml::from_str(
            r#"
            host_address = "192.0.2.1"
            video_src_variant = "x-capture"
            mtu_size = 1200
            dump_ts = true
            audio_codec = "ac3"

            [negotiated_resolution]
            width = 1920
            height = 1080
            "#,
        )
        .unwrap();
        assert_eq!(config.host_address, "192.0.2.1");
        assert_eq!(config.mtu_size, 1200);
        assert!(config.dump_ts);
        assert_eq!(config.audio_format_bitmap(), AudioFormat::Ac3.bit());
        assert_eq!(
            config.negotiated_resolution,
            Some(Resolution {
                width: 1920,
                height: 1080
            })
        );
    }
}
