//! In-process stand-in for ffmpeg/ffprobe.
//!
//! "Audio" files are plain bytes with a one-line header:
//! `FAKEAUDIO <duration_secs> <sample_rate> <kbps> <tag>` followed by padding.
//! The tag is the content identity: decoding a segment yields bytes derived
//! from it, so two clips with the same tag hash the same.

use async_trait::async_trait;
use catalog_previews::media::{AudioMetadata, ConversionError, FfmpegOutput, MediaTool};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const HEADER_MAGIC: &str = "FAKEAUDIO";

/// Size of clips written by the fake encoder (above the minimum clip size).
pub const FAKE_CLIP_BYTES: usize = 40 * 1024;
/// Size of fake source files (above the minimum download size).
pub const FAKE_SOURCE_BYTES: usize = 16 * 1024;

/// Build a fake audio file.
pub fn fake_audio(duration_secs: f64, sample_rate: u32, kbps: u32, tag: &str, size: usize) -> Vec<u8> {
    let mut bytes = format!(
        "{} {} {} {} {}\n",
        HEADER_MAGIC, duration_secs, sample_rate, kbps, tag
    )
    .into_bytes();
    if bytes.len() < size {
        bytes.resize(size, b'.');
    }
    bytes
}

/// A typical downloaded song.
pub fn fake_source(tag: &str) -> Vec<u8> {
    fake_audio(200.0, 44_100, 320, tag, FAKE_SOURCE_BYTES)
}

#[derive(Debug, Clone, PartialEq)]
struct FakeHeader {
    duration_secs: f64,
    sample_rate: u32,
    kbps: u32,
    tag: String,
}

fn read_header(path: &Path) -> Result<FakeHeader, ConversionError> {
    let bytes = std::fs::read(path)?;
    let line_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let line = String::from_utf8_lossy(&bytes[..line_end]).to_string();
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 5 || parts[0] != HEADER_MAGIC {
        return Err(ConversionError::ProbeFailed(format!(
            "{:?}: Invalid data found when processing input",
            path
        )));
    }
    let parse_err = |what: &str| ConversionError::ProbeFailed(format!("bad {} in fake header", what));
    Ok(FakeHeader {
        duration_secs: parts[1].parse().map_err(|_| parse_err("duration"))?,
        sample_rate: parts[2].parse().map_err(|_| parse_err("sample rate"))?,
        kbps: parts[3].parse().map_err(|_| parse_err("bitrate"))?,
        tag: parts[4].to_string(),
    })
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

type EncodeHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakeMediaTool {
    failing_rungs: HashSet<&'static str>,
    fail_stream_copy: bool,
    calls: Mutex<Vec<Vec<String>>>,
    encode_hook: Mutex<Option<EncodeHook>>,
}

impl FakeMediaTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the encoder fail for these rungs ("full", "no_fades", "minimal").
    pub fn failing_rungs(mut self, rungs: &[&'static str]) -> Self {
        self.failing_rungs.extend(rungs.iter().copied());
        self
    }

    pub fn failing_stream_copy(mut self) -> Self {
        self.fail_stream_copy = true;
        self
    }

    /// Run `hook` after every successful transcode, e.g. to change the
    /// catalog while a song is in flight.
    pub fn on_encode(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.encode_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Every ffmpeg invocation so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of encoder invocations (stream copies and transcodes).
    pub fn encode_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|args| args.iter().any(|a| a == "libmp3lame"))
            .count()
    }

    fn rung_of(args: &[String]) -> &'static str {
        if args.iter().any(|a| a == "-af") {
            "full"
        } else if args.iter().any(|a| a == "-ar") {
            "no_fades"
        } else {
            "minimal"
        }
    }

    fn stream_copy(&self, args: &[String]) -> Result<FfmpegOutput, ConversionError> {
        if self.fail_stream_copy {
            return Err(ConversionError::ConversionFailed(
                "Server returned 403 Forbidden".to_string(),
            ));
        }
        let url = arg_after(args, "-i").unwrap_or_default();
        let tag = format!("stream-{}", url.rsplit('/').next().unwrap_or("x"));
        let dest = args.last().cloned().unwrap_or_default();
        std::fs::write(&dest, fake_audio(180.0, 44_100, 192, &tag, FAKE_SOURCE_BYTES))?;
        Ok(FfmpegOutput::default())
    }

    fn transcode(&self, args: &[String]) -> Result<FfmpegOutput, ConversionError> {
        let rung = Self::rung_of(args);
        if self.failing_rungs.contains(rung) {
            return Err(ConversionError::ConversionFailed(format!(
                "simulated {} failure",
                rung
            )));
        }

        let input = arg_after(args, "-i").unwrap_or_default();
        let source = read_header(Path::new(input))?;
        let start: f64 = arg_after(args, "-ss").and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let length: f64 = arg_after(args, "-t")
            .and_then(|v| v.parse().ok())
            .unwrap_or(source.duration_secs);
        let duration = length.min((source.duration_secs - start).max(0.0));
        let rate = arg_after(args, "-ar")
            .and_then(|v| v.parse().ok())
            .unwrap_or(source.sample_rate);
        let kbps = arg_after(args, "-b:a")
            .and_then(|v| v.trim_end_matches('k').parse().ok())
            .unwrap_or(source.kbps);

        let dest = args.last().cloned().unwrap_or_default();
        std::fs::write(
            &dest,
            fake_audio(duration, rate, kbps, &source.tag, FAKE_CLIP_BYTES),
        )?;
        if let Some(hook) = self.encode_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(FfmpegOutput::default())
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ConversionError> {
        let header = read_header(path)?;
        Ok(AudioMetadata {
            duration_ms: (header.duration_secs * 1000.0) as i64,
            codec: "mp3".to_string(),
            bitrate: Some(header.kbps as i32),
            sample_rate: Some(header.sample_rate as i32),
            channels: Some(2),
            format: "mp3".to_string(),
        })
    }

    async fn ffmpeg(
        &self,
        args: &[String],
        _timeout: Duration,
    ) -> Result<FfmpegOutput, ConversionError> {
        self.calls.lock().unwrap().push(args.to_vec());

        if args.iter().any(|a| a == "volumedetect") {
            let header = read_header(Path::new(arg_after(args, "-i").unwrap_or_default()))?;
            let volume = if header.tag.starts_with("silent") {
                "-inf"
            } else {
                "-18.0"
            };
            return Ok(FfmpegOutput {
                stdout: Vec::new(),
                stderr: format!("[Parsed_volumedetect_0 @ 0x1] mean_volume: {} dB\n", volume),
            });
        }

        if args.iter().any(|a| a == "s16le") {
            let header = read_header(Path::new(arg_after(args, "-i").unwrap_or_default()))?;
            let stdout = if header.tag.starts_with("empty") {
                Vec::new()
            } else {
                header.tag.as_bytes().repeat(64)
            };
            return Ok(FfmpegOutput {
                stdout,
                stderr: String::new(),
            });
        }

        if args.iter().any(|a| a == "-user_agent") {
            return self.stream_copy(args);
        }

        if args.iter().any(|a| a == "libmp3lame") {
            return self.transcode(args);
        }

        Err(ConversionError::ConversionFailed(format!(
            "unexpected ffmpeg invocation: {:?}",
            args
        )))
    }
}
