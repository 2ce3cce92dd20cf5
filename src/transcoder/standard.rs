//! The house preview standard and the ffmpeg arguments for each ladder rung.

use std::fmt;
use std::path::Path;

/// Target format for every preview clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewStandard {
    pub clip_secs: f64,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_kbps: u32,
    pub fade_in_secs: f64,
    pub fade_out_secs: f64,
    /// Validation: encoded bitrate must reach at least this.
    pub min_bitrate_kbps: u32,
    /// Validation: allowed distance between expected and probed duration.
    pub duration_tolerance_secs: f64,
    /// Validation: smaller outputs are treated as failed encodes.
    pub min_clip_bytes: u64,
    /// Validation: clips quieter than this mean volume are silent.
    pub silence_threshold_db: f64,
}

impl Default for PreviewStandard {
    fn default() -> Self {
        Self {
            clip_secs: 19.0,
            sample_rate: 48_000,
            channels: 2,
            bitrate_kbps: 128,
            fade_in_secs: 1.0,
            fade_out_secs: 2.0,
            min_bitrate_kbps: 120,
            duration_tolerance_secs: 1.0,
            min_clip_bytes: 32 * 1024,
            silence_threshold_db: -50.0,
        }
    }
}

/// Songs up to this long start at a fixed offset.
const SHORT_SONG_SECS: f64 = 90.0;
const SHORT_SONG_OFFSET_SECS: f64 = 10.0;
const LONG_SONG_FRACTION: f64 = 0.25;
const MAX_OFFSET_SECS: f64 = 60.0;

impl PreviewStandard {
    /// Pick where in the source the clip starts.
    ///
    /// Unknown duration starts at 0. Otherwise short songs start at a fixed
    /// offset and longer ones a quarter in (capped), always leaving room for
    /// a full clip when the source allows it.
    pub fn start_offset(&self, source_duration: Option<f64>) -> f64 {
        let Some(duration) = source_duration.filter(|d| *d > 0.0) else {
            return 0.0;
        };
        let preferred = if duration <= SHORT_SONG_SECS {
            SHORT_SONG_OFFSET_SECS
        } else {
            (duration * LONG_SONG_FRACTION).min(MAX_OFFSET_SECS)
        };
        self.clamp_offset(preferred, Some(duration))
    }

    /// Clamp an offset into `[0, duration - clip]`.
    pub fn clamp_offset(&self, offset: f64, source_duration: Option<f64>) -> f64 {
        let offset = offset.max(0.0);
        match source_duration.filter(|d| *d > 0.0) {
            Some(duration) => offset.min((duration - self.clip_secs).max(0.0)),
            None => offset,
        }
    }

    /// Length the clip should come out at for this source and offset.
    pub fn expected_duration(&self, source_duration: Option<f64>, offset: f64) -> f64 {
        match source_duration.filter(|d| *d > 0.0) {
            Some(duration) => self.clip_secs.min((duration - offset).max(0.0)),
            None => self.clip_secs,
        }
    }
}

/// Steps of the degradation ladder, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LadderRung {
    /// Trim, resample, set channels and bitrate, apply fades.
    Full,
    /// As `Full` without the fade filter.
    NoFades,
    /// Codec, bitrate and trim only.
    Minimal,
    /// Copy of the configured fallback clip.
    ReferenceCopy,
}

impl LadderRung {
    pub const ALL: [LadderRung; 4] = [
        LadderRung::Full,
        LadderRung::NoFades,
        LadderRung::Minimal,
        LadderRung::ReferenceCopy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LadderRung::Full => "full",
            LadderRung::NoFades => "no_fades",
            LadderRung::Minimal => "minimal",
            LadderRung::ReferenceCopy => "reference_copy",
        }
    }

    /// Whether the output must match the full house format on validation.
    pub fn enforces_format(&self) -> bool {
        matches!(self, LadderRung::Full | LadderRung::NoFades)
    }
}

impl fmt::Display for LadderRung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ffmpeg arguments for an encoding rung. `None` for [`LadderRung::ReferenceCopy`].
pub fn rung_args(
    standard: &PreviewStandard,
    rung: LadderRung,
    input: &Path,
    output: &Path,
    offset: f64,
    expected_duration: f64,
) -> Option<Vec<String>> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-ss".into(),
        format!("{:.3}", offset),
        "-t".into(),
        format!("{:.3}", standard.clip_secs),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-vn".into(),
        "-map_metadata".into(),
        "-1".into(),
    ];

    match rung {
        LadderRung::Full | LadderRung::NoFades => {
            args.extend([
                "-ac".into(),
                standard.channels.to_string(),
                "-ar".into(),
                standard.sample_rate.to_string(),
            ]);
        }
        LadderRung::Minimal => {}
        LadderRung::ReferenceCopy => return None,
    }

    args.extend([
        "-c:a".into(),
        "libmp3lame".into(),
        "-b:a".into(),
        format!("{}k", standard.bitrate_kbps),
    ]);

    if rung == LadderRung::Full {
        let fade_out_start = (expected_duration - standard.fade_out_secs).max(0.0);
        args.extend([
            "-af".into(),
            format!(
                "afade=t=in:st=0:d={:.3},afade=t=out:st={:.3}:d={:.3}",
                standard.fade_in_secs, fade_out_start, standard.fade_out_secs
            ),
        ]);
    }

    args.extend([
        "-f".into(),
        "mp3".into(),
        output.to_string_lossy().to_string(),
    ]);
    Some(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_offset_heuristic() {
        let standard = PreviewStandard::default();
        assert_eq!(standard.start_offset(None), 0.0);
        assert_eq!(standard.start_offset(Some(0.0)), 0.0);
        // Short song: fixed offset.
        assert_eq!(standard.start_offset(Some(90.0)), 10.0);
        // Longer: a quarter in.
        assert_eq!(standard.start_offset(Some(200.0)), 50.0);
        // Capped.
        assert_eq!(standard.start_offset(Some(600.0)), 60.0);
    }

    #[test]
    fn test_start_offset_clamped_for_short_sources() {
        let standard = PreviewStandard::default();
        assert!((standard.start_offset(Some(20.0)) - 1.0).abs() < 1e-9);
        assert_eq!(standard.start_offset(Some(12.0)), 0.0);
        assert_eq!(standard.clamp_offset(-5.0, None), 0.0);
        assert_eq!(standard.clamp_offset(500.0, Some(100.0)), 81.0);
    }

    #[test]
    fn test_expected_duration() {
        let standard = PreviewStandard::default();
        assert_eq!(standard.expected_duration(None, 0.0), 19.0);
        assert_eq!(standard.expected_duration(Some(200.0), 50.0), 19.0);
        assert_eq!(standard.expected_duration(Some(12.0), 0.0), 12.0);
    }

    #[test]
    fn test_full_rung_args() {
        let standard = PreviewStandard::default();
        let args = rung_args(
            &standard,
            LadderRung::Full,
            Path::new("/tmp/in.flac"),
            Path::new("/tmp/out.mp3"),
            50.0,
            19.0,
        )
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-ss 50.000 -t 19.000 -i /tmp/in.flac"));
        assert!(joined.contains("-ac 2 -ar 48000"));
        assert!(joined.contains("-c:a libmp3lame -b:a 128k"));
        assert!(joined.contains("afade=t=in:st=0:d=1.000,afade=t=out:st=17.000:d=2.000"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp3"));
    }

    #[test]
    fn test_degraded_rungs_drop_filters() {
        let standard = PreviewStandard::default();
        let no_fades = rung_args(
            &standard,
            LadderRung::NoFades,
            Path::new("in"),
            Path::new("out"),
            0.0,
            19.0,
        )
        .unwrap();
        assert!(!no_fades.iter().any(|a| a == "-af"));
        assert!(no_fades.iter().any(|a| a == "-ar"));

        let minimal = rung_args(
            &standard,
            LadderRung::Minimal,
            Path::new("in"),
            Path::new("out"),
            0.0,
            19.0,
        )
        .unwrap();
        assert!(!minimal.iter().any(|a| a == "-af" || a == "-ar" || a == "-ac"));
        assert!(minimal.iter().any(|a| a == "libmp3lame"));

        assert!(rung_args(
            &standard,
            LadderRung::ReferenceCopy,
            Path::new("in"),
            Path::new("out"),
            0.0,
            19.0
        )
        .is_none());
    }
}
