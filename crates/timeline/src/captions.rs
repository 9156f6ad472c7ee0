use std::fmt::Write as _;

use crate::{clips_on, Millis, TimelineClip, TrackKind};

/// Caption text for one voice line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionText {
    pub zh: String,
    pub pinyin: String,
    pub en: String,
}

/// `HH:MM:SS,mmm`
pub fn srt_timecode(ms: Millis) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Render the audio track as SubRip, looking up each clip's line text.
///
/// Clips whose source line is gone are skipped and numbering stays dense.
pub fn to_srt<F>(clips: &[TimelineClip], offset_ms: Millis, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<CaptionText>,
{
    let mut out = String::new();
    let mut index = 1;
    for clip in clips_on(clips, TrackKind::Audio) {
        let Some(text) = lookup(&clip.source_id) else {
            continue;
        };
        let start = clip.start_ms + offset_ms;
        let end = clip.end_ms() + offset_ms;
        let _ = writeln!(out, "{index}");
        let _ = writeln!(out, "{} --> {}", srt_timecode(start), srt_timecode(end));
        for line in [&text.zh, &text.pinyin, &text.en] {
            if !line.is_empty() {
                let _ = writeln!(out, "{line}");
            }
        }
        out.push('\n');
        index += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_format() {
        assert_eq!(srt_timecode(0), "00:00:00,000");
        assert_eq!(srt_timecode(3_723_045), "01:02:03,045");
    }

    #[test]
    fn srt_skips_missing_lines_and_applies_offset() {
        let clips = vec![
            TimelineClip::audio("a2", "l2", 3000, 1000),
            TimelineClip::audio("a1", "l1", 500, 1500),
            TimelineClip::audio("a3", "gone", 5000, 1000),
            TimelineClip::scene("s1", "scene-1", 0, 9000),
        ];
        let srt = to_srt(&clips, 2000, |id| match id {
            "l1" => Some(CaptionText {
                zh: "你好".into(),
                pinyin: "nǐ hǎo".into(),
                en: "Hello".into(),
            }),
            "l2" => Some(CaptionText {
                zh: "再见".into(),
                pinyin: String::new(),
                en: "Bye".into(),
            }),
            _ => None,
        });
        let expected = "1\n00:00:02,500 --> 00:00:04,000\n你好\nnǐ hǎo\nHello\n\n\
                        2\n00:00:05,000 --> 00:00:06,000\n再见\nBye\n\n";
        assert_eq!(srt, expected);
    }
}
