use super::*;
use crate::source::media::SourceKind;

#[test]
fn parses_integer_and_ntsc_rates() {
    assert_eq!(parse_rate("60/1"), Some(Fps::new(60, 1).unwrap()));
    assert_eq!(parse_rate("30000/1001"), Some(Fps::new(30000, 1001).unwrap()));
    assert_eq!(parse_rate("0/0"), None);
    assert_eq!(parse_rate("garbage"), None);
}

#[test]
fn probe_maps_to_video_source() {
    let probe = MediaProbe {
        path: PathBuf::from("clip.mp4"),
        width: 720,
        height: 1280,
        fps: Some(Fps::new(60, 1).unwrap()),
        frames: None,
        duration_secs: Some(12.5),
        has_audio: true,
    };
    let source = probe.to_media_source("clip").unwrap();
    assert_eq!(source.kind, SourceKind::MotionVideo);
    assert_eq!(source.native_resolution(), Resolution::new(720, 1280));
    assert_eq!(source.duration, Some(SourceDuration::Seconds(12.5)));

    let no_rate = MediaProbe { fps: None, ..probe };
    assert!(no_rate.to_media_source("clip").is_err());
}

#[cfg(not(feature = "media-ffmpeg"))]
#[test]
fn probing_requires_the_feature() {
    let err = probe_media(Path::new("clip.mp4")).unwrap_err();
    assert!(err.to_string().contains("media-ffmpeg"));
}
