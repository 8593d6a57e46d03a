use super::*;
use crate::source::media::{SourceDuration, SourceKind, SourceLocator};

const REQUEST_JSON: &str = r#"{
  "background": {
    "name": "bg",
    "locator": { "type": "color", "rgba": [0, 0, 0, 255] },
    "kind": "image",
    "width": 720,
    "height": 1280,
    "duration": "loop"
  },
  "layers": [
    {
      "source": {
        "name": "ticker",
        "locator": { "type": "file", "path": "ticker.mp4" },
        "kind": "video",
        "width": 720,
        "height": 1280,
        "fps": { "num": 60, "den": 1 },
        "duration": { "seconds": 300.0 },
        "native_format": "yuv420p"
      },
      "x": 0,
      "y": 50,
      "z": 1
    }
  ],
  "width": 720,
  "height": 1280,
  "fps": { "num": 60, "den": 1 },
  "duration_secs": 300.0,
  "codec": "libx264"
}"#;

#[test]
fn request_parses_from_json() {
    let req = CompositionRequest::from_json_str(REQUEST_JSON).unwrap();
    assert_eq!(req.target_resolution(), Resolution::new(720, 1280));
    assert_eq!(req.target_frames(), 18_000);
    assert_eq!(req.codec, OutputCodec::Libx264);
    assert_eq!(req.background.duration, Some(SourceDuration::Loop));
    assert_eq!(req.layers.len(), 1);

    let layer = &req.layers[0];
    assert_eq!(layer.source.kind, SourceKind::MotionVideo);
    assert_eq!(layer.opacity, 1.0);
    assert!(!layer.is_alpha());
    assert_eq!(
        layer.source.locator,
        SourceLocator::File {
            path: "ticker.mp4".into()
        }
    );
}

#[test]
fn request_rejects_unknown_fields() {
    let bad = REQUEST_JSON.replace("\"duration_secs\"", "\"duration_sec\"");
    let err = CompositionRequest::from_json_str(&bad).unwrap_err();
    assert!(err.to_string().contains("serialization error:"));
}

#[test]
fn request_json_roundtrip_preserves_layers() {
    let req = CompositionRequest::from_json_str(REQUEST_JSON).unwrap();
    let text = req.to_json_pretty().unwrap();
    let back = CompositionRequest::from_json_str(&text).unwrap();
    assert_eq!(req, back);
}

#[test]
fn source_ids_follow_declaration_order() {
    let req = CompositionRequest::from_json_str(REQUEST_JSON).unwrap();
    assert_eq!(req.source(SourceId::BACKGROUND).unwrap().name, "bg");
    assert_eq!(req.source(SourceId::for_layer(0)).unwrap().name, "ticker");
    assert!(req.source(SourceId(2)).is_none());
    assert_eq!(req.source_count(), 2);
    assert_eq!(SourceId::BACKGROUND.to_string(), "bg");
    assert_eq!(SourceId::for_layer(0).to_string(), "ol1");
}

#[test]
fn layer_alpha_override_wins() {
    let src = MediaSource::color("c", [1, 2, 3, 128], Resolution::new(4, 4));
    assert!(src.alpha);
    let layer = Layer::new(src, 0, 0, 1);
    assert!(layer.is_alpha());
    assert!(!layer.with_alpha(false).is_alpha());
}

#[test]
fn scroll_holds_rolls_then_holds() {
    let m = ScrollMotion::new(10, 3, 20);
    assert_eq!(m.offset_at(0), 0);
    assert_eq!(m.offset_at(10), 0);
    assert_eq!(m.offset_at(11), 3);
    assert_eq!(m.offset_at(16), 18);
    assert_eq!(m.offset_at(17), 20);
    assert_eq!(m.offset_at(1_000), 20);
    assert_eq!(m.end_frame(), 17);
    assert_eq!(scrolled_y(40, Some(&m), 12), 34);
    assert_eq!(scrolled_y(40, None, 12), 40);
}

#[test]
fn roll_uses_whole_pixel_steps_and_a_minimum_duration() {
    let fps = Fps::new(30, 1).unwrap();

    // Fast enough to finish early: stretched to the minimum roll, one pixel per frame.
    let slow = ScrollMotion::roll(100, 3.0, fps);
    assert_eq!(slow.start_frame, 60);
    assert_eq!(slow.px_per_frame, 1);
    assert_eq!(slow.end_frame(), 160);
    assert_eq!(slow.total_frames(fps), 220);

    // Fractional speeds round down to whole pixels.
    let long = ScrollMotion::roll(4_800, 2.6, fps);
    assert_eq!(long.px_per_frame, 2);
    assert_eq!(long.end_frame(), 60 + 2_400);

    let sub_pixel = ScrollMotion::roll(1_000, 0.4, fps);
    assert_eq!(sub_pixel.px_per_frame, 1);
}

#[test]
fn layer_motion_fields_parse_from_json() {
    let json = REQUEST_JSON.replace(
        "\"z\": 1",
        "\"z\": 1, \"scroll\": { \"start_frame\": 120, \"px_per_frame\": 2, \"distance\": 600 }, \
         \"margins\": { \"top\": 80 }",
    );
    let req = CompositionRequest::from_json_str(&json).unwrap();
    let layer = &req.layers[0];
    assert_eq!(layer.scroll, Some(ScrollMotion::new(120, 2, 600)));
    assert_eq!(layer.margins, Margins::new(80, 0));

    let plain = CompositionRequest::from_json_str(REQUEST_JSON).unwrap();
    assert_eq!(plain.layers[0].scroll, None);
    assert!(plain.layers[0].margins.is_zero());
}
