use super::*;
use crate::foundation::error::StratumError;
use crate::source::media::{FitMode, SourceLocator};

fn target() -> Resolution {
    Resolution::new(720, 1280)
}

fn fps60() -> Fps {
    Fps::new(60, 1).unwrap()
}

fn video(name: &str, res: Resolution, fps: Fps, frames: u64) -> MediaSource {
    MediaSource::video(
        name,
        SourceLocator::Stream {
            handle: name.to_string(),
        },
        res,
        fps,
        frames,
    )
}

fn base_request() -> CompositionRequest {
    CompositionRequest::new(
        video("bg", target(), fps60(), 18_000),
        target(),
        fps60(),
        300.0,
    )
}

fn expect_validation(err: StratumError) -> ValidationError {
    match err {
        StratumError::Validation(v) => v,
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn valid_request_normalizes_sources() {
    let req = base_request()
        .with_layer(Layer::new(
            MediaSource::color("plate", [255, 0, 0, 255], target()),
            0,
            0,
            1,
        ))
        .with_layer(Layer::new(video("ol2", target(), fps60(), 18_000), 50, 50, 2));

    let norm = validate(&req).unwrap();
    assert_eq!(norm.total_frames, 18_000);
    assert_eq!(norm.resolution, target());
    assert_eq!(norm.background.source_frames, Some(18_000));
    assert_eq!(norm.background.repeat, 1);

    let plate = &norm.layers[0].source;
    assert_eq!(plate.id, SourceId(1));
    assert_eq!(plate.source_frames, None);
    assert_eq!(plate.repeat, 18_000);
    assert_eq!(plate.source_frame_index(17_999), 0);

    assert_eq!(norm.layers[1].x, 50);
    assert_eq!(norm.sources().count(), 3);
}

#[test]
fn mismatched_layer_resolution_names_layer_and_attribute() {
    let req = base_request().with_layer(Layer::new(
        video("ol1", Resolution::new(640, 960), fps60(), 18_000),
        0,
        0,
        1,
    ));
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Resolution);
    assert_eq!(
        v.role,
        SourceRole::Layer {
            index: 0,
            name: "ol1".to_string()
        }
    );
    assert!(v.detail.contains("640x960"));
}

#[test]
fn fit_normalizes_resolution() {
    let src = video("ol1", Resolution::new(640, 960), fps60(), 18_000).with_fit(FitMode::Contain);
    let req = base_request().with_layer(Layer::new(src, 0, 0, 1));
    let norm = validate(&req).unwrap();
    assert_eq!(norm.layers[0].source.resolution, target());
}

#[test]
fn mismatched_frame_rate_is_rejected() {
    let req = base_request().with_layer(Layer::new(
        video("ol1", target(), Fps::new(30, 1).unwrap(), 18_000),
        0,
        0,
        1,
    ));
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::FrameRate);
}

#[test]
fn equivalent_rational_rates_are_accepted() {
    let req = base_request().with_layer(Layer::new(
        video("ol1", target(), Fps::new(120, 2).unwrap(), 18_000),
        0,
        0,
        1,
    ));
    assert!(validate(&req).is_ok());
}

#[test]
fn short_video_fails_duration_unless_looping() {
    let short = video("ol1", target(), fps60(), 600);
    let req = base_request().with_layer(Layer::new(short.clone(), 0, 0, 1));
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Duration);

    let req = base_request().with_layer(Layer::new(short.with_looping(true), 0, 0, 1));
    let norm = validate(&req).unwrap();
    let src = &norm.layers[0].source;
    assert_eq!(src.repeat, 30);
    assert_eq!(src.source_frame_index(601), 1);
}

#[test]
fn image_without_duration_is_rejected() {
    let mut img = MediaSource::image("logo", "logo.png", target());
    img.duration = None;
    let req = base_request().with_layer(Layer::new(img, 0, 0, 1));
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Duration);
}

#[test]
fn image_duration_must_be_positive() {
    for bad in [
        SourceDuration::Seconds(f64::NAN),
        SourceDuration::Seconds(-2.0),
        SourceDuration::Seconds(0.0),
        SourceDuration::Frames(0),
    ] {
        let mut img = MediaSource::image("logo", "logo.png", target());
        img.duration = Some(bad);
        let req = base_request().with_layer(Layer::new(img, 0, 0, 1));
        let v = expect_validation(validate(&req).unwrap_err());
        assert_eq!(v.attribute, MismatchAttribute::Duration, "{bad:?}");
    }

    let mut bg = MediaSource::color("bg", [0, 0, 0, 255], target());
    bg.duration = Some(SourceDuration::Seconds(f64::NAN));
    let req = CompositionRequest::new(bg, target(), fps60(), 1.0);
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.role, SourceRole::Background);

    for good in [
        SourceDuration::Loop,
        SourceDuration::Seconds(1.5),
        SourceDuration::Frames(1),
    ] {
        let mut img = MediaSource::image("logo", "logo.png", target());
        img.duration = Some(good);
        let req = base_request().with_layer(Layer::new(img, 0, 0, 1));
        assert!(validate(&req).is_ok(), "{good:?}");
    }
}

#[test]
fn scroll_and_margins_are_checked() {
    let plate = MediaSource::color("credits", [255, 255, 255, 255], target());

    let stuck = base_request()
        .with_layer(Layer::new(plate.clone(), 0, 0, 1).with_scroll(ScrollMotion::new(0, 0, 50)));
    let v = expect_validation(validate(&stuck).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Target);

    let covered = base_request()
        .with_layer(Layer::new(plate.clone(), 0, 0, 1).with_margins(Margins::new(640, 640)));
    let v = expect_validation(validate(&covered).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Target);

    let ok = base_request().with_layer(
        Layer::new(plate, 0, 0, 1)
            .with_scroll(ScrollMotion::new(120, 2, 600))
            .with_margins(Margins::new(120, 80)),
    );
    let norm = validate(&ok).unwrap();
    assert_eq!(norm.layers[0].scroll, Some(ScrollMotion::new(120, 2, 600)));
    assert_eq!(norm.layers[0].margins, Margins::new(120, 80));
}

#[test]
fn duplicate_z_order_is_rejected() {
    let req = base_request()
        .with_layer(Layer::new(
            MediaSource::color("a", [0, 0, 0, 255], target()),
            0,
            0,
            3,
        ))
        .with_layer(Layer::new(
            MediaSource::color("b", [0, 0, 0, 255], target()),
            0,
            0,
            3,
        ));
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::ZOrder);
    assert_eq!(
        v.role,
        SourceRole::Layer {
            index: 1,
            name: "b".to_string()
        }
    );
}

#[test]
fn background_mismatch_is_reported_as_background() {
    let req = CompositionRequest::new(
        video("bg", Resolution::new(1280, 720), fps60(), 18_000),
        target(),
        fps60(),
        300.0,
    );
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.role, SourceRole::Background);
    assert_eq!(v.attribute, MismatchAttribute::Resolution);
}

#[test]
fn bad_targets_are_rejected() {
    let mut req = base_request();
    req.duration_secs = 0.0;
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Target);

    let mut req = base_request();
    req.width = 0;
    assert!(validate(&req).is_err());

    let req = base_request().with_layer(
        Layer::new(MediaSource::color("a", [0, 0, 0, 255], target()), 0, 0, 1).with_opacity(1.5),
    );
    let v = expect_validation(validate(&req).unwrap_err());
    assert_eq!(v.attribute, MismatchAttribute::Target);
}
