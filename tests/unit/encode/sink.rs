use super::*;
use crate::foundation::error::ErrorKind;

fn cfg() -> SinkConfig {
    SinkConfig {
        width: 4,
        height: 2,
        fps: Fps::new(30, 1).unwrap(),
        codec: OutputCodec::Libx264,
        total_frames: 3,
    }
}

fn frame(v: u8) -> Frame {
    Frame::solid(Resolution::new(4, 2), [v, v, v, 255])
}

#[test]
fn in_memory_sink_keeps_frames_in_order() {
    let mut sink = InMemorySink::new();
    sink.begin(cfg()).unwrap();
    for i in 0..3 {
        sink.consume(FrameIndex(i), &frame(i as u8)).unwrap();
    }
    sink.end().unwrap();

    assert!(sink.is_finished());
    assert_eq!(sink.frames().len(), 3);
    assert_eq!(sink.frames()[2].1.pixel(0, 0), Some([2, 2, 2, 255]));
    assert_eq!(sink.config().unwrap().resolution(), Resolution::new(4, 2));
}

#[test]
fn gaps_and_reordering_are_encoding_errors() {
    let mut sink = InMemorySink::new();
    sink.begin(cfg()).unwrap();
    sink.consume(FrameIndex(0), &frame(0)).unwrap();

    let err = sink.consume(FrameIndex(2), &frame(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    let err = sink.consume(FrameIndex(0), &frame(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    assert_eq!(sink.frames().len(), 1);
}

#[test]
fn wrong_size_frame_is_rejected() {
    let mut sink = FrameCounterSink::new();
    sink.begin(cfg()).unwrap();
    let err = sink
        .consume(
            FrameIndex(0),
            &Frame::solid(Resolution::new(2, 2), [0, 0, 0, 255]),
        )
        .unwrap_err();
    assert!(err.to_string().starts_with("encoding error:"));
    assert_eq!(sink.count(), 0);
}

#[test]
fn consume_before_begin_fails() {
    let mut sink = InMemorySink::new();
    assert!(sink.consume(FrameIndex(0), &frame(0)).is_err());
}

#[test]
fn counter_sink_tracks_last_frame() {
    let mut sink = FrameCounterSink::new();
    sink.begin(cfg()).unwrap();
    sink.consume(FrameIndex(0), &frame(7)).unwrap();
    sink.consume(FrameIndex(1), &frame(9)).unwrap();
    sink.end().unwrap();
    assert_eq!(sink.count(), 2);
    assert_eq!(sink.last_frame().unwrap().pixel(3, 1), Some([9, 9, 9, 255]));
    assert!(sink.is_finished());
}

#[test]
fn abort_discards_in_memory_frames() {
    let mut sink = InMemorySink::new();
    sink.begin(cfg()).unwrap();
    sink.consume(FrameIndex(0), &frame(0)).unwrap();
    sink.abort().unwrap();
    assert!(sink.is_aborted());
    assert!(sink.frames().is_empty());
}
