use super::*;

#[test]
fn display_prefixes_are_stable() {
    let v = ValidationError::new(SourceRole::Background, MismatchAttribute::FrameRate, "x");
    assert!(
        StratumError::from(v)
            .to_string()
            .contains("validation error:")
    );
    assert!(
        StratumError::resource("upload", 16, "oom")
            .to_string()
            .contains("resource error:")
    );
    assert!(
        StratumError::pipeline_init("x")
            .to_string()
            .contains("pipeline init error:")
    );
    assert!(
        StratumError::stage_execution(3, "overlay", "x")
            .to_string()
            .contains("stage execution error at frame 3")
    );
    assert!(
        StratumError::encoding("x")
            .to_string()
            .contains("encoding error:")
    );
    assert!(
        StratumError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
}

#[test]
fn validation_display_names_role_and_attribute() {
    let v = ValidationError::new(
        SourceRole::Layer {
            index: 0,
            name: "ol1".to_string(),
        },
        MismatchAttribute::Resolution,
        "expected 720x1280, got 640x960",
    );
    let s = v.to_string();
    assert!(s.contains("layer #0 'ol1'"));
    assert!(s.contains("resolution"));
}

#[test]
fn kind_classifies_variants() {
    assert_eq!(
        StratumError::resource("s", 1, "r").kind(),
        ErrorKind::Resource
    );
    assert_eq!(StratumError::encoding("e").kind(), ErrorKind::Encoding);
    let v = ValidationError::new(SourceRole::Request, MismatchAttribute::Target, "t");
    let err = StratumError::from(v.clone());
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.as_validation(), Some(&v));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = StratumError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
