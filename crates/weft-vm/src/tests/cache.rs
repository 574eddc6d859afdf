//! Cache image encoding and decoding.

use super::helpers::*;
use crate::cache::{self, decode, encode, FORMAT_VERSION};
use crate::error::CacheError;
use proptest::prelude::*;
use weft_types::{ArtifactBuilder, CaptureSource, CodeBuilder, Constant, ModuleArtifact, OpCode};

/// An artifact touching every constant kind, handler form and capture kind.
fn rich_artifact() -> ModuleArtifact {
    let mut artifact = ArtifactBuilder::new("app.rich");
    artifact.constant(Constant::Null);
    artifact.string("héllo");
    artifact.constant(Constant::Int(-42));
    artifact.constant(Constant::Float(2.5));
    artifact.constant(Constant::Bool(true));
    artifact.record("Point", &["x", "y"]);

    let mut inner = CodeBuilder::anonymous()
        .capture(CaptureSource::Local(0))
        .capture(CaptureSource::Capture(1));
    inner.emit_arg(OpCode::LoadCapture, 0);
    inner.emit(OpCode::Return);
    let inner = artifact.code(inner.build().unwrap());

    let mut outer = CodeBuilder::new("outer")
        .positional(1)
        .named(&["scale"])
        .variadic()
        .variadic_keywords()
        .locals(6);
    let handler = outer.new_label();
    outer.at(3, 7);
    outer.emit_arg(OpCode::MakeClosure, inner);
    let call = outer.emit_arg(OpCode::Call, 0);
    outer.catch(call, handler);
    outer.emit(OpCode::Return);
    outer.place(handler);
    outer.emit(OpCode::Return);
    let outer = artifact.code(outer.build().unwrap());

    let g = artifact.export("outer");
    let mut body = CodeBuilder::new("app.rich");
    let (start, end, recover) = (body.new_label(), body.new_label(), body.new_label());
    body.place(start);
    body.emit_arg(OpCode::MakeClosure, outer);
    body.emit_arg(OpCode::StoreGlobal, g);
    body.place(end);
    body.emit(OpCode::LoadNull);
    body.emit(OpCode::Return);
    body.place(recover);
    body.emit(OpCode::Raise);
    body.handler(start, end, recover);
    artifact.build(body.build().unwrap())
}

#[test]
fn test_round_trip_preserves_artifact() {
    let artifact = rich_artifact();
    let digest = cache::source_digest("fn outer() {}");

    let image = encode(&artifact, Some(digest)).unwrap();
    assert_eq!(&image[..4], b"WEFT");
    let decoded = decode(&image).unwrap();
    assert_eq!(decoded.artifact, artifact);
    assert_eq!(decoded.source_digest, Some(digest));

    let bare = decode(&encode(&artifact, None).unwrap()).unwrap();
    assert_eq!(bare.source_digest, None);
    assert_eq!(bare.artifact, artifact);
}

#[test]
fn test_digest_depends_on_source() {
    assert_eq!(cache::source_digest("a"), cache::source_digest("a"));
    assert_ne!(cache::source_digest("a"), cache::source_digest("b"));
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut image = encode(&rich_artifact(), None).unwrap();
    image[0] = b'X';
    assert!(matches!(decode(&image), Err(CacheError::BadMagic)));
}

#[test]
fn test_version_mismatch_is_reported() {
    let mut image = encode(&rich_artifact(), None).unwrap();
    image[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    match decode(&image) {
        Err(CacheError::VersionMismatch { found, expected }) => {
            assert_eq!(found, FORMAT_VERSION + 1);
            assert_eq!(expected, FORMAT_VERSION);
        }
        other => panic!("expected a version mismatch, got {:?}", other),
    }
}

#[test]
fn test_truncated_image_is_rejected() {
    let image = encode(&rich_artifact(), Some([7; 32])).unwrap();
    for cut in [2, 5, 20, image.len() / 2, image.len() - 1] {
        assert!(
            matches!(decode(&image[..cut]), Err(CacheError::Truncated)),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn test_unknown_constant_tag_is_rejected() {
    let mut artifact = ArtifactBuilder::new("m");
    artifact.constant(Constant::Int(1));
    let body = CodeBuilder::new("m").build().unwrap();
    let mut image = encode(&artifact.build(body), None).unwrap();

    // header 8, name 5, two empty string lists 8, local_count 4, constant count 4
    let tag_at = 8 + 5 + 8 + 4 + 4;
    assert_eq!(image[tag_at], 2);
    image[tag_at] = 0xee;
    assert!(matches!(decode(&image), Err(CacheError::UnknownTag(0xee))));
}

#[test]
fn test_decoded_image_runs_like_original() {
    let artifact = module_of("math", vec![("sum", summing_loop(1))]);
    let decoded = decode(&encode(&artifact, None).unwrap()).unwrap().artifact;

    let rt = runtime();
    let original = install_and_run(&rt, &artifact);
    let cached = rt.install_artifact("math.cached", &decoded).unwrap();
    rt.run_module(&cached).unwrap().join();

    let expected = returned_int(&rt, &call_ints(&rt, &original, "sum", &[50]));
    assert_eq!(returned_int(&rt, &call_ints(&rt, &cached, "sum", &[50])), expected);
}

fn constant() -> impl Strategy<Value = Constant> {
    prop_oneof![
        Just(Constant::Null),
        any::<i64>().prop_map(Constant::Int),
        any::<f64>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(Constant::Float),
        any::<bool>().prop_map(Constant::Bool),
        ".{0,24}".prop_map(Constant::Str),
    ]
}

proptest! {
    #[test]
    fn prop_constant_pool_survives_encoding(constants in prop::collection::vec(constant(), 0..32)) {
        let mut artifact = ArtifactBuilder::new("p");
        for c in &constants {
            artifact.constant(c.clone());
        }
        let artifact = artifact.build(CodeBuilder::new("p").build().unwrap());
        let decoded = decode(&encode(&artifact, None).unwrap()).unwrap();
        prop_assert_eq!(decoded.artifact.constants, constants);
    }
}
