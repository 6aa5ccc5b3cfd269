use super::read::{parse_file, parse_str, CifStream};
use super::*;

/// Helper function: find the cell named `name`, panicking if absent
fn cell_named<'lib>(lib: &'lib Library, name: &str) -> &'lib Cell {
    lib.cells
        .values()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no cell named {}", name))
}
/// Helper function: find the key of the cell named `name`
fn key_named(lib: &Library, name: &str) -> CellKey {
    lib.cells
        .iter()
        .find(|(_, c)| c.name == name)
        .map(|(k, _)| k)
        .unwrap_or_else(|| panic!("no cell named {}", name))
}
/// Helper function: parse `src` with default options, expecting a reader error
fn parse_err(src: &str) -> CifParseErrorType {
    match parse_str(src, &CifReaderOptions::default()) {
        Err(CifError::Parse { tp, .. }) => tp,
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn it_tracks_line_numbers() {
    let mut s = CifStream::new("ab\ncd\n");
    assert_eq!(s.line_number(), 1);
    while s.get_char().is_some() {}
    assert_eq!(s.line_number(), 3);
    assert!(s.at_end());
}

#[test]
fn it_composes_transforms() {
    let mirror = Transform::reflect_vert();
    let shift = Transform::translate(1., 1.);

    // shift first, then mirror
    let c1 = mirror.compose(&shift);
    assert_eq!(c1.apply(1., 1.), (2., -2.));

    // composition order matters
    let c2 = shift.compose(&mirror);
    assert_eq!(c2.apply(1., 1.), (2., 0.));
}

#[test]
fn it_classifies_transforms() {
    assert_eq!(Transform::identity().classify(), InstTrans::identity());
    assert_eq!(
        Transform::rotate(90.).classify(),
        InstTrans::Ortho {
            rot: 1,
            mirror: false,
            disp: Point::new(0, 0)
        }
    );
    assert_eq!(
        Transform::reflect_horiz().classify(),
        InstTrans::Ortho {
            rot: 2,
            mirror: true,
            disp: Point::new(0, 0)
        }
    );
    assert_eq!(
        Transform::reflect_vert().classify(),
        InstTrans::Ortho {
            rot: 0,
            mirror: true,
            disp: Point::new(0, 0)
        }
    );
}

#[test]
fn it_reads_a_minimal_box() -> CifResult<()> {
    let mut layers = LayerMap::new();
    let m1 = layers.add(LayerInfo::named("M1"));
    let options = CifReaderOptionsBuilder::default()
        .layer_map(layers)
        .build()?;

    let lib = parse_str("DS 1 1 1; L M1; B 100 200 10 20; DF; C 1; E", &options)?;

    // the top holds a single instance and is discarded
    assert_eq!(lib.cells.len(), 1);
    let c1 = cell_named(&lib, "C1");
    assert_eq!(c1.elems.len(), 1);
    assert_eq!(c1.elems[0].layer, m1);
    assert_eq!(
        c1.elems[0].inner,
        Shape::Rect(Rect {
            p0: Point::new(-400, -800),
            p1: Point::new(600, 1200),
        })
    );
    assert_eq!(lib.layers.get(m1), Some(&LayerInfo::named("M1")));
    Ok(())
}

#[test]
fn it_scales_polygons() -> CifResult<()> {
    let lib = parse_str(
        "DS 2; L L5; P 0 0 100 0 100 100 0 100; DF; C 2; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 1);
    let c2 = cell_named(&lib, "C2");
    assert_eq!(
        c2.elems[0].inner,
        Shape::Polygon(Polygon {
            points: vec![
                Point::new(0, 0),
                Point::new(1000, 0),
                Point::new(1000, 1000),
                Point::new(0, 1000),
            ],
        })
    );
    assert_eq!(lib.layers.get(0), Some(&LayerInfo::numbered(5, 0)));
    Ok(())
}

#[test]
fn it_reads_round_wire_caps() -> CifResult<()> {
    let lib = parse_str(
        "DS 3; L L1; 98 1; W 20 0 0 100 0; DF; C 3; E",
        &CifReaderOptions::default(),
    )?;
    let c3 = cell_named(&lib, "C3");
    assert_eq!(
        c3.elems[0].inner,
        Shape::Path(Path {
            points: vec![Point::new(0, 0), Point::new(1000, 0)],
            width: 200,
            begin_ext: 100,
            end_ext: 100,
            round: true,
        })
    );
    Ok(())
}

#[test]
fn it_applies_wire_modes() -> CifResult<()> {
    let src = "L L1; W 20 0 0 100 0; E";

    // square ends by default
    let lib = parse_str(src, &CifReaderOptions::default())?;
    match &cell_named(&lib, "CIF_TOP").elems[0].inner {
        Shape::Path(p) => {
            assert_eq!((p.begin_ext, p.end_ext, p.round), (100, 100, false));
        }
        other => panic!("expected a path, got {:?}", other),
    }

    // flush ends via options
    let options = CifReaderOptionsBuilder::default()
        .wire_mode(WireMode::Flush)
        .build()?;
    let lib = parse_str(src, &options)?;
    match &cell_named(&lib, "CIF_TOP").elems[0].inner {
        Shape::Path(p) => assert_eq!((p.begin_ext, p.end_ext, p.round), (0, 0, false)),
        other => panic!("expected a path, got {:?}", other),
    }

    // round ends via options
    let options = CifReaderOptionsBuilder::default()
        .wire_mode(WireMode::Round)
        .build()?;
    let lib = parse_str(src, &options)?;
    match &cell_named(&lib, "CIF_TOP").elems[0].inner {
        Shape::Path(p) => assert_eq!((p.begin_ext, p.end_ext, p.round), (100, 100, true)),
        other => panic!("expected a path, got {:?}", other),
    }

    // an explicit path-type beats the configured mode
    let lib = parse_str("L L1; 98 0; W 20 0 0 100 0; E", &options)?;
    match &cell_named(&lib, "CIF_TOP").elems[0].inner {
        Shape::Path(p) => assert_eq!((p.begin_ext, p.end_ext, p.round), (0, 0, false)),
        other => panic!("expected a path, got {:?}", other),
    }
    Ok(())
}

#[test]
fn it_reads_round_flashes() -> CifResult<()> {
    let lib = parse_str("L L1; R 50 10 20; E", &CifReaderOptions::default())?;
    assert_eq!(
        cell_named(&lib, "CIF_TOP").elems[0].inner,
        Shape::Path(Path {
            points: vec![Point::new(100, 200)],
            width: 500,
            begin_ext: 250,
            end_ext: 250,
            round: true,
        })
    );
    Ok(())
}

#[test]
fn it_reads_nested_cells_with_fractional_scale() -> CifResult<()> {
    let lib = parse_str(
        "DS 1 2 1; L L1; B 10 10 0 0; DF; DS 2 3 2; C 1; DF; C 2; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 2);

    // the box is stored once, at C1's own scale
    let c1 = cell_named(&lib, "C1");
    assert_eq!(
        c1.elems[0].inner,
        Shape::Rect(Rect {
            p0: Point::new(-100, -100),
            p1: Point::new(100, 100),
        })
    );

    let c2 = cell_named(&lib, "C2");
    assert_eq!(c2.insts.len(), 1);
    assert_eq!(c2.insts[0].cell, key_named(&lib, "C1"));
    assert_eq!(c2.insts[0].trans, InstTrans::identity());
    assert!(c2.insts[0].array.is_none());
    Ok(())
}

#[test]
fn it_allocates_lxdy_layers() -> CifResult<()> {
    let lib = parse_str(
        "L L7D3; B 2 2 0 0; L 12; B 2 2 0 0; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 1);
    assert_eq!(cell_named(&lib, "CIF_TOP").elems.len(), 2);
    assert_eq!(lib.layers.get(0), Some(&LayerInfo::numbered(7, 3)));
    assert_eq!(lib.layers.get(1), Some(&LayerInfo::numbered(12, 0)));
    Ok(())
}

#[test]
fn it_keeps_lxdy_name_tags() -> CifResult<()> {
    let lib = parse_str("L L7D3_POLY; B 2 2 0 0; E", &CifReaderOptions::default())?;
    assert_eq!(
        lib.layers.get(0),
        Some(&LayerInfo {
            layer: 7,
            datatype: 3,
            name: Some("POLY".to_string()),
        })
    );
    Ok(())
}

#[test]
fn it_skips_colliding_layer_bindings() -> CifResult<()> {
    // "5" claims (5,0) in the first binding pass; "L5D0" then collides
    // and keeps only its name
    let lib = parse_str(
        "L 5; B 2 2 0 0; L L5D0; B 2 2 0 0; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.layers.get(0), Some(&LayerInfo::numbered(5, 0)));
    assert_eq!(lib.layers.get(1), Some(&LayerInfo::named("L5D0")));
    Ok(())
}

#[test]
fn it_consults_the_layer_map_for_plain_numbers() -> CifResult<()> {
    let mut layers = LayerMap::new();
    let idx = layers.add(LayerInfo::numbered(12, 0));
    let options = CifReaderOptionsBuilder::default()
        .layer_map(layers)
        .build()?;

    let lib = parse_str("L 12; B 2 2 0 0; E", &options)?;
    assert_eq!(cell_named(&lib, "CIF_TOP").elems[0].layer, idx);
    assert_eq!(lib.layers.get(idx), Some(&LayerInfo::numbered(12, 0)));
    assert_eq!(lib.layers.len(), 1);
    Ok(())
}

#[test]
fn it_masks_unknown_layers_when_told_to() -> CifResult<()> {
    let options = CifReaderOptionsBuilder::default()
        .create_other_layers(false)
        .build()?;
    let lib = parse_str("L FOO; B 2 2 0 0; E", &options)?;

    // the layer selection keeps the top cell, but the shape is dropped
    assert_eq!(lib.cells.len(), 1);
    assert!(cell_named(&lib, "CIF_TOP").elems.is_empty());
    assert!(lib.layers.is_empty());
    Ok(())
}

#[test]
fn it_drops_shapes_without_a_layer() -> CifResult<()> {
    let lib = parse_str("B 2 2 0 0; E", &CifReaderOptions::default())?;
    assert_eq!(lib.cells.len(), 1);
    assert!(cell_named(&lib, "CIF_TOP").elems.is_empty());
    Ok(())
}

#[test]
fn it_reads_array_instances() -> CifResult<()> {
    let lib = parse_str(
        "DS 1; L L1; B 2 2 0 0; DF; 93 4 10 3 20; C 1; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 2);
    let top = cell_named(&lib, "CIF_TOP");
    assert_eq!(top.insts.len(), 1);
    assert_eq!(top.insts[0].cell, key_named(&lib, "C1"));
    assert_eq!(
        top.insts[0].array,
        Some(InstArray {
            cols: 4,
            rows: 3,
            xstep: Point::new(100, 0),
            ystep: Point::new(0, 200),
        })
    );
    Ok(())
}

#[test]
fn it_accumulates_instance_transforms() -> CifResult<()> {
    let src = "DS 1; L L1; B 2 2 0 0; DF; \
               C 1 T 10 20; C 1 M X; C 1 R 0 1; C 1 T 10 0 R 0 1 M X; C 1 R 1 1; E";
    let lib = parse_str(src, &CifReaderOptions::default())?;
    let top = cell_named(&lib, "CIF_TOP");
    assert_eq!(top.insts.len(), 5);
    assert_eq!(
        top.insts[0].trans,
        InstTrans::Ortho {
            rot: 0,
            mirror: false,
            disp: Point::new(100, 200)
        }
    );
    assert_eq!(
        top.insts[1].trans,
        InstTrans::Ortho {
            rot: 2,
            mirror: true,
            disp: Point::new(0, 0)
        }
    );
    assert_eq!(
        top.insts[2].trans,
        InstTrans::Ortho {
            rot: 1,
            mirror: false,
            disp: Point::new(0, 0)
        }
    );
    // source order applies innermost-first: translate, then rotate, then mirror
    assert_eq!(
        top.insts[3].trans,
        InstTrans::Ortho {
            rot: 1,
            mirror: true,
            disp: Point::new(0, 100)
        }
    );
    match top.insts[4].trans {
        InstTrans::Complex {
            mag,
            angle,
            mirror,
            disp,
        } => {
            assert!((mag - 1.0).abs() < 1e-9);
            assert!((angle - 45.0).abs() < 1e-9);
            assert!(!mirror);
            assert_eq!(disp, Point::new(0, 0));
        }
        other => panic!("expected a complex transform, got {:?}", other),
    }
    Ok(())
}

#[test]
fn it_reads_rotated_boxes() -> CifResult<()> {
    // direction (0,1) turns the box a quarter-turn
    let lib = parse_str("L 1; B 20 10 0 0 0 1; E", &CifReaderOptions::default())?;
    assert_eq!(
        cell_named(&lib, "CIF_TOP").elems[0].inner,
        Shape::Polygon(Polygon {
            points: vec![
                Point::new(50, -100),
                Point::new(-50, -100),
                Point::new(-50, 100),
                Point::new(50, 100),
            ],
        })
    );

    // off-origin: the corner offsets are scaled, the center (5,7) is not
    let lib = parse_str("L 1; B 20 10 5 7 0 1; E", &CifReaderOptions::default())?;
    assert_eq!(
        cell_named(&lib, "CIF_TOP").elems[0].inner,
        Shape::Polygon(Polygon {
            points: vec![
                Point::new(55, -93),
                Point::new(-45, -93),
                Point::new(-45, 107),
                Point::new(55, 107),
            ],
        })
    );
    Ok(())
}

#[test]
fn it_reads_labels() -> CifResult<()> {
    let mut layers = LayerMap::new();
    let m1 = layers.add(LayerInfo::named("M1"));
    let m2 = layers.add(LayerInfo::named("M2"));
    let options = CifReaderOptionsBuilder::default()
        .layer_map(layers)
        .build()?;

    let src = "L M1; 94 net1 5 10 1.5; 94 \"hello world\" 0 0 2.0 M2; 95 inbox 4 4 7 8; E";
    let lib = parse_str(src, &options)?;
    let top = cell_named(&lib, "CIF_TOP");
    assert_eq!(top.elems.len(), 3);

    // label height is given in microns and lands in database units
    assert_eq!(top.elems[0].layer, m1);
    assert_eq!(
        top.elems[0].inner,
        Shape::Text(Text {
            string: "net1".to_string(),
            loc: Point::new(50, 100),
            size: Some(1500),
        })
    );

    // quoted text, and a target-layer override
    assert_eq!(top.elems[1].layer, m2);
    assert_eq!(
        top.elems[1].inner,
        Shape::Text(Text {
            string: "hello world".to_string(),
            loc: Point::new(0, 0),
            size: Some(2000),
        })
    );

    // the "95" box dimensions are dropped
    assert_eq!(top.elems[2].layer, m1);
    assert_eq!(
        top.elems[2].inner,
        Shape::Text(Text {
            string: "inbox".to_string(),
            loc: Point::new(70, 80),
            size: None,
        })
    );
    Ok(())
}

#[test]
fn it_renames_cells_uniquely() -> CifResult<()> {
    let lib = parse_str(
        "DS 1; 9 foo; DF; DS 2; 9 foo; DF; C 1; C 2; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 3);
    assert!(lib.cells.values().any(|c| c.name == "foo"));
    assert!(lib.cells.values().any(|c| c.name == "foo$1"));
    assert!(lib.cells.values().any(|c| c.name == "CIF_TOP"));
    Ok(())
}

#[test]
fn it_creates_cells_for_dangling_references() -> CifResult<()> {
    let lib = parse_str(
        "DS 1; L L1; B 2 2 0 0; DF; C 1; C 7; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(lib.cells.len(), 3);
    let c7 = cell_named(&lib, "C7");
    assert!(c7.elems.is_empty());
    assert!(c7.insts.is_empty());
    Ok(())
}

#[test]
fn it_defaults_the_ds_scale() -> CifResult<()> {
    let a = parse_str(
        "DS 1; L L1; B 4 4 0 0; DF; C 1; E",
        &CifReaderOptions::default(),
    )?;
    let b = parse_str(
        "DS 1 1 1; L L1; B 4 4 0 0; DF; C 1; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
    Ok(())
}

#[test]
fn it_ignores_comments() -> CifResult<()> {
    let src = "DS 1; L L1; B 4 4 0 0; DF; C 1; E";
    let plain = parse_str(src, &CifReaderOptions::default())?;
    let commented = parse_str(
        &format!("(header (nested (deeper)) tail) {}", src),
        &CifReaderOptions::default(),
    )?;
    assert_eq!(
        serde_json::to_string(&plain).unwrap(),
        serde_json::to_string(&commented).unwrap()
    );
    Ok(())
}

#[test]
fn it_reads_terse_sources() -> CifResult<()> {
    // commas and missing spaces are all just separators
    let mut layers = LayerMap::new();
    let m1 = layers.add(LayerInfo::named("M1"));
    let options = CifReaderOptionsBuilder::default()
        .layer_map(layers)
        .build()?;

    let lib = parse_str("LM1;B100,200 10,20;E", &options)?;
    assert_eq!(
        cell_named(&lib, "CIF_TOP").elems[0].inner,
        Shape::Rect(Rect {
            p0: Point::new(-400, -800),
            p1: Point::new(600, 1200),
        })
    );
    assert_eq!(cell_named(&lib, "CIF_TOP").elems[0].layer, m1);
    Ok(())
}

#[test]
fn it_applies_the_database_unit() -> CifResult<()> {
    let options = CifReaderOptionsBuilder::default().dbu(0.0005).build()?;
    let lib = parse_str("L 1; B 10 10 0 0; E", &options)?;
    assert_eq!(lib.dbu, 0.0005);
    assert_eq!(
        cell_named(&lib, "CIF_TOP").elems[0].inner,
        Shape::Rect(Rect {
            p0: Point::new(-100, -100),
            p1: Point::new(100, 100),
        })
    );
    Ok(())
}

#[test]
fn it_tolerates_unknown_commands() -> CifResult<()> {
    let lib = parse_str("Z 1 2 3; DD 4; E", &CifReaderOptions::default())?;
    assert_eq!(lib.cells.len(), 0);
    Ok(())
}

#[test]
fn it_tolerates_text_after_e() -> CifResult<()> {
    let lib = parse_str("L 1; B 2 2 0 0; E 42", &CifReaderOptions::default())?;
    assert_eq!(lib.cells.len(), 1);
    Ok(())
}

#[test]
fn it_produces_no_cells_for_empty_input() -> CifResult<()> {
    let lib = parse_str(" (just a comment) E", &CifReaderOptions::default())?;
    assert_eq!(lib.cells.len(), 0);
    assert!(lib.layers.is_empty());
    Ok(())
}

#[test]
fn it_counts_stats() -> CifResult<()> {
    let lib = parse_str(
        "DS 1; L L1; B 2 2 0 0; W 2 0 0 10 0; P 0 0 4 0 4 4; R 2 0 0; 94 x 0 0; DF; C 1; C 1; E",
        &CifReaderOptions::default(),
    )?;
    assert_eq!(
        lib.stats(),
        LibraryStats {
            cells: 2,
            rects: 1,
            polygons: 1,
            paths: 2,
            texts: 1,
            insts: 2,
        }
    );
    Ok(())
}

#[test]
fn it_round_trips_through_json() -> CifResult<()> {
    let lib = parse_str(
        "DS 1; L L1; B 2 2 0 0; DF; 93 2 10 2 10; C 1; E",
        &CifReaderOptions::default(),
    )?;
    let json = serde_json::to_string(&lib).unwrap();
    let lib2: Library = serde_json::from_str(&json).unwrap();
    assert_eq!(json, serde_json::to_string(&lib2).unwrap());
    Ok(())
}

#[test]
fn it_parses_from_file() -> CifResult<()> {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "L 1; B 2 2 0 0;")?;
    writeln!(file, "E")?;

    let lib = parse_file(file.path(), &CifReaderOptions::default())?;
    assert_eq!(lib.cells.len(), 1);
    assert_eq!(lib.layers.get(0), Some(&LayerInfo::numbered(1, 0)));
    Ok(())
}

#[test]
fn it_fails_on_integer_overflow() {
    assert_eq!(
        parse_err("L L1; B 99999999999 2 0 0; E"),
        CifParseErrorType::IntegerOverflow
    );
}

#[test]
fn it_fails_on_empty_layer_names() {
    assert_eq!(parse_err("L ; E"), CifParseErrorType::MissingLayerName);
}

#[test]
fn it_fails_on_mis_nested_terminators() {
    assert_eq!(parse_err("DS 1; E"), CifParseErrorType::MisplacedECommand);
    assert_eq!(parse_err("DF; E"), CifParseErrorType::MisplacedDfCommand);
}

#[test]
fn it_fails_on_bad_d_commands() {
    assert_eq!(parse_err("DX 1; E"), CifParseErrorType::InvalidDCommand);
}

#[test]
fn it_fails_on_bad_transforms() {
    assert_eq!(
        parse_err("DS 1; DF; C 1 Q; E"),
        CifParseErrorType::InvalidTransform
    );
    assert_eq!(
        parse_err("DS 1; DF; C 1 M Z; E"),
        CifParseErrorType::InvalidMirrorAxis
    );
}

#[test]
fn it_fails_on_missing_terminators() {
    assert_eq!(parse_err("L L1 2; E"), CifParseErrorType::MissingTerminator);
}

#[test]
fn it_fails_at_end_of_stream() {
    assert_eq!(parse_err(""), CifParseErrorType::UnexpectedEof);
}

#[test]
fn it_fails_on_deep_nesting() {
    let mut src = String::new();
    for i in 0..300 {
        src.push_str(&format!("DS {}; ", i));
    }
    assert_eq!(parse_err(&src), CifParseErrorType::NestingTooDeep);
}

#[test]
fn it_reports_error_context() {
    let err = parse_str("DS 1;\nL L1;\nB 1 1 0 0\nDF;", &CifReaderOptions::default()).unwrap_err();
    match err {
        CifError::Parse { tp, line, cell } => {
            assert_eq!(tp, CifParseErrorType::ExpectedDigit);
            assert_eq!(line, 4);
            assert_eq!(cell, "C1");
        }
        other => panic!("expected a parse error, got {:?}", other),
    }
}
