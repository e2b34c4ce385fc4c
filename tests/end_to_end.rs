#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use devicegen::device::{BoundaryCondition, MaterialProps};
use devicegen::engine::{Dim, Tag};
use devicegen::error::{FormatError, SequenceError};
use devicegen::mask::{LayerId, MaskRecord, Statement};
use devicegen::operations::{NewDotRectangle, NewLayer, NewTopLayer};
use devicegen::{
    DeviceConfig, DeviceTopology, DevicegenError, GeometryEngine, MaskCompiler, RectilinearEngine,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("devicegen-{}-{name}", std::process::id()))
}

/// A 3x4 plane next to a 1x4 gate strip, both on layer 1.
const LAYOUT: &str = "\
UNITS 0.001 1e-09
LAYER 1
XY 0:0
3000:0
3000:4000
0:4000
ENDEL
XY 3000:0
4000:0
4000:4000
3000:4000
ENDEL
";

const DOT_LAYERS: usize = 3;

fn count(statements: &[Statement], pred: fn(&Statement) -> bool) -> usize {
    statements.iter().filter(|s| pred(s)).count()
}

// ── Compiler ──

#[test]
fn single_rectangle_compiles_and_extrudes() {
    init_tracing();
    let records = vec![
        MaskRecord::Units {
            mask_unit: 1_000_000.0,
            meter_unit: 1.0,
        },
        MaskRecord::LayerStart(LayerId::new("1")),
        MaskRecord::Point { x: 0.0, y: 0.0 },
        MaskRecord::Point { x: 1.0, y: 0.0 },
        MaskRecord::Point { x: 1.0, y: 1.0 },
        MaskRecord::Point { x: 0.0, y: 1.0 },
        MaskRecord::ElementEnd,
    ];
    let script = MaskCompiler::new(10.0).compile(&records).unwrap();
    let statements = script.statements();
    assert_eq!(count(statements, |s| matches!(s, Statement::Point { .. })), 4);
    assert_eq!(count(statements, |s| matches!(s, Statement::Line { .. })), 4);
    assert_eq!(count(statements, |s| matches!(s, Statement::CurveLoop { .. })), 1);
    assert_eq!(count(statements, |s| matches!(s, Statement::PlaneSurface { .. })), 1);
    assert_eq!(
        count(statements, |s| matches!(s, Statement::BooleanFragments { .. })),
        0
    );

    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::from_script(&script, &mut engine, DeviceConfig::default()).unwrap();
    NewLayer::new(5.0)
        .with_points(2)
        .execute(&mut device, &mut engine)
        .unwrap();

    assert_eq!(device.regions().len(), 1);
    let lineage = device.regions().get("surf1").unwrap();
    assert_eq!(lineage.surface_frames.len(), 2);
    assert_eq!(lineage.volume_frames.len(), 1);
    assert_eq!(lineage.volume_frames[0].len(), 1);
}

#[test]
fn inconsistent_units_fail() {
    let text = LAYOUT.replace("1e-09", "1e-08");
    assert!(matches!(
        MaskCompiler::new(1.0).compile_str(&text),
        Err(DevicegenError::Format(FormatError::InconsistentUnits { .. }))
    ));
}

// ── Layering ──

#[test]
fn stacked_layers_grow_every_lineage() {
    init_tracing();
    let script = MaskCompiler::new(1.0).compile_str(LAYOUT).unwrap();
    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::from_script(&script, &mut engine, DeviceConfig::default()).unwrap();

    for thickness in [0.5, 1.0, 2.0] {
        NewLayer::new(thickness)
            .with_points(1)
            .execute(&mut device, &mut engine)
            .unwrap();
    }

    assert_eq!(device.regions().len(), 2);
    for (_, lineage) in device.regions().iter() {
        assert_eq!(lineage.surface_frames.len(), 4);
        assert_eq!(lineage.volume_frames.len(), 3);
        for (k, volumes) in lineage.volume_frames.iter().enumerate() {
            assert_eq!(volumes.len(), lineage.surface_frames[k + 1].len());
        }
    }
    assert_eq!(
        device.names(&engine, Dim::Volume),
        ["volume1", "volume2", "volume3"]
    );
}

#[test]
fn dot_column_is_disjoint_from_the_layer() {
    init_tracing();
    let mut engine = RectilinearEngine::new();
    engine.add_rectangle(0.0, 0.0, 0.0, 4.0, 4.0).unwrap();
    let mut device = DeviceTopology::new(DeviceConfig::default()).unwrap();
    device.setup_top_layer(&mut engine).unwrap();
    NewDotRectangle::new(1.0, 1.0, 1.0, 1.0)
        .with_mesh_size(0.5)
        .execute(&mut device, &mut engine)
        .unwrap();

    for _ in 0..DOT_LAYERS {
        NewLayer::new(1.0)
            .dot_region()
            .with_points(1)
            .execute(&mut device, &mut engine)
            .unwrap();
    }

    let dot = &device.dots()[0];
    assert_eq!(dot.volume_frames.len(), DOT_LAYERS);
    let column: BTreeSet<Tag> = dot.all_volumes().map(|v| v.tag).collect();
    assert_eq!(column.len(), DOT_LAYERS);

    for n in 1..=DOT_LAYERS {
        let layer = device
            .entity_tags(&engine, &[format!("volume{n}").as_str()], Dim::Volume)
            .unwrap();
        assert!(layer.iter().all(|t| !column.contains(t)));
        let label = format!("dot0-{n}");
        assert_eq!(
            device.entity_tags(&engine, &[label.as_str()], Dim::Volume).unwrap().len(),
            1
        );
    }

    let footprint = dot.surface_frames[0].clone();
    for (name, lineage) in device.regions().iter() {
        if lineage.surface_frames[0] == footprint {
            continue;
        }
        assert!(
            lineage.all_volumes().all(|v| !column.contains(&v.tag)),
            "{name} overlaps the dot column"
        );
    }
}

#[test]
fn layer_before_setup_is_a_sequence_error() {
    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::new(DeviceConfig::default()).unwrap();
    assert!(matches!(
        NewLayer::new(1.0).execute(&mut device, &mut engine),
        Err(DevicegenError::Sequence(SequenceError::NothingToExtrude(_)))
    ));
    assert!(device.is_first_layer());
}

// ── Labels and metadata ──

#[test]
fn relabel_to_self_overwrites_boundary() {
    let script = MaskCompiler::new(1.0).compile_str(LAYOUT).unwrap();
    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::from_script(&script, &mut engine, DeviceConfig::default()).unwrap();

    device
        .relabel_surface(
            &mut engine,
            &["surf2"],
            Some("gate"),
            Some(BoundaryCondition::new("gate", vec![0.1])),
        )
        .unwrap();
    device
        .relabel_surface(
            &mut engine,
            &["gate"],
            Some("gate"),
            Some(BoundaryCondition::new("gate", vec![0.4])),
        )
        .unwrap();

    assert_eq!(device.boundaries().len(), 1);
    assert_eq!(device.boundaries().get("gate").unwrap().params, vec![0.4]);
}

#[test]
fn splitting_a_single_surface_changes_nothing() {
    let script = MaskCompiler::new(1.0).compile_str(LAYOUT).unwrap();
    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::from_script(&script, &mut engine, DeviceConfig::default()).unwrap();
    let before = device.names(&engine, Dim::Surface);

    device.split_surface(&mut engine, "surf1").unwrap();

    assert_eq!(device.names(&engine, Dim::Surface), before);
    assert!(device.regions().get("surf1").is_some());
}

// ── Input files and export ──

#[test]
fn mask_file_to_mesh() {
    init_tracing();
    let layout = scratch("layout.txt");
    std::fs::write(&layout, LAYOUT).unwrap();
    let mut engine = RectilinearEngine::new();
    let mut device = DeviceTopology::from_mask_file(&layout, &mut engine, DeviceConfig::default()).unwrap();

    device
        .relabel_surface(&mut engine, &["surf2"], Some("gate"), None)
        .unwrap();
    NewLayer::new(1.0)
        .with_label("substrate")
        .with_material(MaterialProps::new("Si"))
        .execute(&mut device, &mut engine)
        .unwrap();
    NewTopLayer::new(0.5)
        .with_label("oxide")
        .execute(&mut device, &mut engine)
        .unwrap();
    device.label_bottom(&mut engine, "back_gate", None).unwrap();

    let mesh = scratch("device.msh");
    device.save_mesh(&mut engine, 3, &mesh, 1).unwrap();
    let text = std::fs::read_to_string(&mesh).unwrap();
    assert!(text.starts_with("$MeshFormat"));
    assert!(text.contains("$PhysicalNames"));
    assert!(text.contains("\"substrate\""));
    assert!(text.contains("\"back_gate\""));

    let geometry = scratch("device.geo_unrolled");
    device.save_geometry(&engine, &geometry).unwrap();
    assert!(std::fs::read_to_string(&geometry).unwrap().contains("Physical Volume"));

    for path in [layout, mesh, geometry] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn unknown_extension_is_rejected() {
    let path = scratch("layout.dxf");
    std::fs::write(&path, LAYOUT).unwrap();
    let mut engine = RectilinearEngine::new();
    let result = DeviceTopology::from_mask_file(&path, &mut engine, DeviceConfig::default());
    let _ = std::fs::remove_file(&path);

    assert!(matches!(
        result,
        Err(DevicegenError::Format(FormatError::UnsupportedInput { .. }))
    ));
    assert!(engine.entities(Dim::Surface).is_empty());
}
