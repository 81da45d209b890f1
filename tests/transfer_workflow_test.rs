// tests/transfer_workflow_test.rs

use sdts_topo::{DuplicatePolicy, ModId, Point3, ReaderConfig, SdtsError, Transfer};

use std::fs;
use tempfile::TempDir;

/// PC01:1 は穴あき正方形、PC01:2 はその穴を埋める島、PC01:3 は閉じないポリゴン。
/// PC01 モジュールには重複レコードと範囲外レコードも含める。
const TRANSFER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Transfer name="workflow">
  <Module name="LE01" type="line">
    <Line record="1" startNode="NO01:1" endNode="NO01:1" leftPolygon="PC01:1" rightPolygon="PC01:0">
      <Coordinates>0,0 4,0 4,4 0,4 0,0</Coordinates>
    </Line>
    <Line record="2" startNode="NO01:2" endNode="NO01:2" leftPolygon="PC01:2" rightPolygon="PC01:1">
      <Coordinates>1,1 2,1 2,2 1,2 1,1</Coordinates>
    </Line>
  </Module>
  <Module name="LE02" type="line">
    <Line record="1" startNode="NO01:10" endNode="NO01:11" rightPolygon="PC01:3">
      <Coordinates>10,10 11,10</Coordinates>
    </Line>
    <Line record="2" startNode="NO01:11" endNode="NO01:12" rightPolygon="PC01:3">
      <Coordinates>11,10 11,11</Coordinates>
    </Line>
  </Module>
  <Module name="LE03" type="line">
    <Line record="1" startNode="NO02:1" endNode="NO02:2" leftPolygon="PC02:1">
      <Coordinates>20,20 21,20</Coordinates>
    </Line>
    <Line record="2" startNode="NO02:2" endNode="NO02:1" leftPolygon="PC02:1">
      <Coordinates>21,20 21,21 20,20</Coordinates>
    </Line>
  </Module>
  <Module name="PC01" type="polygon">
    <Polygon record="3"/>
    <Polygon record="1" attributes="AHPR:1"/>
    <Polygon record="2000000"/>
    <Polygon record="2"/>
    <Polygon record="3" attributes="AHPR:9"/>
  </Module>
  <Module name="PC02" type="polygon">
    <Polygon record="1"/>
  </Module>
</Transfer>
"#;

fn write_transfer(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("workflow.xml");
    fs::write(&path, TRANSFER).unwrap();
    path
}

#[test]
fn test_full_assembly_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let transfer = Transfer::open(&write_transfer(&temp_dir)).unwrap();
    assert_eq!(transfer.name(), "workflow");

    let mut polygons = transfer
        .assemble_polygons("PC01", &ReaderConfig::default())
        .unwrap();

    let report = polygons.report().clone();
    assert_eq!(report.polygons, 3);
    assert_eq!(report.assembled, 2);
    assert_eq!(report.unclosed, vec![ModId::new("PC01", 3)]);
    assert!(report.empty.is_empty());
    assert!(!report.is_success());

    let index = polygons.cache().index_report().clone();
    assert_eq!(index.indexed, 3);
    assert_eq!(index.duplicates, 1);
    assert_eq!(index.out_of_range, 1);

    // 外周と穴の2リング。順序は走査順で、外周/穴の判定はしない
    let square = polygons.get_polygon(1).unwrap().unwrap();
    assert_eq!(square.attributes, vec![ModId::new("AHPR", 1)]);
    assert_eq!(square.rings().len(), 2);
    assert!(square.rings().iter().all(|r| r.closed));
    assert_eq!(square.rings()[0].vertices[1], Point3::xy(4.0, 0.0));
    assert_eq!(square.rings()[1].vertices[1], Point3::xy(2.0, 1.0));
    assert_eq!(square.ring_start_offsets(), vec![0, 5]);
    assert_eq!(square.vertex_count(), 10);

    let island = polygons.get_polygon(2).unwrap().unwrap();
    assert_eq!(island.rings().len(), 1);
    assert_eq!(island.rings()[0].len(), 5);

    // 閉じないチェーンも途中までのリングとして残る
    let broken = polygons.get_polygon(3).unwrap().unwrap();
    assert!(broken.attributes.is_empty());
    assert_eq!(broken.rings().len(), 1);
    assert!(!broken.rings()[0].closed);
    assert_eq!(
        broken.rings()[0].vertices,
        vec![
            Point3::xy(10.0, 10.0),
            Point3::xy(11.0, 10.0),
            Point3::xy(11.0, 11.0)
        ]
    );
}

#[test]
fn test_streaming_after_assembly_is_sorted() {
    let transfer = Transfer::from_xml(TRANSFER).unwrap();
    let mut polygons = transfer
        .assemble_polygons("PC01", &ReaderConfig::default())
        .unwrap();

    polygons.rewind().unwrap();
    let mut ids = Vec::new();
    while let Some(polygon) = polygons.next_polygon().unwrap() {
        ids.push(polygon.id.record);
    }
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_second_polygon_module_uses_its_own_lines() {
    let transfer = Transfer::from_xml(TRANSFER).unwrap();
    let mut polygons = transfer
        .assemble_polygons("PC02", &ReaderConfig::default())
        .unwrap();

    assert!(polygons.report().is_success());
    assert_eq!(polygons.report().attach.arcs, 2);

    let polygon = polygons.get_polygon(1).unwrap().unwrap();
    assert_eq!(polygon.edges().len(), 2);
    assert_eq!(polygon.rings()[0].len(), 4);
}

#[test]
fn test_strict_duplicates_reject_transfer() {
    let transfer = Transfer::from_xml(TRANSFER).unwrap();
    let config = ReaderConfig::default().with_duplicates(DuplicatePolicy::Fail);

    let err = transfer.assemble_polygons("PC01", &config).err().unwrap();
    assert!(matches!(
        err,
        SdtsError::DuplicateRecord { record: 3, .. }
    ));
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = Transfer::open(&temp_dir.path().join("missing.xml"));
    assert!(matches!(result, Err(SdtsError::Io(_))));
}
