use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::{Result, SdtsError};
use crate::rings::assemble_rings;

/// モジュール名とレコード番号の組。レコード番号 -1 は未設定を表す。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModId {
    pub module: String,
    pub record: i32,
}

impl ModId {
    pub const UNSET_RECORD: i32 = -1;

    pub fn new(module: impl Into<String>, record: i32) -> Self {
        Self {
            module: module.into(),
            record,
        }
    }

    pub fn unset() -> Self {
        Self {
            module: String::new(),
            record: Self::UNSET_RECORD,
        }
    }

    pub fn is_set(&self) -> bool {
        self.record >= 0
    }
}

impl Default for ModId {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.record)
    }
}

impl FromStr for ModId {
    type Err = SdtsError;

    /// `MODN:RCID` 形式を解析する
    fn from_str(s: &str) -> Result<Self> {
        let (module, record) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| SdtsError::Parse(format!("expected MODN:RCID, got '{}'", s)))?;

        let record = record
            .trim()
            .parse::<i32>()
            .map_err(|e| SdtsError::Parse(format!("invalid record number in '{}': {}", s, e)))?;

        Ok(Self::new(module.trim(), record))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// ノード間を結ぶ境界線（アーク）。読み込み後は変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct ArcRecord {
    pub id: ModId,
    pub vertices: Vec<Point3>,
    pub start_node: ModId,
    pub end_node: ModId,
    pub left_polygon: ModId,
    pub right_polygon: ModId,
    pub attributes: Vec<ModId>,
}

impl ArcRecord {
    pub fn new(id: ModId, vertices: Vec<Point3>, start_node: ModId, end_node: ModId) -> Self {
        Self {
            id,
            vertices,
            start_node,
            end_node,
            left_polygon: ModId::unset(),
            right_polygon: ModId::unset(),
            attributes: Vec::new(),
        }
    }

    pub fn with_polygons(mut self, left: ModId, right: ModId) -> Self {
        self.left_polygon = left;
        self.right_polygon = right;
        self
    }

    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArcRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ArcRecord {} ({} -> {}, left {}, right {})",
            self.id, self.start_node, self.end_node, self.left_polygon, self.right_polygon
        )?;
        for attr in &self.attributes {
            writeln!(f, "  ATID {}", attr)?;
        }
        for (i, vertex) in self.vertices.iter().enumerate() {
            writeln!(f, "  {}: {}", i, vertex)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    pub vertices: Vec<Point3>,
    pub closed: bool,
}

impl Ring {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// エッジリストの状態。Sealed 以降はエッジを追加できない。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgePhase {
    #[default]
    Building,
    Sealed,
}

/// ポリゴン。ジオメトリはアタッチとリング構築でのみ作られる。
#[derive(Debug, Clone, Default)]
pub struct PolygonFeature {
    pub id: ModId,
    pub attributes: Vec<ModId>,
    phase: EdgePhase,
    edges: Vec<Rc<ArcRecord>>,
    rings: Vec<Ring>,
}

impl PolygonFeature {
    pub fn new(id: ModId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> EdgePhase {
        self.phase
    }

    pub fn is_sealed(&self) -> bool {
        self.phase == EdgePhase::Sealed
    }

    pub fn edges(&self) -> &[Rc<ArcRecord>] {
        &self.edges
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    pub fn add_edge(&mut self, edge: Rc<ArcRecord>) -> Result<()> {
        if self.is_sealed() {
            return Err(SdtsError::PolygonSealed(self.id.clone()));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn seal(&mut self) {
        self.phase = EdgePhase::Sealed;
    }

    /// エッジとリングを捨てて Building に戻す
    pub fn clear_edges(&mut self) {
        self.edges.clear();
        self.rings.clear();
        self.phase = EdgePhase::Building;
    }

    /// アタッチ済みのエッジからリングを組み立てる。
    ///
    /// 既にリングがあれば何もせず `Ok(true)`。エッジが無ければ `Ok(false)`。
    /// 閉じないリングがあっても途中までのリングは保持し `Ok(false)` を返す。
    pub fn assemble_rings(&mut self) -> Result<bool> {
        if !self.is_sealed() {
            return Err(SdtsError::EdgesNotSealed(self.id.clone()));
        }
        if !self.rings.is_empty() {
            return Ok(true);
        }
        if self.edges.is_empty() {
            return Ok(false);
        }

        let assembly = assemble_rings(&self.edges);
        self.rings = assembly.rings;
        Ok(assembly.success)
    }

    pub fn vertex_count(&self) -> usize {
        self.rings.iter().map(Ring::len).sum()
    }

    /// 各リングの先頭が平坦化した頂点列の何番目にあたるか
    pub fn ring_start_offsets(&self) -> Vec<usize> {
        self.rings
            .iter()
            .scan(0, |offset, ring| {
                let start = *offset;
                *offset += ring.len();
                Some(start)
            })
            .collect()
    }

    pub fn flattened_vertices(&self) -> Vec<Point3> {
        self.rings
            .iter()
            .flat_map(|ring| ring.vertices.iter().copied())
            .collect()
    }

    pub fn dump(&self) -> String {
        self.to_string()
    }
}

/// `dump()` と同じ複数行のテキスト
impl fmt::Display for PolygonFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PolygonFeature {}", self.id)?;
        for attr in &self.attributes {
            writeln!(f, "  ATID {}", attr)?;
        }
        for edge in &self.edges {
            writeln!(
                f,
                "  Edge {} ({} -> {}, {} vertices)",
                edge.id,
                edge.start_node,
                edge.end_node,
                edge.vertices.len()
            )?;
        }
        for (i, ring) in self.rings.iter().enumerate() {
            let state = if ring.closed { "closed" } else { "open" };
            writeln!(f, "  Ring {} ({}, {} vertices)", i, state, ring.len())?;
            for vertex in &ring.vertices {
                writeln!(f, "    {}", vertex)?;
            }
        }
        Ok(())
    }
}
