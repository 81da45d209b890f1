//! ポリゴンに属するアーク群からリングを組み立てる。
//!
//! アークの順序・向きは保証されないため、始点/終点ノードIDを手がかりに
//! 連結していく。3本以上のアークが集まるノードでは走査順に最初に
//! 見つかったアークを採用するので、入力順によって分解結果が変わりうる。
//! 外周/穴の判別や回転方向の正規化は行わない。

use std::rc::Rc;

use tracing::debug;

use crate::model::{ArcRecord, ModId, Point3, Ring};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RingAssembly {
    pub rings: Vec<Ring>,
    /// すべてのリングが閉じたかどうか
    pub success: bool,
}

/// アーク群をリングに連結する。閉じなかったリングも途中まで出力に残す。
pub fn assemble_rings(edges: &[Rc<ArcRecord>]) -> RingAssembly {
    let mut consumed = vec![false; edges.len()];
    let mut remaining = edges.len();
    let mut rings = Vec::new();
    let mut success = true;

    while remaining > 0 {
        // 未使用の先頭アークを種にする
        let Some(seed_index) = consumed.iter().position(|used| !used) else {
            break;
        };
        let seed = &edges[seed_index];
        consumed[seed_index] = true;
        remaining -= 1;

        // 頂点数の合計を上限として確保
        let capacity: usize = edges
            .iter()
            .zip(&consumed)
            .filter(|(_, used)| !**used)
            .map(|(edge, _)| edge.vertices.len())
            .sum::<usize>()
            + seed.vertices.len();
        let mut vertices: Vec<Point3> = Vec::with_capacity(capacity);
        add_edge_to_ring(&mut vertices, seed, false, false);

        let start_node = &seed.start_node;
        let mut link_node = &seed.end_node;

        // 1パスで何も追加できなくなるまで走査を繰り返す
        let mut work_done = true;
        while link_node != start_node && remaining > 0 && work_done {
            work_done = false;

            for (index, edge) in edges.iter().enumerate() {
                if consumed[index] {
                    continue;
                }

                if edge.start_node == *link_node {
                    add_edge_to_ring(&mut vertices, edge, false, true);
                    link_node = &edge.end_node;
                } else if edge.end_node == *link_node {
                    add_edge_to_ring(&mut vertices, edge, true, true);
                    link_node = &edge.start_node;
                } else {
                    continue;
                }

                consumed[index] = true;
                remaining -= 1;
                work_done = true;

                if link_node == start_node {
                    break;
                }
            }
        }

        let closed = link_node == start_node;
        if !closed {
            debug!(
                "ring seeded by {} left open at node {} (start node {})",
                seed.id,
                display_node(link_node),
                display_node(start_node)
            );
            success = false;
        }

        rings.push(Ring { vertices, closed });
    }

    RingAssembly { rings, success }
}

/// アークの頂点列をリングへ追加する。`skip_first` は接続点の重複を除く。
fn add_edge_to_ring(ring: &mut Vec<Point3>, edge: &ArcRecord, reverse: bool, skip_first: bool) {
    let skip = usize::from(skip_first);
    if reverse {
        ring.extend(edge.vertices.iter().rev().skip(skip).copied());
    } else {
        ring.extend(edge.vertices.iter().skip(skip).copied());
    }
}

fn display_node(node: &ModId) -> String {
    if node.is_set() {
        node.to_string()
    } else {
        "<unset>".to_string()
    }
}
