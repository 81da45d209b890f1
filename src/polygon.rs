//! ラインとポリゴンの対応付け、およびポリゴン単位のリング構築。
//!
//! 全ラインのアタッチが終わってからでないとポリゴンのエッジ一覧は
//! 完成しないため、アタッチ → シール → リング構築 の順で処理する。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::cache::FeatureCache;
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::model::{ArcRecord, ModId, PolygonFeature};
use crate::source::RecordSource;

/// ポリゴンIDから書き換え可能なポリゴンを引く
pub trait PolygonLookup {
    fn polygon_mut(&mut self, id: &ModId) -> Result<Option<&mut PolygonFeature>>;
}

impl PolygonLookup for BTreeMap<ModId, PolygonFeature> {
    fn polygon_mut(&mut self, id: &ModId) -> Result<Option<&mut PolygonFeature>> {
        Ok(self.get_mut(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    pub arcs: usize,
    /// ポリゴンに追加したエッジ数（左右それぞれ数える）
    pub attached: usize,
    /// 設定済みだが見つからなかったポリゴン参照の数
    pub unresolved: usize,
}

impl AttachReport {
    fn merge(&mut self, other: &AttachReport) {
        self.arcs += other.arcs;
        self.attached += other.attached;
        self.unresolved += other.unresolved;
    }
}

/// 各アークを左右のポリゴンのエッジ一覧へ追加する。
///
/// 1本のアークが2つのポリゴンに追加されることがある。見つからない
/// ポリゴン参照は読み飛ばす。
pub fn attach_arcs_to_polygons<I, L>(arcs: I, lookup: &mut L) -> Result<AttachReport>
where
    I: IntoIterator<Item = Result<ArcRecord>>,
    L: PolygonLookup + ?Sized,
{
    let mut report = AttachReport::default();

    for arc in arcs {
        let arc = Rc::new(arc?);
        report.arcs += 1;

        for side in [&arc.left_polygon, &arc.right_polygon] {
            if !side.is_set() {
                continue;
            }
            match lookup.polygon_mut(side)? {
                Some(polygon) => {
                    polygon.add_edge(Rc::clone(&arc))?;
                    report.attached += 1;
                }
                None => report.unresolved += 1,
            }
        }
    }

    Ok(report)
}

/// ラインモジュールのリーダー
pub struct LineReader<S: RecordSource<Record = ArcRecord>> {
    cache: FeatureCache<S>,
}

impl<S: RecordSource<Record = ArcRecord>> LineReader<S> {
    pub fn new(source: S, config: &ReaderConfig) -> Self {
        Self {
            cache: FeatureCache::new(source, config),
        }
    }

    pub fn module(&self) -> &str {
        self.cache.module()
    }

    pub fn cache(&self) -> &FeatureCache<S> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FeatureCache<S> {
        &mut self.cache
    }

    pub fn next_line(&mut self) -> Result<Option<Cow<'_, ArcRecord>>> {
        self.cache.next_feature()
    }

    pub fn get_line(&mut self, record: i32) -> Result<Option<&ArcRecord>> {
        self.cache.get_by_id(record)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.cache.rewind()
    }

    /// 全ラインを先頭から流し、参照しているポリゴンへアタッチする
    pub fn attach_to_polygons<L>(&mut self, lookup: &mut L) -> Result<AttachReport>
    where
        L: PolygonLookup + ?Sized,
    {
        self.cache.rewind()?;

        let cache = &mut self.cache;
        let arcs = std::iter::from_fn(move || {
            cache
                .next_feature()
                .map(|line| line.map(Cow::into_owned))
                .transpose()
        });
        let report = attach_arcs_to_polygons(arcs, lookup)?;

        self.cache.rewind()?;
        debug!(
            "Attached {} edges from {} lines of module {}",
            report.attached,
            report.arcs,
            self.module()
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub polygons: usize,
    pub attach: AttachReport,
    /// すべてのリングが閉じたポリゴン数
    pub assembled: usize,
    /// 閉じないリングを含むポリゴン（途中までのリングは保持している）
    pub unclosed: Vec<ModId>,
    /// エッジが1本もないポリゴン
    pub empty: Vec<ModId>,
}

impl AssemblyReport {
    pub fn is_success(&self) -> bool {
        self.unclosed.is_empty()
    }
}

/// ポリゴンモジュールのリーダー
pub struct PolygonReader<S: RecordSource<Record = PolygonFeature>> {
    cache: FeatureCache<S>,
    rings_assembled: bool,
    report: AssemblyReport,
}

impl<S: RecordSource<Record = PolygonFeature>> PolygonReader<S> {
    pub fn new(source: S, config: &ReaderConfig) -> Self {
        Self {
            cache: FeatureCache::new(source, config),
            rings_assembled: false,
            report: AssemblyReport::default(),
        }
    }

    pub fn module(&self) -> &str {
        self.cache.module()
    }

    pub fn cache(&self) -> &FeatureCache<S> {
        &self.cache
    }

    pub fn rings_assembled(&self) -> bool {
        self.rings_assembled
    }

    pub fn report(&self) -> &AssemblyReport {
        &self.report
    }

    pub fn next_polygon(&mut self) -> Result<Option<Cow<'_, PolygonFeature>>> {
        self.cache.next_feature()
    }

    pub fn get_polygon(&mut self, record: i32) -> Result<Option<&PolygonFeature>> {
        self.cache.get_by_id(record)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.cache.rewind()
    }

    /// インデックス済みのポリゴンをID順に返す
    pub fn polygons(&self) -> impl Iterator<Item = &PolygonFeature> {
        self.cache.iter()
    }

    /// 全ラインをアタッチしてから、各ポリゴンのリングを組み立てる。
    ///
    /// 2回目以降は何もせず前回の結果を返す。閉じないポリゴンがあっても
    /// 処理は続け、結果の `unclosed` に記録する。
    pub fn assemble_rings<L>(&mut self, lines: &mut [LineReader<L>]) -> Result<&AssemblyReport>
    where
        L: RecordSource<Record = ArcRecord>,
    {
        if self.rings_assembled {
            return Ok(&self.report);
        }

        self.cache.fill_index()?;

        let mut report = AssemblyReport::default();
        if let Err(e) = self.attach_lines(lines, &mut report.attach) {
            // 途中までのアタッチを取り消し、再実行で二重にならないようにする
            for polygon in self.cache.iter_mut() {
                polygon.clear_edges();
            }
            return Err(e);
        }

        // アタッチ完了。以降エッジは変更させない
        for polygon in self.cache.iter_mut() {
            polygon.seal();
        }

        for polygon in self.cache.iter_mut() {
            report.polygons += 1;

            if polygon.edges().is_empty() {
                debug!("Polygon {} has no edges", polygon.id);
                report.empty.push(polygon.id.clone());
                continue;
            }

            if polygon.assemble_rings()? {
                report.assembled += 1;
            } else {
                warn!("problem assembling rings for {}, write anyway", polygon.id);
                report.unclosed.push(polygon.id.clone());
            }
        }

        info!(
            "Assembled rings for module {}: {} polygons, {} closed, {} unclosed, {} empty",
            self.module(),
            report.polygons,
            report.assembled,
            report.unclosed.len(),
            report.empty.len()
        );

        self.rings_assembled = true;
        self.report = report;
        Ok(&self.report)
    }

    fn attach_lines<L>(
        &mut self,
        lines: &mut [LineReader<L>],
        report: &mut AttachReport,
    ) -> Result<()>
    where
        L: RecordSource<Record = ArcRecord>,
    {
        for line in lines.iter_mut() {
            let attached = line.attach_to_polygons(self)?;
            report.merge(&attached);
        }
        Ok(())
    }
}

impl<S: RecordSource<Record = PolygonFeature>> PolygonLookup for PolygonReader<S> {
    fn polygon_mut(&mut self, id: &ModId) -> Result<Option<&mut PolygonFeature>> {
        if !id.module.eq_ignore_ascii_case(self.cache.module()) {
            return Ok(None);
        }
        self.cache.get_by_id_mut(id.record)
    }
}
