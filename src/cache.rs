use std::borrow::Cow;
use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::{DuplicatePolicy, ReaderConfig};
use crate::error::{Result, SdtsError};
use crate::source::{Feature, RecordSource};

/// インデックス構築の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    /// 負または上限以上のIDで捨てたレコード数
    pub out_of_range: usize,
    /// 既に埋まっているIDに来たため捨てたレコード数
    pub duplicates: usize,
}

/// 前方向読み込みのレコード列に、レコードID順のランダムアクセスを与えるキャッシュ。
///
/// 最初の `get_by_id`（または `fill_index`）までは元の列をそのまま流し、
/// それ以降は全レコードを保持した配列から返す。
pub struct FeatureCache<S: RecordSource> {
    source: S,
    config: ReaderConfig,
    slots: Vec<Option<S::Record>>,
    indexed: bool,
    cursor: usize,
    report: IndexReport,
}

impl<S: RecordSource> FeatureCache<S> {
    pub fn new(source: S, config: &ReaderConfig) -> Self {
        Self {
            source,
            config: config.clone(),
            slots: Vec::new(),
            indexed: false,
            cursor: 0,
            report: IndexReport::default(),
        }
    }

    pub fn module(&self) -> &str {
        self.source.module()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn index_report(&self) -> &IndexReport {
        &self.report
    }

    /// 次のフィーチャー。インデックス前は所有値、インデックス後は借用を返す。
    pub fn next_feature(&mut self) -> Result<Option<Cow<'_, S::Record>>> {
        if !self.indexed {
            return Ok(self.source.read_next()?.map(Cow::Owned));
        }

        let start = self.cursor.min(self.slots.len());
        let next = self.slots[start..]
            .iter()
            .position(Option::is_some)
            .map(|offset| start + offset);

        match next {
            Some(index) => {
                self.cursor = index + 1;
                Ok(self.slots[index].as_ref().map(Cow::Borrowed))
            }
            None => {
                self.cursor = self.slots.len();
                Ok(None)
            }
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        if self.indexed {
            self.cursor = 0;
            Ok(())
        } else {
            self.source.rewind()
        }
    }

    /// 元の列を先頭から最後まで読み、レコードIDで配列に格納する。一度だけ行う。
    pub fn fill_index(&mut self) -> Result<&IndexReport> {
        if self.indexed {
            return Ok(&self.report);
        }

        self.source.rewind()?;

        let mut slots: Vec<Option<S::Record>> = Vec::new();
        let mut report = IndexReport::default();

        while let Some(feature) = self.source.read_next()? {
            let record = feature.mod_id().record;

            let index = match usize::try_from(record) {
                Ok(index) if record < self.config.max_record_id => index,
                _ => {
                    warn!(
                        "Dropping feature {} in module {}: record id out of range",
                        feature.mod_id(),
                        self.source.module()
                    );
                    report.out_of_range += 1;
                    continue;
                }
            };

            if index >= slots.len() {
                slots.resize_with(index * 5 / 4 + 100, || None);
            }

            if slots[index].is_some() {
                match self.config.duplicates {
                    DuplicatePolicy::Skip => {
                        warn!(
                            "Duplicate record {} in module {}, keeping the first one",
                            record,
                            self.source.module()
                        );
                        report.duplicates += 1;
                        continue;
                    }
                    DuplicatePolicy::Fail => {
                        return Err(SdtsError::DuplicateRecord {
                            module: self.source.module().to_string(),
                            record,
                        });
                    }
                }
            }

            slots[index] = Some(feature);
            report.indexed += 1;
        }

        debug!(
            "Indexed module {}: {} features ({} out of range, {} duplicates)",
            self.source.module(),
            report.indexed,
            report.out_of_range,
            report.duplicates
        );

        self.slots = slots;
        self.indexed = true;
        self.cursor = 0;
        self.report = report;

        Ok(&self.report)
    }

    /// インデックスを破棄して読み流しモードへ戻す
    pub fn clear_index(&mut self) -> Result<()> {
        self.slots.clear();
        self.indexed = false;
        self.cursor = 0;
        self.report = IndexReport::default();
        self.source.rewind()
    }

    pub fn get_by_id(&mut self, record: i32) -> Result<Option<&S::Record>> {
        self.fill_index()?;
        Ok(usize::try_from(record)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref))
    }

    pub fn get_by_id_mut(&mut self, record: i32) -> Result<Option<&mut S::Record>> {
        self.fill_index()?;
        Ok(usize::try_from(record)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::as_mut))
    }

    /// キャッシュ済みフィーチャーをID順に返す（インデックス前は空）
    pub fn iter(&self) -> impl Iterator<Item = &S::Record> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut S::Record> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全レコードが参照しているモジュール名を重複なしで集める
    pub fn scan_module_references(&mut self) -> Result<Vec<String>> {
        let mut modules = BTreeSet::new();

        if self.indexed {
            for feature in self.iter() {
                for reference in feature.references() {
                    modules.insert(reference.module.clone());
                }
            }
        } else {
            self.source.rewind()?;
            while let Some(feature) = self.source.read_next()? {
                for reference in feature.references() {
                    modules.insert(reference.module.clone());
                }
            }
            self.source.rewind()?;
        }

        Ok(modules.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArcRecord, ModId, Point3, PolygonFeature};
    use crate::source::VecSource;

    fn polygons(records: &[i32]) -> VecSource<PolygonFeature> {
        VecSource::new(
            "PC01",
            records
                .iter()
                .map(|&r| PolygonFeature::new(ModId::new("PC01", r)))
                .collect(),
        )
    }

    fn drain<S: RecordSource>(cache: &mut FeatureCache<S>) -> Vec<i32> {
        let mut ids = Vec::new();
        while let Some(feature) = cache.next_feature().unwrap() {
            ids.push(feature.mod_id().record);
        }
        ids
    }

    #[test]
    fn test_streams_before_indexing() {
        let mut cache = FeatureCache::new(polygons(&[7, 3, 5]), &ReaderConfig::default());

        assert_eq!(drain(&mut cache), vec![7, 3, 5]);
        assert!(!cache.is_indexed());

        cache.rewind().unwrap();
        assert_eq!(drain(&mut cache), vec![7, 3, 5]);
    }

    #[test]
    fn test_get_by_id_materializes_once() {
        let ids = [42, 3, 17, 0, 250];
        let mut cache = FeatureCache::new(polygons(&ids), &ReaderConfig::default());

        for &id in &ids {
            let feature = cache.get_by_id(id).unwrap().unwrap();
            assert_eq!(feature.id.record, id);
        }
        assert!(cache.get_by_id(1).unwrap().is_none());
        assert!(cache.get_by_id(-1).unwrap().is_none());
        assert!(cache.get_by_id(999_999).unwrap().is_none());

        assert!(cache.is_indexed());
        assert_eq!(cache.source().reads(), ids.len());
        assert_eq!(cache.len(), ids.len());
    }

    #[test]
    fn test_indexed_stream_is_sorted() {
        let mut cache = FeatureCache::new(polygons(&[42, 3, 17, 0]), &ReaderConfig::default());
        cache.fill_index().unwrap();

        assert_eq!(drain(&mut cache), vec![0, 3, 17, 42]);
        assert!(cache.next_feature().unwrap().is_none());

        cache.rewind().unwrap();
        assert_eq!(drain(&mut cache), vec![0, 3, 17, 42]);
    }

    #[test]
    fn test_out_of_range_ids_are_dropped() {
        let config = ReaderConfig::default().with_max_record_id(100);
        let mut cache = FeatureCache::new(polygons(&[1, 100, -1, 5, 5000]), &config);

        let report = cache.fill_index().unwrap().clone();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.out_of_range, 3);

        assert!(cache.get_by_id(1).unwrap().is_some());
        assert!(cache.get_by_id(5).unwrap().is_some());
        assert!(cache.get_by_id(100).unwrap().is_none());
        assert_eq!(drain(&mut cache), vec![1, 5]);
    }

    #[test]
    fn test_duplicate_skip_keeps_first() {
        let mut first = PolygonFeature::new(ModId::new("PC01", 4));
        first.attributes.push(ModId::new("AHPR", 1));
        let second = PolygonFeature::new(ModId::new("PC01", 4));
        let source = VecSource::new("PC01", vec![first, second]);

        let mut cache = FeatureCache::new(source, &ReaderConfig::default());
        assert_eq!(cache.fill_index().unwrap().duplicates, 1);

        let kept = cache.get_by_id(4).unwrap().unwrap();
        assert_eq!(kept.attributes.len(), 1);
    }

    #[test]
    fn test_duplicate_fail_is_error() {
        let config = ReaderConfig::default().with_duplicates(DuplicatePolicy::Fail);
        let mut cache = FeatureCache::new(polygons(&[2, 2]), &config);

        let err = cache.get_by_id(2).unwrap_err();
        assert!(matches!(err, SdtsError::DuplicateRecord { record: 2, .. }));
        assert!(!cache.is_indexed());
    }

    #[test]
    fn test_all_invalid_stream_indexes_once() {
        let config = ReaderConfig::default().with_max_record_id(10);
        let mut cache = FeatureCache::new(polygons(&[20, 30]), &config);

        assert!(cache.get_by_id(20).unwrap().is_none());
        assert!(cache.get_by_id(30).unwrap().is_none());
        assert!(cache.is_indexed());
        assert_eq!(cache.source().reads(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_index_returns_to_streaming() {
        let mut cache = FeatureCache::new(polygons(&[9, 2]), &ReaderConfig::default());
        cache.fill_index().unwrap();
        cache.clear_index().unwrap();

        assert!(!cache.is_indexed());
        assert_eq!(drain(&mut cache), vec![9, 2]);
    }

    #[test]
    fn test_get_by_id_mut_edits_cached_feature() {
        let mut cache = FeatureCache::new(polygons(&[1]), &ReaderConfig::default());
        cache
            .get_by_id_mut(1)
            .unwrap()
            .unwrap()
            .attributes
            .push(ModId::new("AHPR", 2));

        assert_eq!(cache.get_by_id(1).unwrap().unwrap().attributes.len(), 1);
    }

    #[test]
    fn test_scan_module_references() {
        let arcs = vec![
            ArcRecord::new(
                ModId::new("LE01", 1),
                vec![Point3::xy(0.0, 0.0)],
                ModId::new("NO01", 1),
                ModId::new("NO01", 2),
            )
            .with_polygons(ModId::new("PC02", 1), ModId::new("PC01", 1)),
            ArcRecord::new(
                ModId::new("LE01", 2),
                vec![Point3::xy(0.0, 0.0)],
                ModId::new("NO01", 2),
                ModId::new("NO01", 1),
            )
            .with_polygons(ModId::new("PC01", 1), ModId::unset()),
        ];
        let mut cache = FeatureCache::new(VecSource::new("LE01", arcs), &ReaderConfig::default());

        assert_eq!(
            cache.scan_module_references().unwrap(),
            vec!["PC01".to_string(), "PC02".to_string()]
        );
        // 走査後も先頭から読める
        assert_eq!(drain(&mut cache), vec![1, 2]);
    }
}
