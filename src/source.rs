use crate::error::Result;
use crate::model::{ArcRecord, ModId, PolygonFeature};

/// レコードIDを持つフィーチャー
pub trait Feature {
    fn mod_id(&self) -> &ModId;

    /// 他モジュールへの位相参照（設定済みのもののみ）
    fn references(&self) -> Vec<&ModId> {
        Vec::new()
    }
}

impl Feature for ArcRecord {
    fn mod_id(&self) -> &ModId {
        &self.id
    }

    fn references(&self) -> Vec<&ModId> {
        [&self.left_polygon, &self.right_polygon]
            .into_iter()
            .filter(|id| id.is_set())
            .collect()
    }
}

impl Feature for PolygonFeature {
    fn mod_id(&self) -> &ModId {
        &self.id
    }

    fn references(&self) -> Vec<&ModId> {
        self.attributes.iter().filter(|id| id.is_set()).collect()
    }
}

/// 前方向にしか読めないレコード列。巻き戻しだけはできる。
pub trait RecordSource {
    type Record: Feature + Clone;

    /// モジュール名
    fn module(&self) -> &str;

    fn read_next(&mut self) -> Result<Option<Self::Record>>;

    fn rewind(&mut self) -> Result<()>;
}

/// メモリ上のレコード列。テストや他形式からの変換で使う。
#[derive(Debug, Clone)]
pub struct VecSource<R> {
    module: String,
    records: Vec<R>,
    cursor: usize,
    reads: usize,
}

impl<R> VecSource<R> {
    pub fn new(module: impl Into<String>, records: Vec<R>) -> Self {
        Self {
            module: module.into(),
            records,
            cursor: 0,
            reads: 0,
        }
    }

    /// `read_next` でレコードを返した回数
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl<R: Feature + Clone> RecordSource for VecSource<R> {
    type Record = R;

    fn module(&self) -> &str {
        &self.module
    }

    fn read_next(&mut self) -> Result<Option<R>> {
        let record = self.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
            self.reads += 1;
        }
        Ok(record)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}
