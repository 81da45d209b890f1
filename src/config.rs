/// 同一レコードIDが2回現れたときの扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// 後から来たレコードを捨てて警告する
    #[default]
    Skip,
    /// 破損データとしてエラーを返す
    Fail,
}

/// リーダー設定。グローバルではなく参照で各リーダーへ渡す。
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// これ以上のレコードIDは不正として読み捨てる
    pub max_record_id: i32,
    pub duplicates: DuplicatePolicy,
}

impl ReaderConfig {
    pub const DEFAULT_MAX_RECORD_ID: i32 = 1_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_record_id(mut self, max_record_id: i32) -> Self {
        self.max_record_id = max_record_id;
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_record_id: Self::DEFAULT_MAX_RECORD_ID,
            duplicates: DuplicatePolicy::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();
        assert_eq!(config.max_record_id, 1_000_000);
        assert_eq!(config.duplicates, DuplicatePolicy::Skip);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ReaderConfig::new()
            .with_max_record_id(10)
            .with_duplicates(DuplicatePolicy::Fail);
        assert_eq!(config.max_record_id, 10);
        assert_eq!(config.duplicates, DuplicatePolicy::Fail);
    }
}
