use thiserror::Error;

use crate::model::ModId;

/// SDTSトランスファー読み込みとリング構築のエラー
#[derive(Debug, Error)]
pub enum SdtsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("module not found in transfer: {0}")]
    UnknownModule(String),

    #[error("duplicate record {record} in module {module}")]
    DuplicateRecord { module: String, record: i32 },

    #[error("polygon {0} is sealed, edges can no longer be attached")]
    PolygonSealed(ModId),

    #[error("polygon {0} must be sealed before ring assembly")]
    EdgesNotSealed(ModId),
}

pub type Result<T> = std::result::Result<T, SdtsError>;
