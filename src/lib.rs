pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod polygon;
pub mod rings;
pub mod source;
pub mod zip_handler;

pub use cache::{FeatureCache, IndexReport};
pub use config::{DuplicatePolicy, ReaderConfig};
pub use error::{Result, SdtsError};
pub use model::{ArcRecord, EdgePhase, ModId, Point3, PolygonFeature, Ring};
pub use parser::{LayerType, Transfer};
pub use polygon::{attach_arcs_to_polygons, AssemblyReport, LineReader, PolygonReader};
pub use rings::{assemble_rings, RingAssembly};
pub use zip_handler::ZipHandler;
