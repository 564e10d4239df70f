pub mod error;
pub mod extractor;
pub mod io;
pub mod models;
pub mod stages;

pub use error::{ConsensusError, Result};
pub use extractor::{
    Extraction, Extractor, ExtractorConfig, IdentityCollision, MultiSourceExtractor, NameSet,
    SingleSourceExtractor,
};
pub use io::{export_csv, open_extractor, DiscoveryConfig, ExportSummary, ExtractionReport};
pub use models::{
    Annotation, AnnotationRun, Segment, SegmentId, TimeRange, WaveformRecord, WindowConfig,
};
pub use stages::{
    agreement_matrix, build_window_grid, execute_consensus, match_ranges, mean_matrix,
    AgreementMatrix, ConsensusResult,
};
