pub mod correlator;
pub mod ingestor;

pub use correlator::Correlator;
pub use ingestor::{IngestStatus, Ingestor};
