// Downloader module - rendition resolution, transfers and progress

pub mod errors;
pub mod executor;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod notifier;
pub mod progress;
pub mod resolver;
pub mod source;
pub mod staging;
pub mod utils;

pub use errors::DownloadError;
pub use executor::{MediaStream, StagedTransfer, TransferExecutor, TransferOutcome};
pub use extractors::{ExtractorMode, MediaExtractor, YtDlpExtractor};
pub use models::{
    DeliveryMode, JobKey, ProgressSnapshot, RenditionCatalog, RenditionDescriptor,
    StagedArtifact, TransferRequest, TransferStatus,
};
pub use notifier::progress_updates;
pub use progress::ProgressTracker;
pub use resolver::RenditionResolver;
pub use source::SourceReference;
pub use staging::{StagedFile, StagingArea};
