pub mod capability;
pub mod config;
pub mod error;
pub mod exec;
pub mod http;
pub mod probe;
pub mod stream;

pub use capability::{CapabilityDetector, EncoderCapabilities, HardwareCapability};
pub use config::{
    load_stream_config, BinariesSection, SessionSection, StorageSection, StreamConfig,
    TranscodeSection,
};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use probe::{MediaProbe, MediaProber, ProbeError};
pub use stream::{
    ContainerFormat, HandleStatus, ProcessManager, QualityPolicy, QualityVariant,
    SessionCoordinator, SessionSummary, SourceResolver, StreamError, StreamSession,
    StreamingOptions, TranscodeDecision, TranscodeHandle, TranscodeJob, TranscodeMode,
    TranscodeRequest,
};
