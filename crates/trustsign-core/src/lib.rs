pub mod artifact;
pub mod classify;
pub mod clock;
mod error;
pub mod progress;
pub mod settings;

pub use artifact::{Artifact, ArtifactStatus, SharedArtifact};
pub use classify::is_signable;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ErrorKind;
pub use progress::{
    NoopReporter, Progress, ProgressReporter, RequestSnapshot, RequestState, TracingReporter,
};
pub use settings::{Settings, SettingsOverrides, SettingsStore};
