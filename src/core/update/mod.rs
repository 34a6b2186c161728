mod manager;
mod platform_installer;
mod release_info;
mod retry;
mod state;
mod version;

pub use manager::{
    UpdateManager, UpdateOutcome, UpdatePolicy, UpdateRequest, DEFAULT_GRACE_CYCLES, DEFAULT_GRACE_WINDOW,
    DEFAULT_ROLLBACK_FLOOR,
};
pub use platform_installer::{FileStager, Stager};
pub use release_info::{
    platform_artifact_name, GitHubReleaseSource, HttpManifestSource, ReleaseAsset, ReleaseInfo,
    ReleaseSource, UpdateManifest,
};
pub use retry::{with_retry, RetryPolicy};
pub use state::{PhaseTransition, UpdatePhase, UpdateState};
pub use version::Version;
