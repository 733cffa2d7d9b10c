pub mod cache;
pub mod commit;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod power;
pub mod remote;
pub mod routes;
pub mod state;
pub mod store;
pub mod timelapse;
pub mod types;

pub use cache::{ArtifactCache, FrameCache, FrameKey};
pub use daemon::{DaemonControl, MockDaemon, ShellDaemon};
pub use dispatch::{dispatch, merged_camera_list, CameraOps};
pub use error::OpError;
pub use media::{MediaStore, MemoryMediaStore};
pub use power::{MockMounts, MockPower, MountManager, PowerControl, ShellPower};
pub use remote::RemotePeerClient;
pub use routes::build_router;
pub use state::{AppState, IdLocks, Settings};
pub use store::{ConfigStore, MemoryConfigStore};
pub use timelapse::TimelapseTracker;
pub use types::*;
