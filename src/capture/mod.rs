//! 截图采集 - 外部截图触发与本地截图定位

pub mod locator;
pub mod task;

pub use locator::{glob_matcher, remove_artifact, ArtifactLocator};
pub use task::{CaptureTrigger, ScheduledTaskTrigger};
