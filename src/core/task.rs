// Remote task tracking for hotplug-passthru
//
// Reconfigure calls return immediately with a task reference; the tool then
// polls the task until it leaves the queued/running states.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::vsphere::types::{ManagedObjectReference, TaskInfo, TaskState};
use crate::vsphere::ManagementApi;

/// Poll interval used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Blocks until `task` succeeds or fails
///
/// There is no timeout: a task the endpoint never completes keeps the
/// caller waiting.
pub fn wait_for_task<A: ManagementApi + ?Sized>(
    api: &A,
    task: &ManagedObjectReference,
    poll_interval: Duration,
) -> Result<TaskInfo> {
    let mut last_state = None;

    loop {
        let info = api.task_info(task)?;
        if last_state != Some(info.state) {
            debug!("Task {} is {:?}", task.value, info.state);
            last_state = Some(info.state);
        }

        match info.state {
            TaskState::Success => {
                if let Some(elapsed) = info.duration() {
                    info!("Task {} completed in {} ms", task.value, elapsed.num_milliseconds());
                }
                return Ok(info);
            }
            TaskState::Error => {
                let message = info
                    .error
                    .as_ref()
                    .map(|e| e.message())
                    .unwrap_or_else(|| "no fault reported".to_string());
                return Err(Error::TaskFailed {
                    task: task.value.clone(),
                    message,
                });
            }
            TaskState::Queued | TaskState::Running => thread::sleep(poll_interval),
        }
    }
}
