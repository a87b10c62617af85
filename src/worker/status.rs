use std::fmt::Debug;
use std::future::Future;
use tracing::{error, info};

use super::{Result, WorkerError};
use crate::build_crd::{Build, BuildConditionType, BuildStatus};
use crate::cluster::{notify, update_status, Cluster, EventKind};
use crate::conditions::ConditionStatus;
use crate::NamespacedName;

async fn fetch(cluster: &dyn Cluster, key: &NamespacedName) -> Result<Build> {
    cluster
        .get_build(key)
        .await?
        .ok_or_else(|| WorkerError::BuildNotFound(key.to_string()))
}

/// Runs `task` under the `type_` condition of the Build at `key`.
///
/// The condition moves to `InProgress` before the task starts, then to
/// `Success` or `Error` with the task's outcome. `record` adds the task's
/// result to the status written with `Success`. A failure is reported on the
/// Build and handed back as is.
pub async fn monitor_condition<T, Fut, F>(
    cluster: &dyn Cluster,
    key: &NamespacedName,
    type_: BuildConditionType,
    task: Fut,
    record: F,
) -> Result<T>
where
    T: Debug + Send + Sync,
    Fut: Future<Output = Result<T>>,
    F: Fn(&T, &mut BuildStatus) + Send + Sync,
{
    let build = fetch(cluster, key).await?;
    if build.status().conditions.get_condition(type_).status != ConditionStatus::InProgress {
        update_status(cluster, &build, |status: &mut BuildStatus| {
            status.conditions.set(type_, ConditionStatus::InProgress);
            status.refresh_phase();
        })
        .await?;
    }
    info!(build = %key, stage = ?type_, "stage started");

    match task.await {
        Ok(value) => {
            let build = fetch(cluster, key).await?;
            update_status(cluster, &build, |status: &mut BuildStatus| {
                record(&value, status);
                status.conditions.set(type_, ConditionStatus::Success);
                status.refresh_phase();
            })
            .await?;
            info!(build = %key, stage = ?type_, "stage completed");
            Ok(value)
        }
        Err(e) => {
            error!(build = %key, stage = ?type_, error = %e, "stage failed");
            report_failure(cluster, key, type_, &e).await;
            Err(e)
        }
    }
}

/// Best effort: the worker exits with the stage's error either way.
async fn report_failure(
    cluster: &dyn Cluster,
    key: &NamespacedName,
    type_: BuildConditionType,
    failure: &WorkerError,
) {
    let build = match fetch(cluster, key).await {
        Ok(build) => build,
        Err(e) => {
            error!(build = %key, error = %e, "could not read the build to report the failure");
            return;
        }
    };
    let written = update_status(cluster, &build, |status: &mut BuildStatus| {
        status.conditions.set(type_, ConditionStatus::Error);
        status.refresh_phase();
    })
    .await;
    if let Err(e) = written {
        error!(build = %key, error = %e, "could not record the failure");
    }
    notify(
        cluster,
        &build,
        EventKind::Warning,
        &format!("{type_:?}"),
        &failure.to_string(),
    )
    .await;
}
