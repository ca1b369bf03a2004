use apalis::prelude::{Data, Error as ApalisError};
use tracing::info;

use super::context::JobWorkerContext;
use super::payload::{BanJobPayload, PurgeJobPayload};

/// Process one purge batch. Per-target failures are logged and never fail the job.
pub async fn process_purge_job(
    payload: PurgeJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    info!(
        target = "application::jobs::process_purge_job",
        description = payload.description.as_deref().unwrap_or("purge"),
        targets = payload.uris.len(),
        "starting purge job"
    );

    context.purge_batch(&payload.uris, payload.debug).await;
    Ok(())
}

pub async fn process_ban_job(
    payload: BanJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    info!(
        target = "application::jobs::process_ban_job",
        description = payload.description.as_deref().unwrap_or("ban"),
        bans = payload.bans.len(),
        "starting ban job"
    );

    context.ban_batch(&payload.bans, payload.debug).await;
    Ok(())
}
