mod context;
mod payload;
mod process;
mod queue;

pub use context::JobWorkerContext;
pub use payload::{BanJobPayload, JobKind, PurgeJobPayload};
pub use process::{process_ban_job, process_purge_job};
pub use queue::{InlineJobQueue, JobQueue};
