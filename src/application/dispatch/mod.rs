//! Purge and ban dispatchers with uniform result reporting.

mod ban;
mod error;
mod purge;
mod result;

pub use ban::{
    AdminError, AdminSession, AdminTransport, BAN_PREFIX, BanDispatcher, BanListEntry, BanReply,
    HostBanList, build_ban_expression, escape_for_admin, read_ban_lists,
};
pub use error::DispatchError;
pub use purge::{PurgeDispatcher, PurgeResponse, PurgeTransport, PurgeTransportError};
pub use result::DispatchResult;

pub const METRIC_PURGE_TOTAL: &str = "sluice_purge_total";
pub const METRIC_BAN_TOTAL: &str = "sluice_ban_total";
pub const METRIC_DISPATCH_MS: &str = "sluice_dispatch_ms";
