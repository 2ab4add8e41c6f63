// =============================================================================
// Monitoring Engine
// =============================================================================
//
// One `MonitorSession` per user, each on its own task, all owned by the
// `MonitorSupervisor`.  Sessions read market data through
// `ExchangeDataSource` and deliver alerts through `NotificationSink`.
// =============================================================================

pub mod alert_policy;
pub mod oi_history;
pub mod session;
pub mod source;
pub mod supervisor;

#[cfg(test)]
pub mod testing;

pub use session::MonitorSession;
pub use source::ExchangeDataSource;
pub use supervisor::{MonitorSupervisor, SessionInfo, SupervisorError};
