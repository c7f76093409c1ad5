//! Background runtime: source watcher, deploy queue and control socket.

mod error;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod watch;

pub use error::DaemonError;
pub use logging::init_tracing;
pub use protocol::{
    request_deploy, request_rollback, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, JobAction, JobSummary};
