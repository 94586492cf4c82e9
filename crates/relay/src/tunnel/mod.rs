pub mod framing;

mod correlator;
mod reader;

pub use correlator::RemoteResolver;

pub(crate) use correlator::{run_correlator, PendingRequest};
pub(crate) use reader::run_reader;
