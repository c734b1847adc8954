//! Network wire formats. The Neuralynx UDP record layout is modeled here;
//! the actual socket I/O lives in `processors::reader`. `control` carries
//! the graph manager's request/reply framing.

pub mod control;
pub mod udp;

pub use udp::NlxRecord;
