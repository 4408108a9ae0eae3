//! WebSocket transport: connection pump, retry timer and heartbeats.

pub mod ws;

pub use ws::{TransportEvent, TransportHandle, TransportSettings};

use tokio::time::Interval;

use crate::error::ClientResult;
use crate::stomp::Frame;

/// Anything outbound STOMP frames can be written to.
pub trait FrameSink {
    fn send_frame(&self, frame: Frame) -> ClientResult<()>;
}

/// Next tick of an optional interval; never resolves when there is none.
pub(crate) async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
