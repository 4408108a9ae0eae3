//! STOMP wire protocol: frame codec and the client frames this crate sends.

pub mod frame;

pub use frame::{negotiate_heartbeat, parse_heartbeat, Command, Decoded, Frame, FrameError};

/// Build the CONNECT frame.
pub fn connect_frame(host: &str, heartbeat_ms: u64, token: Option<&str>) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", host)
        .header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"));
    if let Some(token) = token {
        frame = frame.header("Authorization", format!("Bearer {token}"));
    }
    frame
}

pub fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("id", id)
        .header("destination", destination)
        .header("ack", "auto")
}

pub fn unsubscribe_frame(id: &str) -> Frame {
    Frame::new(Command::Unsubscribe).header("id", id)
}

pub fn send_frame(destination: &str, json_body: String) -> Frame {
    Frame::new(Command::Send)
        .header("destination", destination)
        .header("content-type", "application/json")
        .header("content-length", json_body.len().to_string())
        .body(json_body)
}

pub fn disconnect_frame() -> Frame {
    Frame::new(Command::Disconnect)
}
