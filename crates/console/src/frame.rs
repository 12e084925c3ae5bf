//! Outbound console framing
//!
//! The console protocol frames only what the client sends:
//!
//! - data:   `0:<byte length>:<payload>`
//! - resize: `1:<cols>:<rows>:`
//!
//! Server output arrives unframed and is passed through untouched.

/// A message sent to the remote terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Keystrokes or pasted input
    Data(Vec<u8>),
    /// New terminal dimensions
    Resize { cols: u16, rows: u16 },
}

impl OutboundFrame {
    /// Encode to wire bytes. The data length counts bytes, not characters.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            OutboundFrame::Data(payload) => {
                let header = format!("0:{}:", payload.len());
                let mut out = Vec::with_capacity(header.len() + payload.len());
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(payload);
                out
            }
            OutboundFrame::Resize { cols, rows } => format!("1:{}:{}:", cols, rows).into_bytes(),
        }
    }
}
