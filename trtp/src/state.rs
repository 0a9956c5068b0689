//! Sender lifecycle states.
//!
//! The sender walks a short, one-directional path:
//!
//! ```text
//!  IDLE ──first chunk──▶ SENDING ◀──ack frees room──▶ AWAITING_ACK
//!                           │                              │
//!                           └────── input exhausted ───────┘
//!                                          │
//!                                          ▼
//!                                      DRAINING  (terminal)
//! ```
//!
//! `Draining` is entered once the input reports end-of-stream; the transfer
//! is complete when the window is empty in that state.

/// All possible states of the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing has been sent yet.
    #[default]
    Idle,
    /// The window has room; input is being read and sent.
    Sending,
    /// The window is full; only acknowledgements and timeouts make progress.
    AwaitingAck,
    /// Input is exhausted; waiting for the last acknowledgements.
    Draining,
}

impl SenderState {
    /// State after a poll of the window, given whether input has ended.
    pub fn after(self, input_done: bool, window_has_room: bool) -> Self {
        match (self, input_done, window_has_room) {
            (Self::Draining, _, _) | (_, true, _) => Self::Draining,
            (_, false, true) => Self::Sending,
            (_, false, false) => Self::AwaitingAck,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Draining
    }

    /// `true` while new input may still be read.
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Idle | Self::Sending)
    }
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Sending => "SENDING",
            Self::AwaitingAck => "AWAITING_ACK",
            Self::Draining => "DRAINING",
        };
        f.write_str(name)
    }
}
