//! Capture-to-assembly message channel.
//!
//! One producer, one consumer, FIFO. The producer side enforces the message
//! protocol: exactly one `StreamInfo`, then any number of `Detection`s, then
//! exactly one `End`. Sending never blocks; instead of dropping frames when the
//! consumer falls behind, the sender refuses with `ChannelError::Backlog` once
//! the configured number of messages is outstanding.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::detect::Region;
use crate::frame::{Frame, FrameSize};

/// Default cap on unreceived messages (about 30 s of frames at 10 fps).
pub const DEFAULT_MAX_OUTSTANDING: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamInfo {
    pub processing_size: FrameSize,
    pub fps: f64,
}

/// A processed frame and the regions that passed filtering.
#[derive(Debug)]
pub struct DetectedFrame {
    pub frame: Frame,
    pub regions: Vec<Region>,
}

#[derive(Debug)]
pub enum ChannelMessage {
    StreamInfo(StreamInfo),
    Detection(DetectedFrame),
    End,
}

impl ChannelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamInfo(_) => "stream_info",
            Self::Detection(_) => "detection",
            Self::End => "end",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("no message received within the receive timeout")]
    Timeout,
    #[error("channel peer has gone away")]
    Disconnected,
    #[error("consumer backlog of {outstanding} messages reached limit {limit}")]
    Backlog { outstanding: usize, limit: usize },
    #[error("channel protocol violation: {0}")]
    Protocol(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SenderState {
    AwaitingStreamInfo,
    Streaming,
}

/// Producer half.
pub struct FrameSender {
    tx: Sender<ChannelMessage>,
    max_outstanding: usize,
    state: SenderState,
    sent: u64,
}

/// Consumer half.
pub struct FrameReceiver {
    rx: Receiver<ChannelMessage>,
}

/// Create a connected pair. `max_outstanding` is clamped to at least 1.
pub fn channel(max_outstanding: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = unbounded();
    (
        FrameSender {
            tx,
            max_outstanding: max_outstanding.max(1),
            state: SenderState::AwaitingStreamInfo,
            sent: 0,
        },
        FrameReceiver { rx },
    )
}

impl FrameSender {
    /// Announce the stream. Must be the first message.
    pub fn stream_info(&mut self, info: StreamInfo) -> Result<(), ChannelError> {
        if self.state != SenderState::AwaitingStreamInfo {
            return Err(ChannelError::Protocol("stream info already sent"));
        }
        self.push(ChannelMessage::StreamInfo(info))?;
        self.state = SenderState::Streaming;
        Ok(())
    }

    /// Forward one processed frame.
    pub fn detection(&mut self, frame: Frame, regions: Vec<Region>) -> Result<(), ChannelError> {
        if self.state != SenderState::Streaming {
            return Err(ChannelError::Protocol("detection sent before stream info"));
        }
        let outstanding = self.tx.len();
        if outstanding >= self.max_outstanding {
            return Err(ChannelError::Backlog {
                outstanding,
                limit: self.max_outstanding,
            });
        }
        self.push(ChannelMessage::Detection(DetectedFrame { frame, regions }))
    }

    /// Terminate the stream. Bypasses the backlog cap so the consumer always
    /// learns the stream is over.
    pub fn end(self) -> Result<(), ChannelError> {
        self.tx
            .send(ChannelMessage::End)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Messages pushed so far, excluding `End`.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages the consumer has not received yet.
    pub fn outstanding(&self) -> usize {
        self.tx.len()
    }

    fn push(&mut self, message: ChannelMessage) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::Disconnected)?;
        self.sent += 1;
        Ok(())
    }
}

impl FrameReceiver {
    /// Wait up to `timeout` for the next message.
    pub fn receive(&self, timeout: Duration) -> Result<ChannelMessage, ChannelError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ChannelError::Timeout,
            RecvTimeoutError::Disconnected => ChannelError::Disconnected,
        })
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
