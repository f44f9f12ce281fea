// SPDX-License-Identifier: GPL-3.0-only

//! Client notification channel
//!
//! Every pipeline registers a [`PipelineCallback`]; each resolved buffer keeps a
//! reference to it so errors and results can be reported for the buffer's frame.

use super::types::{NotifyMessage, PipelineResult};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Receiver of asynchronous notifications for one pipeline
pub trait PipelineCallback: Send + Sync {
    /// Deliver a shutter or error message
    fn notify(&self, pipeline_id: u32, message: NotifyMessage);

    /// Deliver a completed result; ignored by default
    fn process_result(&self, result: PipelineResult) {
        debug!(
            frame_number = result.frame_number,
            pipeline_id = result.pipeline_id,
            "Dropping result, callback does not consume results"
        );
    }
}

/// Event forwarded by [`ChannelCallback`]
#[derive(Debug)]
pub enum PipelineEvent {
    Notify {
        pipeline_id: u32,
        message: NotifyMessage,
    },
    Result(PipelineResult),
}

/// Callback that forwards every event into an mpsc channel
#[derive(Debug)]
pub struct ChannelCallback {
    sender: Mutex<mpsc::Sender<PipelineEvent>>,
}

impl ChannelCallback {
    /// Create a callback and the receiving end of its channel
    pub fn new() -> (Arc<Self>, mpsc::Receiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Arc::new(Self {
                sender: Mutex::new(sender),
            }),
            receiver,
        )
    }

    fn send(&self, event: PipelineEvent) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if sender.send(event).is_err() {
            debug!("Pipeline event receiver dropped");
        }
    }
}

impl PipelineCallback for ChannelCallback {
    fn notify(&self, pipeline_id: u32, message: NotifyMessage) {
        self.send(PipelineEvent::Notify {
            pipeline_id,
            message,
        });
    }

    fn process_result(&self, result: PipelineResult) {
        self.send(PipelineEvent::Result(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::emulated::types::ErrorCode;

    #[test]
    fn test_channel_callback_forwards_notifications() {
        let (callback, receiver) = ChannelCallback::new();
        callback.notify(3, NotifyMessage::error(42, ErrorCode::Result));

        match receiver.try_recv().unwrap() {
            PipelineEvent::Notify {
                pipeline_id,
                message,
            } => {
                assert_eq!(pipeline_id, 3);
                assert_eq!(message, NotifyMessage::error(42, ErrorCode::Result));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_send_after_receiver_drop_is_ignored() {
        let (callback, receiver) = ChannelCallback::new();
        drop(receiver);
        callback.notify(0, NotifyMessage::error(1, ErrorCode::Request));
    }
}
