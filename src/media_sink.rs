// Bounded media queues bridging the session's producer side to a pull-based
// consumer, with drop-oldest backpressure instead of blocking the read loop.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::{Result, RtmpError};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub data: Vec<u8>,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSample {
    pub data: Vec<u8>,
    pub presentation_timestamp: u32,
    pub decode_timestamp: u32,
    pub is_keyframe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Audio(AudioSample),
    Video(VideoSample),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Audio,
    Video,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded single-producer/single-consumer queue for one media kind.
///
/// Video drops the oldest non-keyframe sample when full, to keep a decodable
/// keyframe around as long as possible; audio simply drops the oldest sample,
/// since there is no equivalent "anchor" frame to protect.
pub struct MediaQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> MediaQueue<T> {
    pub fn new(capacity: usize) -> MediaQueue<T> {
        MediaQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        guard.closed = true;
        drop(guard);
        self.notify.notify_waiters();
    }

    pub async fn pull(&self) -> Result<T> {
        loop {
            let mut guard = self.state.lock().await;
            if let Some(item) = guard.items.pop_front() {
                return Ok(item);
            }
            if guard.closed {
                return Err(RtmpError::EndOfStream);
            }
            drop(guard);
            self.notify.notified().await;
        }
    }
}

impl MediaQueue<AudioSample> {
    pub async fn push(&self, sample: AudioSample) {
        let mut guard = self.state.lock().await;
        if guard.items.len() >= self.capacity {
            guard.items.pop_front();
        }
        guard.items.push_back(sample);
        drop(guard);
        self.notify.notify_one();
    }
}

impl MediaQueue<VideoSample> {
    pub async fn push(&self, sample: VideoSample) {
        let mut guard = self.state.lock().await;
        if guard.items.len() >= self.capacity {
            if let Some(pos) = guard.items.iter().position(|s| !s.is_keyframe) {
                guard.items.remove(pos);
            } else {
                guard.items.pop_front();
            }
        }
        guard.items.push_back(sample);
        drop(guard);
        self.notify.notify_one();
    }
}

/// Owns the audio/video queues for one `NetStream` and exposes the pull
/// contract a host media framework drives.
pub struct MediaSink {
    audio: Arc<MediaQueue<AudioSample>>,
    video: Arc<MediaQueue<VideoSample>>,
}

impl MediaSink {
    pub fn new(capacity: usize) -> MediaSink {
        MediaSink {
            audio: Arc::new(MediaQueue::new(capacity)),
            video: Arc::new(MediaQueue::new(capacity)),
        }
    }

    pub fn audio_queue(&self) -> Arc<MediaQueue<AudioSample>> {
        self.audio.clone()
    }

    pub fn video_queue(&self) -> Arc<MediaQueue<VideoSample>> {
        self.video.clone()
    }

    pub async fn push_audio(&self, sample: AudioSample) {
        self.audio.push(sample).await;
    }

    pub async fn push_video(&self, sample: VideoSample) {
        self.video.push(sample).await;
    }

    pub async fn close(&self) {
        self.audio.close().await;
        self.video.close().await;
    }

    /// Blocks until a sample of `kind` is available, the sink closes, or an
    /// error occurs.
    pub async fn request_sample(&self, kind: SampleKind) -> Result<Sample> {
        match kind {
            SampleKind::Audio => self.audio.pull().await.map(Sample::Audio),
            SampleKind::Video => self.video.pull().await.map(Sample::Video),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pulls_items_in_fifo_order() {
        let sink = MediaSink::new(4);
        sink.push_audio(AudioSample {
            data: vec![1],
            timestamp: 10,
        })
        .await;
        sink.push_audio(AudioSample {
            data: vec![2],
            timestamp: 20,
        })
        .await;

        let first = sink.request_sample(SampleKind::Audio).await.unwrap();
        match first {
            Sample::Audio(a) => assert_eq!(a.timestamp, 10),
            _ => panic!("expected audio sample"),
        }
    }

    #[tokio::test]
    async fn closing_fails_pending_and_future_pulls() {
        let sink = MediaSink::new(4);
        sink.close().await;
        let result = sink.request_sample(SampleKind::Video).await;
        assert!(matches!(result, Err(RtmpError::EndOfStream)));
    }

    #[tokio::test]
    async fn video_queue_drops_oldest_non_keyframe_when_full() {
        let queue: MediaQueue<VideoSample> = MediaQueue::new(2);
        queue
            .push(VideoSample {
                data: vec![0],
                presentation_timestamp: 0,
                decode_timestamp: 0,
                is_keyframe: true,
            })
            .await;
        queue
            .push(VideoSample {
                data: vec![1],
                presentation_timestamp: 10,
                decode_timestamp: 10,
                is_keyframe: false,
            })
            .await;
        queue
            .push(VideoSample {
                data: vec![2],
                presentation_timestamp: 20,
                decode_timestamp: 20,
                is_keyframe: false,
            })
            .await;

        let first = queue.pull().await.unwrap();
        assert!(first.is_keyframe);
        let second = queue.pull().await.unwrap();
        assert_eq!(second.presentation_timestamp, 20);
    }
}
