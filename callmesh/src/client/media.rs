use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use webrtc::{
    api::media_engine::MIME_TYPE_OPUS,
    media::Sample,
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::track_local_static_sample::TrackLocalStaticSample,
};

/// Captured local audio shared by every negotiated connection
#[derive(Clone)]
pub struct LocalMedia {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalMedia {
    /// Wrap an existing local track
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create an Opus microphone track
    pub fn opus(stream_id: &str) -> Self {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "microphone".to_owned(),
            stream_id.to_owned(),
        );
        Self::new(Arc::new(track))
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Push a captured sample to every connected peer.
    /// Returns `false` when the microphone is switched off and nothing was sent.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.track.write_sample(sample).await?;
        Ok(true)
    }
}

/// The local microphone
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open the device. Failing here aborts the session start.
    async fn acquire(&self) -> Result<LocalMedia>;

    /// Stop capturing and give the device back
    async fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn disabled_microphone_sends_nothing() {
        let media = LocalMedia::opus("local");
        let sample = Sample {
            data: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
            duration: Duration::from_millis(20),
            ..Default::default()
        };

        assert!(media.write_sample(&sample).await.unwrap());

        media.set_enabled(false);
        assert!(!media.write_sample(&sample).await.unwrap());

        let clone = media.clone();
        clone.set_enabled(true);
        assert!(media.is_enabled());
    }
}
