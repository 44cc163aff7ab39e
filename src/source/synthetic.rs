//! Synthetic `stub://` stream used by tests, benchmarks, and demos.

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{BackendRead, StreamBackend};

pub(crate) struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Simulated scene state; changes occasionally so detectors see "motion".
    scene_state: u8,
    fail_reads: u32,
    max_frames: Option<u64>,
}

impl SyntheticSource {
    pub(crate) fn new(uri: String, width: u32, height: u32) -> Self {
        Self {
            uri,
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            fail_reads: 0,
            max_frames: None,
        }
    }

    /// Fail the next `count` reads to exercise the reconnect path.
    pub(crate) fn fail_reads(&mut self, count: u32) {
        self.fail_reads = count;
    }

    pub(crate) fn limit_frames(&mut self, max_frames: u64) {
        self.max_frames = Some(max_frames);
    }
}

impl StreamBackend for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::debug!("synthetic source connected: {}", self.uri);
        Ok(())
    }

    fn read(&mut self, mut buf: Vec<u8>) -> Result<BackendRead> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(anyhow!("simulated stream drop on {}", self.uri));
        }
        if let Some(max) = self.max_frames {
            if self.frame_count >= max {
                return Ok(BackendRead::EndOfStream);
            }
        }

        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.width * self.height * 3) as usize;
        let mut rng = rand::thread_rng();
        buf.clear();
        buf.reserve(pixel_count);
        for i in 0..pixel_count {
            // Mix position, frame count, and scene state for variation, with
            // low-amplitude noise so frames are never byte-identical.
            let base = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
            buf.push(base ^ (rng.gen::<u8>() & 0x07));
        }

        Ok(BackendRead::Pixels {
            data: buf,
            width: self.width,
            height: self.height,
        })
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}
