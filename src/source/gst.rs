//! GStreamer backend for local V4L2 devices and RTSP network streams.
//!
//! Pipeline shape: `<src> ! decodebin ! videoconvert ! video/x-raw,RGB ! appsink`
//! with `max-buffers=1 drop=true` so a stalled consumer never accumulates
//! latency inside GStreamer; backpressure is handled by the scheduler's
//! queues instead.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::{BackendRead, CaptureSettings, SourceDescriptor, StreamBackend};

pub(crate) struct GstreamerSource {
    descriptor: SourceDescriptor,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    read_timeout: Duration,
}

impl GstreamerSource {
    pub(crate) fn new(descriptor: &SourceDescriptor, settings: &CaptureSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let src = match descriptor {
            SourceDescriptor::Local(index) => {
                format!("v4l2src device=/dev/video{index}")
            }
            SourceDescriptor::Network(uri) => format!("rtspsrc location={uri} latency=0"),
        };
        let description = format!(
            "{src} ! decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            settings.width, settings.height
        );
        let pipeline = gstreamer::parse_launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            descriptor: descriptor.clone(),
            pipeline,
            appsink,
            read_timeout: Duration::from_secs(2),
        })
    }

    fn drain_bus_errors(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("gstreamer reached EOS".to_string()),
                _ => {}
            }
        }
        None
    }
}

impl StreamBackend for GstreamerSource {
    fn connect(&mut self) -> Result<()> {
        // Re-entering Playing from any state restarts a dropped stream.
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("reset capture pipeline")?;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;
        log::info!("capture source connected: {}", self.descriptor.describe());
        Ok(())
    }

    fn read(&mut self, _buf: Vec<u8>) -> Result<BackendRead> {
        if let Some(err) = self.drain_bus_errors() {
            return Err(anyhow!(err));
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("stream stalled: {}", self.descriptor.describe()))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Ok(BackendRead::Pixels {
            data: pixels,
            width,
            height,
        })
    }

    fn describe(&self) -> String {
        self.descriptor.describe()
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row out of bounds")?);
    }
    Ok((pixels, width, height))
}
