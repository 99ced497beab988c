//! V4L2 capture reader.
//!
//! Opens a local device node (e.g., /dev/video0) through libv4l, negotiates RGB
//! where the driver allows it, and normalizes YUYV / NV12 buffers otherwise.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::camera::CameraConfig;
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameReader, ReadOutcome};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

pub(crate) struct V4l2Reader {
    device: String,
    state: Option<V4l2State>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Reader {
    pub(crate) fn open(path: &str, config: &CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = config.width;
        requested.height = config.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let negotiated = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to set RGB3 on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported pixel format {}",
                path,
                negotiated.fourcc
            )
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::debug!(
            "v4l2: {} negotiated {}x{} {:?}",
            path,
            negotiated.width,
            negotiated.height,
            format
        );
        Ok(Self {
            device: path.to_string(),
            state: Some(state),
            format,
            width: negotiated.width,
            height: negotiated.height,
            frame_count: 0,
        })
    }
}

impl FrameReader for V4l2Reader {
    fn describe(&self) -> String {
        format!("{} (v4l2)", self.device)
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let (width, height, format) = (self.width, self.height, self.format);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;

        self.frame_count += 1;
        Ok(ReadOutcome::Frame(Frame::new(
            pixels,
            width,
            height,
            self.frame_count,
        )?))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("v4l2: released {}", self.device);
        }
    }
}
