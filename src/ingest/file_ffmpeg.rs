//! FFmpeg-backed reader for video files and capture devices.
//!
//! Decoded frames are scaled to packed RGB24. At end of input the decoder is
//! drained before `EndOfStream` is reported, so trailing frames are not lost.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::camera::CameraConfig;
use super::{FrameReader, ReadOutcome};
use crate::frame::Frame;

pub(crate) struct FfmpegReader {
    location: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
    released: bool,
}

impl FfmpegReader {
    /// Open a local video file.
    pub(crate) fn open_file(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path))?;
        Self::from_input(path.to_string(), input)
    }

    /// Open a capture device through the platform's FFmpeg input format.
    pub(crate) fn open_device(device: &str, config: &CameraConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        ffmpeg::device::register_all();

        let format_name = platform_input_format();
        let format = ffmpeg::device::input::video()
            .find(|format| format.name() == format_name)
            .ok_or_else(|| anyhow!("ffmpeg input format {} is not available", format_name))?;

        let mut options = ffmpeg::Dictionary::new();
        options.set(
            "video_size",
            &format!("{}x{}", config.width, config.height),
        );
        if config.target_fps > 0 {
            options.set("framerate", &config.target_fps.to_string());
        }

        let context = ffmpeg::format::open_with(&device, &ffmpeg::Format::Input(format), options)
            .with_context(|| format!("open {} device '{}'", format_name, device))?;
        match context {
            ffmpeg::format::context::Context::Input(input) => {
                Self::from_input(format!("{} ({})", device, format_name), input)
            }
            ffmpeg::format::context::Context::Output(_) => {
                Err(anyhow!("ffmpeg opened '{}' as an output", device))
            }
        }
    }

    fn from_input(location: String, input: ffmpeg::format::context::Input) -> Result<Self> {
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", location))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "ffmpeg: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
            released: false,
        })
    }

    /// Pull one decoded frame, if the decoder has one ready.
    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        self.frame_count += 1;
        Ok(Some(Frame::new(pixels, width, height, self.frame_count)?))
    }
}

impl FrameReader for FfmpegReader {
    fn describe(&self) -> String {
        format!("{} (ffmpeg)", self.location)
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if self.released {
            return Ok(ReadOutcome::EndOfStream);
        }
        if let Some(frame) = self.receive()? {
            return Ok(ReadOutcome::Frame(frame));
        }

        while !self.eof_sent {
            let next = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == self.stream_index);
            match next {
                Some((_, packet)) => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
            if let Some(frame) = self.receive()? {
                return Ok(ReadOutcome::Frame(frame));
            }
        }
        Ok(ReadOutcome::EndOfStream)
    }

    fn release(&mut self) {
        self.released = true;
        log::debug!("ffmpeg: released {} after {} frames", self.location, self.frame_count);
    }
}

#[cfg(target_os = "macos")]
fn platform_input_format() -> &'static str {
    "avfoundation"
}

#[cfg(target_os = "windows")]
fn platform_input_format() -> &'static str {
    "dshow"
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_input_format() -> &'static str {
    "v4l2"
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
