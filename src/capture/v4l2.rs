#![cfg(feature = "ingest-v4l2")]

//! V4L2 frame grabber for local camera devices.
//!
//! Captures RGB frames via libv4l and converts them to grayscale at
//! acquisition time. `open()` reapplies format and frame-rate settings on
//! every call: USB cameras commonly reset their configuration when the
//! device node is reopened.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::FrameGrabber;
use crate::frame::Frame;

pub struct V4l2Grabber {
    device: String,
    width: u32,
    height: u32,
    target_fps: u32,
    active_width: u32,
    active_height: u32,
    state: Option<DeviceState>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Grabber {
    pub fn new(device: impl Into<String>, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            target_fps,
            active_width: width,
            active_height: height,
            state: None,
        }
    }
}

impl FrameGrabber for V4l2Grabber {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.state = None;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set format on {}: {}", self.device, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.device, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        Ok(())
    }

    fn grab(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        let pixels = rgb_to_gray(buf, self.active_width, self.active_height)?;
        let timestamp = crate::now_secs()?;
        Ok(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            timestamp,
        ))
    }

    fn close(&mut self) {
        self.state = None;
    }
}

fn rgb_to_gray(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = (width as usize) * (height as usize) * 3;
    if rgb.len() < expected {
        anyhow::bail!("expected {} RGB bytes, received {}", expected, rgb.len());
    }
    let mut gray = Vec::with_capacity((width as usize) * (height as usize));
    for px in rgb[..expected].chunks_exact(3) {
        // ITU-R BT.601 luma weights, integer form.
        let luma = (299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32) / 1000;
        gray.push(luma as u8);
    }
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_to_gray_weights() {
        // Pure white and pure black survive conversion exactly.
        let gray = rgb_to_gray(&[255, 255, 255, 0, 0, 0], 2, 1).unwrap();
        assert_eq!(gray, vec![255, 0]);
    }

    #[test]
    fn rgb_to_gray_rejects_short_buffer() {
        assert!(rgb_to_gray(&[1, 2], 2, 1).is_err());
    }
}
