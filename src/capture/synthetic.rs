//! Synthetic frame grabber for `stub://` devices.
//!
//! Lets the daemon and tests run with no camera hardware attached. The
//! generated scene is a moving gradient: mostly static background with an
//! occasional state change so downstream stages see some variation.

use anyhow::Result;

use super::FrameGrabber;
use crate::frame::Frame;

pub struct SyntheticGrabber {
    device: String,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    connected: bool,
}

impl SyntheticGrabber {
    pub fn new(device: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            connected: false,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height) as usize;

        // Change scene state occasionally to simulate movement.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn open(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<Frame> {
        debug_assert!(self.connected, "grab before open");
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let timestamp = crate::now_secs()?;
        Ok(Frame::new(pixels, self.width, self.height, timestamp))
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_grabber_produces_frames() -> Result<()> {
        let mut grabber = SyntheticGrabber::new("stub://cam0", 64, 48);
        grabber.open()?;

        let frame = grabber.grab()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels.len(), 64 * 48);

        let next = grabber.grab()?;
        assert!(next.timestamp >= frame.timestamp);
        Ok(())
    }
}
