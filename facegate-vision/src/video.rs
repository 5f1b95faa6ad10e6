use anyhow::{Context, Result};
use image::{ImageBuffer, RgbImage};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::source::FrameGrabber;

pub struct Camera {
    path: String,
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    /// Open a V4L2 device by path (e.g. `/dev/video0`).
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {device}"))?;
        Self::from_device(device.to_string(), dev)
    }

    fn from_device(path: String, dev: Device) -> Result<Self> {
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else keep whatever the driver picked
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        log::info!(
            "camera {} negotiated {}x{} {:?}",
            path,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            path,
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    /// Capture one frame, converted to RGB.
    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self
            .stream
            .next()
            .with_context(|| format!("capture frame from {}", self.path))?;
        log::trace!(
            "captured frame: fourcc={:?} seq={} len={}",
            self.fourcc,
            meta.sequence,
            data.len()
        );
        to_rgb(self.fourcc, self.width, self.height, data)
    }
}

impl FrameGrabber for Camera {
    fn grab(&mut self) -> Result<RgbImage> {
        self.frame()
    }
}

/// Convert a raw capture buffer into an RGB image.
pub fn to_rgb(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<RgbImage> {
    let buf = match &fourcc.repr {
        b"RGB3" => data.to_vec(),
        b"BGR3" => bgr_to_rgb(data),
        b"YUYV" => yuyv_to_rgb(width, height, data)?,
        b"GREY" => grey_to_rgb(width, height, data)?,
        b"MJPG" => {
            return Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
                .context("decode MJPG frame")?
                .to_rgb8())
        }
        other => anyhow::bail!("unsupported pixel format {:?}", FourCC::new(other)),
    };
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!("buffer too small: got {}, expected {}", buf.len(), expected);
    }
    let mut buf = buf;
    buf.truncate(expected);
    ImageBuffer::from_raw(width, height, buf)
        .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
}

fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;
        for y in [y0, y1] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
