//! Video4Linux capture backend.
//!
//! Negotiation goes through the `v4l` crate. Streaming uses memory-mapped
//! driver buffers managed by hand so that each buffer slot can be held by a
//! [`Frame`](crate::Frame) and re-queued only once it has been released.

use std::io;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::time::Duration;
use std::{mem, ptr, slice};

use log::{debug, warn};
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::device::{
    CaptureDevice, DeviceBackend, FormatDescription, FrameSizeRange, NegotiatedFormat, RawBuffer,
};
use crate::PixelFormat;

pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Opens `/dev/video*` nodes.
#[derive(Debug, Clone, Copy)]
pub struct V4l2Backend {
    buffer_count: u32,
}

impl V4l2Backend {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(1),
        }
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_COUNT)
    }
}

impl DeviceBackend for V4l2Backend {
    type Device = V4l2Device;

    fn open(&self, path: &Path) -> io::Result<V4l2Device> {
        V4l2Device::open(path, self.buffer_count)
    }
}

/// One `mmap`ed driver buffer.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn bytes(&self, used: usize) -> &[u8] {
        // SAFETY: `ptr` is a live read/write mapping of `len` bytes until drop.
        unsafe { slice::from_raw_parts(self.ptr, used.min(self.len)) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by `mmap` with exactly this length.
        if unsafe { libc::munmap(self.ptr.cast(), self.len) } != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

pub struct V4l2Device {
    // Unmapped before the device handle closes.
    buffers: Vec<Mapping>,
    dev: Device,
    fd: c_int,
    buffer_count: u32,
    streaming: bool,
}

impl V4l2Device {
    pub fn open(path: &Path, buffer_count: u32) -> io::Result<Self> {
        let dev = Device::with_path(path)?;
        let fd = dev.handle().fd();
        Ok(Self {
            buffers: Vec::new(),
            dev,
            fd,
            buffer_count,
            streaming: false,
        })
    }

    fn buffer_desc(&self) -> v4l_sys::v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l_sys::v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: every call site passes the argument struct the request expects.
        unsafe { v4l2::ioctl(self.fd, request, arg as *mut T as *mut c_void) }
    }

    fn allocate_buffers(&mut self) -> io::Result<()> {
        // SAFETY: plain C struct, zero is valid.
        let mut req: v4l_sys::v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = self.buffer_count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        if req.count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "driver granted no capture buffers",
            ));
        }
        debug!("driver granted {} of {} buffers", req.count, self.buffer_count);

        let mut buffers = Vec::with_capacity(req.count as usize);
        for index in 0..req.count {
            let mut buf = self.buffer_desc();
            buf.index = index;
            self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;

            let len = buf.length as usize;
            // SAFETY: QUERYBUF filled the mmap variant of the union for MMAP memory.
            let offset = unsafe { buf.m.offset };
            // SAFETY: mapping a driver buffer at the offset the driver reported.
            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    self.fd,
                    offset as libc::off_t,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            buffers.push(Mapping {
                ptr: ptr.cast(),
                len,
            });
        }
        self.buffers = buffers;
        Ok(())
    }

    fn stream_ioctl(&self, request: vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut typ = Type::VideoCapture as u32;
        self.ioctl(request, &mut typ)
    }
}

impl CaptureDevice for V4l2Device {
    fn formats(&mut self) -> io::Result<Vec<FormatDescription>> {
        Ok(self
            .dev
            .enum_formats()?
            .into_iter()
            .map(|d| FormatDescription {
                format: PixelFormat::new(d.fourcc.repr),
                description: d.description,
            })
            .collect())
    }

    fn frame_sizes(&mut self, format: PixelFormat) -> io::Result<Vec<FrameSizeRange>> {
        let sizes = self.dev.enum_framesizes(FourCC::new(&format.code()))?;
        Ok(sizes
            .into_iter()
            .map(|fs| match fs.size {
                FrameSizeEnum::Discrete(d) => FrameSizeRange::discrete(d.width, d.height),
                FrameSizeEnum::Stepwise(s) => FrameSizeRange {
                    min_width: s.min_width,
                    max_width: s.max_width,
                    min_height: s.min_height,
                    max_height: s.max_height,
                },
            })
            .collect())
    }

    fn current_format(&mut self) -> io::Result<NegotiatedFormat> {
        let fmt = self.dev.format()?;
        Ok(NegotiatedFormat {
            format: PixelFormat::new(fmt.fourcc.repr),
            width: fmt.width,
            height: fmt.height,
        })
    }

    fn set_format(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> io::Result<NegotiatedFormat> {
        let requested = Format::new(width, height, FourCC::new(&format.code()));
        let actual = self.dev.set_format(&requested)?;
        let actual_format = PixelFormat::new(actual.fourcc.repr);
        if actual_format != format {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("driver switched format to {actual_format}"),
            ));
        }
        Ok(NegotiatedFormat {
            format: actual_format,
            width: actual.width,
            height: actual.height,
        })
    }

    fn start(&mut self) -> io::Result<()> {
        if self.buffers.is_empty() {
            self.allocate_buffers()?;
        }
        for index in 0..self.buffers.len() {
            self.release(index)?;
        }
        self.stream_ioctl(vidioc::VIDIOC_STREAMON)?;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF)
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        // SAFETY: one valid pollfd.
        match unsafe { libc::poll(&mut pfd, 1, ms) } {
            0 => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out waiting for frame",
            )),
            n if n < 0 => Err(io::Error::last_os_error()),
            _ if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 => Err(
                io::Error::new(io::ErrorKind::BrokenPipe, "device reported a poll error"),
            ),
            _ => Ok(()),
        }
    }

    fn dequeue(&mut self) -> io::Result<RawBuffer<'_>> {
        let mut buf = self.buffer_desc();
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;

        let slot = buf.index as usize;
        let mapping = self.buffers.get(slot).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned unknown buffer index {slot}"),
            )
        })?;
        Ok(RawBuffer {
            slot,
            bytes: mapping.bytes(buf.bytesused as usize),
        })
    }

    fn release(&mut self, slot: usize) -> io::Result<()> {
        let mut buf = self.buffer_desc();
        buf.index = slot as u32;
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("VIDIOC_STREAMOFF failed on close: {e}");
        }
    }
}
