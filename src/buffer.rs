//! Capture and playback sessions.
//!
//! A [`Buffer`] binds one device, a channel selection and a sample count.
//! Input buffers are filled with [`Buffer::refill`]; output buffers are
//! filled by the application (see [`Channel::write`]) and submitted with
//! [`Buffer::push`].
//!
//! Two strides are tracked: the one implied by the caller's selection, which
//! sizes the storage, and the one of the data actually delivered, which may
//! include extra channels enabled on the target by other clients.

use std::fmt;

use tracing::{debug, warn};

use crate::channel::Channel;
use crate::device::Device;
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

/// A capture or playback session on one device.
///
/// Dropping the buffer closes the session; close failures are logged.
pub struct Buffer {
    dev: Device,
    data: Vec<u8>,
    data_length: usize,
    length: usize,
    requested_mask: ChannelsMask,
    mask: ChannelsMask,
    requested_sample_size: usize,
    sample_size: usize,
    samples_count: usize,
    is_output: bool,
    cyclic: bool,
    high_speed: bool,
    open: bool,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("device", &self.dev.id())
            .field("samples", &self.samples_count)
            .field("sample_size", &self.sample_size)
            .field("output", &self.is_output)
            .field("cyclic", &self.cyclic)
            .finish()
    }
}

impl Buffer {
    /// Open a session on `dev` for `samples_count` samples of the channels
    /// selected in `mask`.
    ///
    /// # Errors
    ///
    /// - [`IioError::SizeMismatch`] if `mask` was not created for `dev`.
    ///   Checked before the backend is involved.
    /// - [`IioError::InvalidArgument`] for a zero sample count or an empty
    ///   selection.
    /// - Whatever the backend's `open` reports.
    pub fn open(dev: &Device, samples_count: usize, cyclic: bool, mask: &ChannelsMask) -> Result<Self> {
        if mask.word_count() != dev.mask_word_count() {
            return Err(IioError::SizeMismatch {
                expected: dev.mask_word_count(),
                actual: mask.word_count(),
            });
        }
        if samples_count == 0 {
            return Err(IioError::invalid("buffer needs at least one sample"));
        }

        let sample_size = dev.sample_size(mask)?;
        if sample_size == 0 {
            return Err(IioError::invalid("no scan element enabled"));
        }
        let length = sample_size
            .checked_mul(samples_count)
            .ok_or_else(|| {
                IioError::exhausted(format!("{samples_count} samples of {sample_size} bytes"))
            })?;
        let is_output = dev
            .channels()
            .any(|chn| chn.is_enabled(mask) && chn.is_output());

        let backend = dev.backend();
        backend.open(dev, samples_count, cyclic, mask)?;
        let high_speed = backend.is_high_speed(dev);

        let mut buffer = Self {
            dev: dev.clone(),
            data: Vec::new(),
            data_length: length,
            length,
            requested_mask: mask.clone(),
            mask: mask.clone(),
            requested_sample_size: sample_size,
            sample_size,
            samples_count,
            is_output,
            cyclic,
            high_speed,
            open: true,
        };

        if !high_speed {
            buffer.data = vec![0; length];
        } else if is_output {
            // Dequeue the first block so the application has somewhere to
            // write samples.
            backend.get_buffer(dev, &mut buffer.data, 0, &mut buffer.mask)?;
            buffer.data_length = buffer.data.len().min(length);
        }

        debug!(
            device = %dev.id(),
            samples = samples_count,
            sample_size,
            cyclic,
            output = is_output,
            high_speed,
            "Buffer opened"
        );
        Ok(buffer)
    }

    /// Device this buffer belongs to.
    pub fn device(&self) -> &Device {
        &self.dev
    }

    /// Number of samples requested at open.
    pub fn samples_count(&self) -> usize {
        self.samples_count
    }

    /// Whether this is a playback buffer.
    pub fn is_output(&self) -> bool {
        self.is_output
    }

    /// Whether the buffer was opened in cyclic mode.
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Channels present in the current data.
    pub fn mask(&self) -> &ChannelsMask {
        &self.mask
    }

    /// Sample size implied by the caller's selection.
    pub fn requested_sample_size(&self) -> usize {
        self.requested_sample_size
    }

    /// Distance in bytes between consecutive samples of the current data.
    pub fn step(&self) -> usize {
        self.sample_size
    }

    /// Valid bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length.min(self.data.len())]
    }

    /// Valid bytes, mutable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let end = self.data_length.min(self.data.len());
        &mut self.data[..end]
    }

    /// Offset of the first sample of `chn`, `None` if the channel is not
    /// part of the current data.
    pub fn first(&self, chn: &Channel) -> Option<usize> {
        if !chn.is_enabled(&self.mask) {
            return None;
        }
        let target = chn.scan_index();

        let mut offset = 0usize;
        let mut prev_index = None;
        for cur in self.dev.channels() {
            let Some(index) = cur.scan_index() else {
                break;
            };
            if Some(index) == target {
                break;
            }
            if !self.mask.test_bit(cur.number()) {
                continue;
            }
            if prev_index == Some(index) {
                continue;
            }
            prev_index = Some(index);

            let len = cur.data_format().sample_bytes();
            if len == 0 {
                continue;
            }
            if offset % len != 0 {
                offset += len - offset % len;
            }
            offset += len;
        }

        let len = chn.data_format().element_bytes();
        if len != 0 && offset % len != 0 {
            offset += len - offset % len;
        }
        Some(offset)
    }

    /// Fetch a new block of samples from the device.
    ///
    /// Returns the number of valid bytes. The delivered channel set may be a
    /// superset of the requested one; [`step`](Self::step) follows it.
    pub fn refill(&mut self) -> Result<usize> {
        if self.is_output {
            return Err(IioError::invalid("cannot refill an output buffer"));
        }
        let dev = self.dev.clone();
        let backend = dev.backend();

        let read = if self.high_speed {
            backend.get_buffer(&dev, &mut self.data, self.length, &mut self.mask)?
        } else {
            backend.read(&dev, &mut self.data, &mut self.mask)?
        };

        self.data_length = read.min(self.data.len());
        self.sample_size = dev.sample_size(&self.mask)?;
        debug!(device = %dev.id(), bytes = read, step = self.sample_size, "Buffer refilled");
        Ok(read)
    }

    /// Submit the whole buffer to the device.
    pub fn push(&mut self) -> Result<usize> {
        self.push_bytes(self.data_length)
    }

    /// Submit only the first `samples` samples.
    pub fn push_partial(&mut self, samples: usize) -> Result<usize> {
        let bytes = samples
            .checked_mul(self.sample_size)
            .filter(|&b| b != 0 && b <= self.length)
            .ok_or_else(|| IioError::invalid(format!("cannot push {samples} samples")))?;
        self.push_bytes(bytes)
    }

    fn push_bytes(&mut self, bytes: usize) -> Result<usize> {
        if !self.is_output {
            return Err(IioError::invalid("cannot push an input buffer"));
        }
        let dev = self.dev.clone();
        let backend = dev.backend();
        let bytes = bytes.min(self.data.len());

        let result = if self.high_speed {
            backend
                .get_buffer(&dev, &mut self.data, bytes, &mut self.mask)
                .map(|_| bytes)
        } else {
            let mut written = 0;
            let mut result = Ok(bytes);
            while written < bytes {
                match backend.write(&dev, &self.data[written..bytes]) {
                    Ok(0) => {
                        result = Err(IioError::BrokenPipe);
                        break;
                    }
                    Ok(n) => written += n,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            result
        };

        self.data_length = self.length.min(self.data.len());
        if let Ok(n) = &result {
            debug!(device = %dev.id(), bytes = n, "Buffer pushed");
        }
        result
    }

    /// Call `f` for every sample of every requested channel in the current
    /// data, in storage order.
    ///
    /// `f` returns how many bytes it processed; the total is returned. The
    /// first error stops the iteration.
    pub fn foreach_sample<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(&Channel, &[u8]) -> Result<usize>,
    {
        let data = self.data();
        let channels: Vec<Channel> = self.dev.channels().collect();
        let mut processed = 0;
        let mut ptr = 0usize;

        while ptr < data.len() {
            let start = ptr;
            for (i, chn) in channels.iter().enumerate() {
                let Some(index) = chn.scan_index() else {
                    break;
                };
                let length = chn.data_format().element_bytes();
                if length == 0 || !self.mask.test_bit(chn.number()) {
                    continue;
                }
                if ptr % length != 0 {
                    ptr += length - ptr % length;
                }
                if ptr + length > data.len() {
                    return Ok(processed);
                }
                if chn.is_enabled(&self.requested_mask) {
                    processed += f(chn, &data[ptr..ptr + length])?;
                }
                let shares_storage = channels
                    .get(i + 1)
                    .is_some_and(|next| next.scan_index() == Some(index));
                if !shares_storage {
                    ptr += length * chn.data_format().repeat.max(1) as usize;
                }
            }
            if ptr == start {
                break;
            }
        }
        Ok(processed)
    }

    /// Abort a blocking refill or push from another thread.
    pub fn cancel(&self) {
        self.dev.backend().cancel(&self.dev);
    }

    /// Switch between blocking and non-blocking I/O.
    pub fn set_blocking_mode(&self, blocking: bool) -> Result<()> {
        self.dev.backend().set_blocking_mode(&self.dev, blocking)
    }

    /// Descriptor to poll for readiness.
    pub fn poll_fd(&self) -> Result<i32> {
        self.dev.backend().poll_fd(&self.dev)
    }

    /// Close the session. Backend failures are logged, never returned.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.open) {
            return;
        }
        match self.dev.backend().close(&self.dev) {
            Ok(()) => debug!(device = %self.dev.id(), "Buffer closed"),
            Err(e) => warn!(device = %self.dev.id(), error = %e, "Failed to close buffer"),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}
