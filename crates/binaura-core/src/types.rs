//! Common types for Binaura
//!
//! Fundamental audio types shared by the HAL adapters, the pipeline and the
//! spatial renderer: the planar multi-channel buffer and channel ranges.

use serde::{Deserialize, Serialize};

/// Audio sample type (32-bit float throughout the engine)
pub type Sample = f32;

/// Direction of a stream or sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A contiguous, non-empty channel range `[start, end)`
///
/// Ranges are expressed in an aggregate device's channel space for one
/// direction. Construction rejects zero-width ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRange {
    start: u16,
    end: u16,
}

impl ChannelRange {
    /// Create a range, returning `None` when `end <= start`
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Range starting at `start` spanning `width` channels
    pub fn with_width(start: u16, width: u16) -> Option<Self> {
        Self::new(start, start.checked_add(width)?)
    }

    #[inline]
    pub fn start(&self) -> u16 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of channels in the range (always at least 1)
    #[inline]
    pub fn width(&self) -> u16 {
        self.end - self.start
    }

    /// Whether `other` lies entirely within this range
    pub fn contains_range(&self, other: &ChannelRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Shift the range to a new start, keeping its width
    pub fn moved_to(&self, start: u16) -> Option<Self> {
        Self::with_width(start, self.width())
    }

    /// Iterate the channel indices
    pub fn channels(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }
}

impl std::fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 1-based for display, matching how interfaces label their jacks
        write!(f, "{}-{}", self.start + 1, self.end)
    }
}

/// Planar multi-channel audio buffer backed by one contiguous allocation
///
/// Channel `c` occupies `data[c * capacity .. c * capacity + frames]`. The
/// allocation is sized once for `(channels, capacity)`, optionally with
/// spare channels; `set_frames` and `set_channel_count` only move the
/// logical shape, so both are safe to call on the audio thread.
#[derive(Debug, Clone)]
pub struct PlanarBuffer {
    data: Vec<Sample>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl PlanarBuffer {
    /// Allocate a silent buffer for `channels` x `capacity` frames
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![0.0; channels * capacity],
            channels,
            capacity,
            frames: capacity,
        }
    }

    /// Allocate room for `max_channels`, exposing the first `channels`
    pub fn with_channel_capacity(channels: usize, max_channels: usize, capacity: usize) -> Self {
        let mut buffer = Self::new(channels.max(max_channels), capacity);
        buffer.channels = channels;
        buffer
    }

    /// Build a buffer from per-channel slices (all must share one length)
    pub fn from_channels(channels: &[&[Sample]]) -> Self {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut buffer = Self::new(channels.len(), frames);
        for (index, source) in channels.iter().enumerate() {
            let len = source.len().min(frames);
            buffer.channel_mut(index)[..len].copy_from_slice(&source[..len]);
        }
        buffer
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Current frame count
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Maximum frame count this buffer can hold without reallocating
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set the working length (RT-safe: no allocation)
    ///
    /// Returns `false` and leaves the length untouched if `frames` exceeds
    /// the capacity.
    #[inline]
    pub fn set_frames(&mut self, frames: usize) -> bool {
        if frames > self.capacity {
            return false;
        }
        self.frames = frames;
        true
    }

    /// Channels the allocation can expose without reallocating
    #[inline]
    pub fn channel_capacity(&self) -> usize {
        if self.capacity == 0 {
            self.channels
        } else {
            self.data.len() / self.capacity
        }
    }

    /// Change the exposed channel count (RT-safe: no allocation)
    ///
    /// Returns `false` and leaves the count untouched if `channels` exceeds
    /// the channel capacity.
    #[inline]
    pub fn set_channel_count(&mut self, channels: usize) -> bool {
        if channels > self.channel_capacity() {
            return false;
        }
        self.channels = channels;
        true
    }

    /// Samples of one channel; empty slice when out of range
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        if index >= self.channels {
            return &[];
        }
        let start = index * self.capacity;
        &self.data[start..start + self.frames]
    }

    /// Mutable samples of one channel; empty slice when out of range
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        if index >= self.channels {
            return &mut [];
        }
        let start = index * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Zero the working region of every channel
    pub fn clear(&mut self) {
        for index in 0..self.channels {
            self.channel_mut(index).fill(0.0);
        }
    }

    /// Zero the working region of the channels in `range`
    pub fn clear_range(&mut self, range: ChannelRange) {
        for index in range.channels() {
            self.channel_mut(index).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_range_rejects_zero_width() {
        assert!(ChannelRange::new(4, 4).is_none());
        assert!(ChannelRange::new(5, 4).is_none());
        let range = ChannelRange::new(2, 4).unwrap();
        assert_eq!(range.width(), 2);
        assert_eq!(range.to_string(), "3-4");
    }

    #[test]
    fn test_channel_range_containment() {
        let outer = ChannelRange::new(0, 8).unwrap();
        let inner = ChannelRange::new(2, 4).unwrap();
        assert!(outer.contains_range(&inner));
        assert!(!inner.contains_range(&outer));
        assert_eq!(inner.moved_to(6), ChannelRange::new(6, 8));
        assert!(ChannelRange::with_width(u16::MAX, 2).is_none());
    }

    #[test]
    fn test_planar_buffer_layout() {
        let mut buffer = PlanarBuffer::new(3, 8);
        assert!(buffer.set_frames(4));
        buffer.channel_mut(1).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.channel(1), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.channel(0), &[0.0; 4]);
        assert!(buffer.channel(7).is_empty());
        assert!(!buffer.set_frames(9));
        assert_eq!(buffer.frames(), 4);
    }

    #[test]
    fn test_channel_count_moves_within_capacity() {
        let mut buffer = PlanarBuffer::with_channel_capacity(4, 8, 16);
        assert_eq!(buffer.channel_count(), 4);
        assert_eq!(buffer.channel_capacity(), 8);
        assert!(buffer.channel(5).is_empty());

        assert!(buffer.set_channel_count(6));
        buffer.channel_mut(5).fill(1.0);
        assert_eq!(buffer.channel(5), &[1.0; 16]);

        assert!(!buffer.set_channel_count(9));
        assert_eq!(buffer.channel_count(), 6);
    }

    #[test]
    fn test_clear_range_leaves_other_channels() {
        let mut buffer = PlanarBuffer::from_channels(&[&[1.0, 1.0], &[2.0, 2.0], &[3.0, 3.0]]);
        buffer.clear_range(ChannelRange::new(1, 2).unwrap());
        assert_eq!(buffer.channel(0), &[1.0, 1.0]);
        assert_eq!(buffer.channel(1), &[0.0, 0.0]);
        assert_eq!(buffer.channel(2), &[3.0, 3.0]);
    }
}
