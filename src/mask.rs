//! Channel selection bitset.
//!
//! A [`ChannelsMask`] holds one bit per channel of a device, packed into
//! `ceil(channel_count / 32)` 32-bit words. Bit `n` selects the channel at
//! position `n` in the device's sorted channel list.
//!
//! Masks only ever exchange contents with masks of the same word count; a
//! mismatched copy fails instead of truncating.

use std::fmt::Write as _;

use crate::error::{IioError, Result};

/// Fixed-width channel bitset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelsMask {
    words: Vec<u32>,
}

impl ChannelsMask {
    /// Create an all-clear mask for `channel_count` channels.
    ///
    /// # Errors
    ///
    /// Returns [`IioError::InvalidArgument`] when `channel_count` is zero.
    pub fn new(channel_count: usize) -> Result<Self> {
        if channel_count == 0 {
            return Err(IioError::invalid("channel mask needs at least one channel"));
        }
        Ok(Self {
            words: vec![0; channel_count.div_ceil(32)],
        })
    }

    /// Number of 32-bit words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Raw words, least significant first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Overwrite this mask with `src`.
    ///
    /// # Errors
    ///
    /// Returns [`IioError::SizeMismatch`] if the word counts differ. The
    /// destination is left untouched in that case.
    pub fn copy_from(&mut self, src: &ChannelsMask) -> Result<()> {
        self.check_same_size(src)?;
        self.words.copy_from_slice(&src.words);
        Ok(())
    }

    /// Fail with [`IioError::SizeMismatch`] unless `other` has the same width.
    pub fn check_same_size(&self, other: &ChannelsMask) -> Result<()> {
        if self.words.len() != other.words.len() {
            return Err(IioError::SizeMismatch {
                expected: self.words.len(),
                actual: other.words.len(),
            });
        }
        Ok(())
    }

    /// Whether `bit` is set. Bits beyond the mask read as clear.
    pub fn test_bit(&self, bit: usize) -> bool {
        self.words
            .get(bit / 32)
            .is_some_and(|word| word & (1 << (bit % 32)) != 0)
    }

    /// Set `bit`. Bits beyond the mask are ignored.
    pub fn set_bit(&mut self, bit: usize) {
        if let Some(word) = self.words.get_mut(bit / 32) {
            *word |= 1 << (bit % 32);
        }
    }

    /// Clear `bit`. Bits beyond the mask are ignored.
    pub fn clear_bit(&mut self, bit: usize) {
        if let Some(word) = self.words.get_mut(bit / 32) {
            *word &= !(1 << (bit % 32));
        }
    }

    /// Clear every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Wire form: each word as eight lowercase hex digits, most
    /// significant word first.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.words.len() * 8);
        for word in self.words.iter().rev() {
            let _ = write!(out, "{word:08x}");
        }
        out
    }

    /// Parse the wire form produced by [`to_hex`](Self::to_hex) into this
    /// mask.
    ///
    /// # Errors
    ///
    /// [`IioError::SizeMismatch`] if the text does not hold exactly
    /// `word_count()` words, [`IioError::Protocol`] on non-hex input. The
    /// mask is unchanged on error.
    pub fn set_from_hex(&mut self, text: &str) -> Result<()> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.len() % 8 != 0 || text.len() / 8 != self.words.len() {
            return Err(IioError::SizeMismatch {
                expected: self.words.len(),
                actual: text.len().div_ceil(8),
            });
        }

        let mut words = vec![0u32; self.words.len()];
        for (i, chunk) in text.as_bytes().chunks(8).enumerate() {
            let chunk = std::str::from_utf8(chunk)
                .map_err(|_| IioError::protocol("mask is not ASCII"))?;
            let word = u32::from_str_radix(chunk, 16)
                .map_err(|_| IioError::protocol(format!("bad mask word '{chunk}'")))?;
            words[self.words.len() - 1 - i] = word;
        }
        self.words = words;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        assert_eq!(ChannelsMask::new(1).unwrap().word_count(), 1);
        assert_eq!(ChannelsMask::new(32).unwrap().word_count(), 1);
        assert_eq!(ChannelsMask::new(33).unwrap().word_count(), 2);
        assert_eq!(ChannelsMask::new(64).unwrap().word_count(), 2);
        assert_eq!(ChannelsMask::new(65).unwrap().word_count(), 3);
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(matches!(
            ChannelsMask::new(0),
            Err(IioError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_bit_ops() {
        let mut mask = ChannelsMask::new(40).unwrap();
        assert!(mask.is_empty());
        mask.set_bit(0);
        mask.set_bit(33);
        assert!(mask.test_bit(0));
        assert!(mask.test_bit(33));
        assert!(!mask.test_bit(1));
        assert_eq!(mask.words(), &[1, 2]);
        assert_eq!(mask.count_ones(), 2);

        mask.clear_bit(0);
        assert!(!mask.test_bit(0));
        assert_eq!(mask.words(), &[0, 2]);

        // out of range is ignored
        mask.set_bit(200);
        assert!(!mask.test_bit(200));
        assert_eq!(mask.count_ones(), 1);
    }

    #[test]
    fn test_copy_mismatch_leaves_destination() {
        let mut dst = ChannelsMask::new(40).unwrap();
        dst.set_bit(35);
        let mut src = ChannelsMask::new(8).unwrap();
        src.set_bit(1);

        let err = dst.copy_from(&src).unwrap_err();
        assert!(matches!(
            err,
            IioError::SizeMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(dst.words(), &[0, 8]);
    }

    #[test]
    fn test_copy_same_size() {
        let mut dst = ChannelsMask::new(10).unwrap();
        dst.set_bit(9);
        let mut src = ChannelsMask::new(31).unwrap();
        src.set_bit(2);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_hex_is_most_significant_word_first() {
        let mut mask = ChannelsMask::new(40).unwrap();
        mask.set_bit(0);
        mask.set_bit(32);
        assert_eq!(mask.to_hex(), "0000000100000001");

        let mut parsed = ChannelsMask::new(40).unwrap();
        parsed.set_from_hex("00000080000000ff\n").unwrap();
        assert_eq!(parsed.words(), &[0xff, 0x80]);
    }

    #[test]
    fn test_hex_wrong_width_rejected() {
        let mut mask = ChannelsMask::new(8).unwrap();
        mask.set_bit(3);
        assert!(mask.set_from_hex("0000000000000001").is_err());
        assert!(mask.set_from_hex("zzzzzzzz").is_err());
        assert!(mask.test_bit(3));
    }
}
