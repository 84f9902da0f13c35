//! Mixed-radix conversion between flat coefficient indices and per-dimension multi-indices.
//!
//! The convention is fixed: the **last** digit varies fastest (row-major / C order), so
//! `j = r_0 * (N_1 * ... * N_{n-1}) + r_1 * (N_2 * ... * N_{n-1}) + ... + r_{n-1}`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadixError {
    #[error("A mixed-radix system needs at least one digit.")]
    Empty,

    #[error("Radix of digit {0} is zero; every digit needs at least one value.")]
    ZeroRadix(usize),

    #[error("The product of the radices overflows the index type.")]
    Overflow,

    #[error("Expected {expected} digits, but {found} were supplied.")]
    DigitCount { expected: usize, found: usize },

    #[error("Digit {position} has value {value}, which is not below its radix {radix}.")]
    DigitOutOfRange {
        position: usize,
        value: usize,
        radix: usize,
    },

    #[error("Flat index {index} is not below the system size {size}.")]
    IndexOutOfRange { index: usize, size: usize },
}

/// A fixed mixed-radix number system, one radix per tensor dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedRadix {
    radices: Vec<usize>,
    size: usize,
}

impl MixedRadix {
    pub fn new(radices: &[usize]) -> Result<Self, RadixError> {
        if radices.is_empty() {
            return Err(RadixError::Empty);
        }
        if let Some(position) = radices.iter().position(|&r| r == 0) {
            return Err(RadixError::ZeroRadix(position));
        }
        let size = radices
            .iter()
            .try_fold(1usize, |acc, &r| acc.checked_mul(r))
            .ok_or(RadixError::Overflow)?;

        Ok(Self {
            radices: radices.to_vec(),
            size,
        })
    }

    /// Number of digits (tensor dimensions).
    pub fn ndigits(&self) -> usize {
        self.radices.len()
    }

    pub fn radices(&self) -> &[usize] {
        &self.radices
    }

    /// Total number of representable flat indices, `prod(radices)`.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Flattens a multi-index into its position in `[0, size)`.
    pub fn encode(&self, digits: &[usize]) -> Result<usize, RadixError> {
        if digits.len() != self.radices.len() {
            return Err(RadixError::DigitCount {
                expected: self.radices.len(),
                found: digits.len(),
            });
        }

        let mut index = 0usize;
        for (position, (&value, &radix)) in digits.iter().zip(&self.radices).enumerate() {
            if value >= radix {
                return Err(RadixError::DigitOutOfRange {
                    position,
                    value,
                    radix,
                });
            }
            // Horner form; cannot overflow because the result stays below `size`.
            index = index * radix + value;
        }
        Ok(index)
    }

    /// Splits a flat index into its digits, writing them into `digits`.
    ///
    /// Digits are extracted from the last dimension to the first:
    /// `r_k = (index / denom) mod N_k`, then `denom *= N_k`.
    pub fn decode(&self, index: usize, digits: &mut [usize]) -> Result<(), RadixError> {
        if index >= self.size {
            return Err(RadixError::IndexOutOfRange {
                index,
                size: self.size,
            });
        }
        if digits.len() != self.radices.len() {
            return Err(RadixError::DigitCount {
                expected: self.radices.len(),
                found: digits.len(),
            });
        }

        let mut denom = 1usize;
        for (digit, &radix) in digits.iter_mut().zip(&self.radices).rev() {
            *digit = (index / denom) % radix;
            denom *= radix;
        }
        Ok(())
    }

    pub fn decode_to_vec(&self, index: usize) -> Result<Vec<usize>, RadixError> {
        let mut digits = vec![0; self.radices.len()];
        self.decode(index, &mut digits)?;
        Ok(digits)
    }
}
