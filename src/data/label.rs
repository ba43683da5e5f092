use regex::Captures;
use serde::{Deserialize, Serialize};

use super::model::DigitalCode;
use crate::error::{Result, TraceError};

// ---------------------------------------------------------------------------
// Decoding strategies
// ---------------------------------------------------------------------------

/// How capture groups become a combined digital code.
///
/// Only consulted when labels are not split per converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// The first capture group alone is the code.
    FirstGroupAsInt,
    /// All groups folded most-significant first: `acc * 2^bitwidth + group`.
    #[default]
    MsbConcat,
}

// ---------------------------------------------------------------------------
// LabelCodec – file-name captures → DigitalCode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelCodec {
    pub converter_count: usize,
    pub bitwidth: u32,
    pub strategy: DecodeStrategy,
    /// Keep one code per converter instead of concatenating.
    pub split_digital: bool,
    /// Groups are floats in `[0, 1)` scaled by `2^bitwidth`.
    pub normalized_digital: bool,
}

impl LabelCodec {
    pub fn new(converter_count: usize, bitwidth: u32) -> Self {
        Self {
            converter_count,
            bitwidth,
            strategy: DecodeStrategy::default(),
            split_digital: false,
            normalized_digital: false,
        }
    }

    pub fn with_strategy(mut self, strategy: DecodeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn split(mut self, split_digital: bool) -> Self {
        self.split_digital = split_digital;
        self
    }

    pub fn normalized(mut self, normalized_digital: bool) -> Self {
        self.normalized_digital = normalized_digital;
        self
    }

    /// Exclusive upper bound of one converter's code; `None` once it no
    /// longer fits a `u64` (64 bits or wider).
    fn scale(&self) -> Option<u64> {
        1u64.checked_shl(self.bitwidth)
    }

    /// Decode one converter's group.
    ///
    /// Normalized groups are multiplied by `2^bitwidth` and truncated, so
    /// `0.999` at 8 bits is 255, never rounded up to 256.
    pub fn decode_group(&self, group: &str) -> Result<u64> {
        let invalid = |reason: &str| TraceError::InvalidCode {
            group: group.to_string(),
            reason: reason.to_string(),
        };

        let code = if self.normalized_digital {
            let fraction: f64 = group.parse().map_err(|_| invalid("not a float"))?;
            if !fraction.is_finite() || fraction < 0.0 {
                return Err(invalid("normalized code must be a finite non-negative float"));
            }
            (fraction * 2f64.powi(i32::try_from(self.bitwidth).unwrap_or(i32::MAX))) as u64
        } else {
            group.parse::<u64>().map_err(|_| invalid("not an unsigned integer"))?
        };

        if self.scale().is_some_and(|scale| code >= scale) {
            return Err(invalid(&format!("code {code} exceeds {} bits", self.bitwidth)));
        }
        Ok(code)
    }

    /// Decode ordered capture groups, most-significant converter first.
    pub fn decode(&self, groups: &[&str]) -> Result<DigitalCode> {
        if groups.is_empty() {
            return Err(TraceError::InvalidCode {
                group: String::new(),
                reason: "file name produced no capture groups".to_string(),
            });
        }

        if self.split_digital {
            let codes = groups
                .iter()
                .map(|g| self.decode_group(g))
                .collect::<Result<Vec<_>>>()?;
            return Ok(DigitalCode::Split(codes));
        }

        match self.strategy {
            DecodeStrategy::FirstGroupAsInt => {
                let first = groups[0];
                let code = if self.normalized_digital {
                    self.decode_group(first)?
                } else {
                    first.parse::<u64>().map_err(|_| TraceError::InvalidCode {
                        group: first.to_string(),
                        reason: "not an unsigned integer".to_string(),
                    })?
                };
                Ok(DigitalCode::Combined(code))
            }
            DecodeStrategy::MsbConcat => {
                let mut combined: u64 = 0;
                for group in groups {
                    let component = self.decode_group(group)?;
                    let shifted = match self.scale() {
                        Some(scale) => combined.checked_mul(scale),
                        None if combined == 0 => Some(0),
                        None => None,
                    };
                    combined = shifted
                        .and_then(|acc| acc.checked_add(component))
                        .ok_or_else(|| TraceError::InvalidCode {
                            group: groups.join("_"),
                            reason: "combined code does not fit in 64 bits".to_string(),
                        })?;
                }
                Ok(DigitalCode::Combined(combined))
            }
        }
    }

    /// Decode the capture groups of a file-name match (group 0 excluded).
    pub fn decode_captures(&self, caps: &Captures<'_>) -> Result<DigitalCode> {
        let groups = caps
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, m)| {
                m.map(|m| m.as_str()).ok_or_else(|| TraceError::InvalidCode {
                    group: format!("#{i}"),
                    reason: "capture group did not participate in the match".to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.decode(&groups)
    }
}

// ---------------------------------------------------------------------------
// BitSelector – one binary classification target
// ---------------------------------------------------------------------------

/// Addresses one bit of one converter.
///
/// On a combined code the bit sits at `bit + converter * bitwidth`, so
/// converter 0 is the least-significant (last-named) converter. On a split
/// code `converter` indexes the per-converter list in file-naming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSelector {
    pub converter: usize,
    pub bit: u32,
    pub bitwidth: u32,
}

impl BitSelector {
    pub fn new(converter: usize, bit: u32, bitwidth: u32) -> Self {
        Self {
            converter,
            bit,
            bitwidth,
        }
    }

    /// Position in the LSB-first enumeration: `converter * bitwidth + bit`.
    pub fn index(&self) -> usize {
        self.converter * self.bitwidth as usize + self.bit as usize
    }

    /// The binary label of `code`: 1 when the addressed bit is set.
    pub fn label(&self, code: &DigitalCode) -> Result<u8> {
        let (source, shift) = match code {
            DigitalCode::Combined(v) => (*v, self.index()),
            DigitalCode::Split(parts) => {
                let v = parts.get(self.converter).ok_or(TraceError::LabelIndex {
                    converter: self.converter,
                    len: parts.len(),
                })?;
                (*v, self.bit as usize)
            }
        };
        let mask = u32::try_from(shift)
            .ok()
            .and_then(|s| 1u64.checked_shl(s))
            .unwrap_or(0);
        Ok(u8::from(source & mask != 0))
    }
}

/// Every selector for `converter_count` converters, LSB-first:
/// selector `i` has `converter = i / bitwidth`, `bit = i % bitwidth`.
pub fn bit_selectors(converter_count: usize, bitwidth: u32) -> Vec<BitSelector> {
    (0..converter_count)
        .flat_map(|converter| (0..bitwidth).map(move |bit| BitSelector::new(converter, bit, bitwidth)))
        .collect()
}
