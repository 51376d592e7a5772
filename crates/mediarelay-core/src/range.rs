//! HTTP byte range planning
//!
//! A [`RangePlan`] maps a requested byte range onto chunk-aligned upstream
//! fetches. The first chunk is trimmed by `first_part_cut` bytes at the front
//! and the last chunk is truncated to `last_part_cut` bytes, so the yielded
//! bytes are exactly `from..=until`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StreamError};
use crate::pipeline::PartWindow;

/// A single `Range: bytes=...` specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSpec {
    /// `bytes=a-b`
    FromTo { start: u64, end: u64 },
    /// `bytes=a-`
    From { start: u64 },
    /// `bytes=-n`
    Suffix { length: u64 },
}

impl FromStr for ByteRangeSpec {
    type Err = StreamError;

    fn from_str(header: &str) -> Result<Self> {
        let invalid = |reason: &str| StreamError::InvalidRange {
            file_size: 0,
            reason: reason.to_string(),
        };

        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| invalid("unsupported range unit"))?
            .trim();
        if spec.contains(',') {
            return Err(invalid("multiple ranges are not supported"));
        }

        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| invalid("missing '-' separator"))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("range bound is not a number"))
        };

        match (start.trim().is_empty(), end.trim().is_empty()) {
            (false, false) => Ok(Self::FromTo {
                start: parse(start)?,
                end: parse(end)?,
            }),
            (false, true) => Ok(Self::From {
                start: parse(start)?,
            }),
            (true, false) => Ok(Self::Suffix {
                length: parse(end)?,
            }),
            (true, true) => Err(invalid("empty range")),
        }
    }
}

impl fmt::Display for ByteRangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromTo { start, end } => write!(f, "bytes={start}-{end}"),
            Self::From { start } => write!(f, "bytes={start}-"),
            Self::Suffix { length } => write!(f, "bytes=-{length}"),
        }
    }
}

/// Byte range resolved against a file, plus the chunk fetches that serve it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub file_size: u64,
    /// First byte served
    pub from: u64,
    /// Last byte served, inclusive; meaningless when `length` is zero
    pub until: u64,
    /// Bytes served
    pub length: u64,
    /// Whether the client asked for a range (206) rather than the whole file (200)
    pub partial: bool,
    pub window: PartWindow,
}

impl RangePlan {
    pub fn new(range: Option<ByteRangeSpec>, file_size: u64, chunk_size: u64) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        let unsatisfiable = |reason: &str| StreamError::InvalidRange {
            file_size,
            reason: reason.to_string(),
        };

        let Some(range) = range else {
            if file_size == 0 {
                return Ok(Self {
                    file_size,
                    from: 0,
                    until: 0,
                    length: 0,
                    partial: false,
                    window: PartWindow::empty(chunk_size),
                });
            }
            return Ok(Self::span(file_size, 0, file_size - 1, false, chunk_size));
        };

        let (from, until) = match range {
            ByteRangeSpec::FromTo { start, end } => {
                // An end one past the last byte is tolerated and clamped
                let end = if end == file_size && file_size > 0 {
                    file_size - 1
                } else {
                    end
                };
                (start, end)
            }
            ByteRangeSpec::From { start } => (start, file_size.saturating_sub(1)),
            ByteRangeSpec::Suffix { length } => {
                if length == 0 {
                    return Err(unsatisfiable("empty suffix range"));
                }
                (file_size.saturating_sub(length), file_size.saturating_sub(1))
            }
        };

        if from >= file_size {
            return Err(unsatisfiable("range starts past the end of the file"));
        }
        if until >= file_size {
            return Err(unsatisfiable("range ends past the end of the file"));
        }
        if from > until {
            return Err(unsatisfiable("range start is after its end"));
        }

        Ok(Self::span(file_size, from, until, true, chunk_size))
    }

    fn span(file_size: u64, from: u64, until: u64, partial: bool, chunk_size: u64) -> Self {
        let offset = from - from % chunk_size;
        let window = PartWindow {
            offset,
            first_part_cut: (from - offset) as usize,
            last_part_cut: (until % chunk_size + 1) as usize,
            part_count: until / chunk_size - offset / chunk_size + 1,
            chunk_size,
        };

        Self {
            file_size,
            from,
            until,
            length: until - from + 1,
            partial,
            window,
        }
    }

    /// `Content-Range` value for a partial response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.from, self.until, self.file_size)
    }

    /// `Content-Range` value for a 416 response
    pub fn unsatisfiable_range(file_size: u64) -> String {
        format!("bytes */{file_size}")
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_parse_specs() {
        assert_eq!(
            "bytes=0-99".parse::<ByteRangeSpec>().unwrap(),
            ByteRangeSpec::FromTo { start: 0, end: 99 }
        );
        assert_eq!(
            "bytes=500-".parse::<ByteRangeSpec>().unwrap(),
            ByteRangeSpec::From { start: 500 }
        );
        assert_eq!(
            " bytes=-20 ".parse::<ByteRangeSpec>().unwrap(),
            ByteRangeSpec::Suffix { length: 20 }
        );
        assert_eq!(
            ByteRangeSpec::Suffix { length: 20 }.to_string(),
            "bytes=-20"
        );

        for bad in ["items=0-1", "bytes=0-1,5-6", "bytes=-", "bytes=a-b", "bytes=5"] {
            assert!(bad.parse::<ByteRangeSpec>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_whole_file() {
        let plan = RangePlan::new(None, 2_500_000, MIB).unwrap();
        assert!(!plan.partial);
        assert_eq!(plan.length, 2_500_000);
        assert_eq!(
            plan.window,
            PartWindow {
                offset: 0,
                first_part_cut: 0,
                last_part_cut: (2_499_999 % MIB + 1) as usize,
                part_count: 3,
                chunk_size: MIB,
            }
        );
    }

    #[test]
    fn test_range_inside_one_chunk() {
        let plan = RangePlan::new(
            Some(ByteRangeSpec::FromTo { start: 100, end: 199 }),
            10 * MIB,
            MIB,
        )
        .unwrap();

        assert!(plan.partial);
        assert_eq!(plan.length, 100);
        assert_eq!(plan.content_range(), format!("bytes 100-199/{}", 10 * MIB));
        assert_eq!(plan.window.offset, 0);
        assert_eq!(plan.window.first_part_cut, 100);
        assert_eq!(plan.window.last_part_cut, 200);
        assert_eq!(plan.window.part_count, 1);
    }

    #[test]
    fn test_range_spanning_chunks() {
        let plan = RangePlan::new(
            Some(ByteRangeSpec::FromTo {
                start: MIB + 10,
                end: 3 * MIB + 5,
            }),
            10 * MIB,
            MIB,
        )
        .unwrap();

        assert_eq!(plan.window.offset, MIB);
        assert_eq!(plan.window.first_part_cut, 10);
        assert_eq!(plan.window.last_part_cut, 6);
        assert_eq!(plan.window.part_count, 3);
    }

    #[test]
    fn test_unaligned_span_counts_every_touched_chunk() {
        // Two bytes straddling a chunk boundary need two fetches
        let plan = RangePlan::new(
            Some(ByteRangeSpec::FromTo {
                start: MIB - 1,
                end: MIB,
            }),
            4 * MIB,
            MIB,
        )
        .unwrap();
        assert_eq!(plan.window.part_count, 2);
        assert_eq!(plan.length, 2);
    }

    #[test]
    fn test_open_and_suffix_ranges() {
        let plan = RangePlan::new(Some(ByteRangeSpec::From { start: 900 }), 1000, 4096).unwrap();
        assert_eq!((plan.from, plan.until, plan.length), (900, 999, 100));

        let plan = RangePlan::new(Some(ByteRangeSpec::Suffix { length: 10 }), 1000, 4096).unwrap();
        assert_eq!((plan.from, plan.until), (990, 999));

        let plan =
            RangePlan::new(Some(ByteRangeSpec::Suffix { length: 5000 }), 1000, 4096).unwrap();
        assert_eq!((plan.from, plan.until), (0, 999));
    }

    #[test]
    fn test_end_equal_to_size_is_clamped() {
        let plan = RangePlan::new(
            Some(ByteRangeSpec::FromTo {
                start: 0,
                end: 1000,
            }),
            1000,
            4096,
        )
        .unwrap();
        assert_eq!(plan.until, 999);
    }

    #[test]
    fn test_unsatisfiable_ranges() {
        let cases = [
            ByteRangeSpec::FromTo { start: 10, end: 5 },
            ByteRangeSpec::FromTo {
                start: 0,
                end: 1001,
            },
            ByteRangeSpec::From { start: 1000 },
            ByteRangeSpec::Suffix { length: 0 },
        ];
        for spec in cases {
            let err = RangePlan::new(Some(spec), 1000, 4096).unwrap_err();
            assert!(err.is_invalid_range(), "{spec} should be rejected");
        }

        assert_eq!(RangePlan::unsatisfiable_range(1000), "bytes */1000");
    }

    #[test]
    fn test_empty_file() {
        let plan = RangePlan::new(None, 0, 4096).unwrap();
        assert_eq!(plan.length, 0);
        assert_eq!(plan.window.part_count, 0);

        assert!(RangePlan::new(Some(ByteRangeSpec::From { start: 0 }), 0, 4096).is_err());
    }

    proptest! {
        #[test]
        fn window_covers_exactly_the_range(
            file_size in 1u64..50_000,
            a in 0u64..50_000,
            b in 0u64..50_000,
            chunk_pow in 0u32..4,
        ) {
            let chunk_size = 4096u64 << chunk_pow;
            let from = a % file_size;
            let until = from + b % (file_size - from);
            let plan = RangePlan::new(
                Some(ByteRangeSpec::FromTo { start: from, end: until }),
                file_size,
                chunk_size,
            ).unwrap();
            let w = plan.window;

            prop_assert_eq!(w.offset % chunk_size, 0);
            prop_assert_eq!(w.offset + w.first_part_cut as u64, from);
            let last_chunk_start = w.offset + (w.part_count - 1) * chunk_size;
            prop_assert_eq!(last_chunk_start + w.last_part_cut as u64 - 1, until);

            // Bytes served by the cuts equal the requested length
            let served = if w.part_count == 1 {
                (w.last_part_cut - w.first_part_cut) as u64
            } else {
                (chunk_size - w.first_part_cut as u64)
                    + (w.part_count - 2) * chunk_size
                    + w.last_part_cut as u64
            };
            prop_assert_eq!(served, plan.length);
        }
    }
}
