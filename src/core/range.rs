// src/core/range.rs

//! Parses `Range` headers for serving completed cache entries. Only single
//! byte-ranges are accepted (`bytes=A-B`, `bytes=A-`, `bytes=-N`); multipart
//! and multiple ranges are rejected.

/// An inclusive, resolved byte range against a known total `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range` header value against a known object `size`.
///
/// Returns `Ok(None)` if `header` is absent or doesn't start with `bytes=`
/// (callers should serve the full body in that case). Returns
/// `Err(())` if the header is present but malformed or unsatisfiable,
/// signaling the caller to respond `416`.
pub fn parse(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, ()> {
    let Some(header) = header else {
        return Ok(None);
    };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return Ok(None);
    };
    // Multiple/multipart ranges ("a-b,c-d") are rejected outright.
    if spec.contains(',') {
        return Err(());
    }

    let (start, end) = if let Some(suffix_len) = spec.strip_prefix('-') {
        let n: u64 = suffix_len.parse().map_err(|_| ())?;
        if size == 0 {
            return Err(());
        }
        let start = size.saturating_sub(n);
        (start, size - 1)
    } else {
        let mut parts = spec.splitn(2, '-');
        let start_str = parts.next().ok_or(())?;
        let end_str = parts.next().ok_or(())?;
        let start: u64 = start_str.parse().map_err(|_| ())?;
        if end_str.is_empty() {
            (start, size.saturating_sub(1))
        } else {
            let end: u64 = end_str.parse().map_err(|_| ())?;
            (start, end)
        }
    };

    if start > end || start >= size {
        return Err(());
    }
    let end = std::cmp::min(end, size.saturating_sub(1));
    Ok(Some(ByteRange { start, end }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_means_full_body() {
        assert_eq!(parse(None, 100), Ok(None));
    }

    #[test]
    fn non_bytes_unit_is_ignored() {
        assert_eq!(parse(Some("items=0-1"), 100), Ok(None));
    }

    #[test]
    fn start_end_form() {
        let r = parse(Some("bytes=0-9"), 100).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 9);
        assert_eq!(r.len(), 10);
    }

    #[test]
    fn open_ended_form() {
        let r = parse(Some("bytes=90-"), 100).unwrap().unwrap();
        assert_eq!(r.start, 90);
        assert_eq!(r.end, 99);
    }

    #[test]
    fn suffix_form() {
        let r = parse(Some("bytes=-10"), 100).unwrap().unwrap();
        assert_eq!(r.start, 90);
        assert_eq!(r.end, 99);
    }

    #[test]
    fn suffix_longer_than_size_clamps_to_zero() {
        let r = parse(Some("bytes=-1000"), 100).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 99);
    }

    #[test]
    fn end_clamped_to_size_minus_one() {
        let r = parse(Some("bytes=0-999"), 100).unwrap().unwrap();
        assert_eq!(r.end, 99);
    }

    #[test]
    fn start_at_or_beyond_size_is_unsatisfiable() {
        assert_eq!(parse(Some("bytes=100-"), 100), Err(()));
        assert_eq!(parse(Some("bytes=150-160"), 100), Err(()));
    }

    #[test]
    fn start_greater_than_end_is_unsatisfiable() {
        assert_eq!(parse(Some("bytes=10-5"), 100), Err(()));
    }

    #[test]
    fn malformed_header_is_unsatisfiable() {
        assert_eq!(parse(Some("bytes=abc-def"), 100), Err(()));
        assert_eq!(parse(Some("bytes="), 100), Err(()));
    }

    #[test]
    fn multiple_ranges_are_rejected() {
        assert_eq!(parse(Some("bytes=0-1,2-3"), 100), Err(()));
    }

    #[test]
    fn full_object_range_matches_spec_example() {
        let r = parse(Some("bytes=0-1048575"), 1_048_576).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 1_048_575);
        assert_eq!(r.len(), 1_048_576);
    }

    proptest::proptest! {
        // Any satisfiable `bytes=A-B` range resolves to a valid, in-bounds
        // span: start <= end < size.
        #[test]
        fn start_end_form_is_always_in_bounds(size in 1u64..10_000, start in 0u64..10_000, len in 0u64..10_000) {
            let end = start + len;
            let header = format!("bytes={start}-{end}");
            if let Ok(Some(r)) = parse(Some(&header), size) {
                prop_assert!(r.start <= r.end);
                prop_assert!(r.end < size);
                prop_assert_eq!(r.start, start);
            }
        }

        // A suffix range never produces a start past the end of the object.
        #[test]
        fn suffix_form_never_exceeds_object_bounds(size in 1u64..10_000, n in 0u64..20_000) {
            let header = format!("bytes=-{n}");
            let result = parse(Some(&header), size);
            if let Ok(Some(r)) = result {
                prop_assert!(r.start <= r.end);
                prop_assert!(r.end == size - 1);
            }
        }
    }
}
