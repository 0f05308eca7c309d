use crate::models::device_models::BufferSizes;

/// Requests outside this range always fall back to the preferred size.
pub const MIN_REQUEST_SIZE: usize = 8;
pub const MAX_REQUEST_SIZE: usize = 32768;

/// Upper bound for enumerating granularity-aligned sizes.
const ENUMERATION_CAP: usize = 6400;

/// Rates checked with `canSampleRate`.
pub const STANDARD_SAMPLE_RATES: [f64; 16] = [
    8000.0, 11025.0, 16000.0, 22050.0, 24000.0, 32000.0, 44100.0, 48000.0, 88200.0, 96000.0,
    176400.0, 192000.0, 352800.0, 384000.0, 705600.0, 768000.0,
];

fn step(granularity: i64) -> usize {
    granularity.max(16) as usize
}

/// Enumerate the block sizes a driver accepts.
///
/// Non-negative granularity yields multiples of `max(16, granularity)` up to
/// `min(6400, max)`; negative granularity yields the powers of two in range.
pub fn legal_buffer_sizes(sizes: &BufferSizes) -> Vec<usize> {
    let mut legal = Vec::new();

    if sizes.granularity >= 0 {
        let g = step(sizes.granularity);
        let start = ((sizes.min + 15) & !15).max(g);
        let end = sizes.max.min(ENUMERATION_CAP);

        let mut i = start;
        while i <= end {
            let size = g * (i / g);
            if size >= sizes.min && legal.last() != Some(&size) {
                legal.push(size);
            }
            i += g;
        }
    } else {
        for shift in 0..18 {
            let size = 1usize << shift;
            if size >= sizes.min && size <= sizes.max {
                legal.push(size);
            }
        }
    }

    legal
}

/// Whether `size` lies in `[min, max]` and fits the granularity rule.
pub fn is_legal_size(sizes: &BufferSizes, size: usize) -> bool {
    if size < sizes.min || size > sizes.max || size == 0 {
        return false;
    }
    if sizes.granularity >= 0 {
        size % step(sizes.granularity) == 0
    } else {
        size.is_power_of_two()
    }
}

/// The driver's preferred size, clamped into `[min, max]`.
///
/// With negative granularity the result is also snapped to a power of two:
/// the largest one not above the preferred size, else the next one up. A
/// range holding no power of two keeps the clamped value.
pub fn clamped_preferred(sizes: &BufferSizes) -> usize {
    if sizes.min > sizes.max {
        return sizes.preferred;
    }
    let preferred = sizes.preferred.clamp(sizes.min, sizes.max);
    if sizes.granularity >= 0 || preferred == 0 || preferred.is_power_of_two() {
        return preferred;
    }

    let below = 1usize << (usize::BITS - 1 - preferred.leading_zeros());
    if below >= sizes.min {
        below
    } else {
        below
            .checked_mul(2)
            .filter(|&size| size <= sizes.max)
            .unwrap_or(preferred)
    }
}

/// Pick the block size for an open.
///
/// The request is honoured only if it is legal; otherwise, or when
/// `force_preferred` is set, the clamped preferred size is used.
pub fn negotiate_block_size(sizes: &BufferSizes, requested: usize, force_preferred: bool) -> usize {
    let out_of_bounds = !(MIN_REQUEST_SIZE..=MAX_REQUEST_SIZE).contains(&requested);

    if force_preferred || out_of_bounds || !is_legal_size(sizes, requested) {
        clamped_preferred(sizes)
    } else {
        requested
    }
}

/// Pick the working sample rate.
///
/// A zero or unlisted request falls back to the first supported rate, and to
/// `fallback` when the driver lists none.
pub fn choose_sample_rate(requested: f64, supported: &[f64], fallback: f64) -> f64 {
    let listed = supported.iter().any(|&r| r == requested);

    let rate = if requested <= 0.0 || (!supported.is_empty() && !listed) {
        supported.first().copied().unwrap_or(0.0)
    } else {
        requested
    };

    if rate <= 0.0 {
        fallback
    } else {
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(min: usize, max: usize, preferred: usize, granularity: i64) -> BufferSizes {
        BufferSizes {
            min,
            max,
            preferred,
            granularity,
        }
    }

    #[test]
    fn granular_sizes_are_aligned_multiples() {
        let s = sizes(64, 512, 256, 64);
        assert_eq!(legal_buffer_sizes(&s), vec![64, 128, 192, 256, 320, 384, 448, 512]);
    }

    #[test]
    fn small_granularity_rounds_up_to_sixteen() {
        let s = sizes(30, 100, 64, 1);
        assert_eq!(legal_buffer_sizes(&s), vec![32, 48, 64, 80, 96]);
    }

    #[test]
    fn enumeration_stops_at_cap() {
        let s = sizes(16, 65536, 512, 0);
        let legal = legal_buffer_sizes(&s);
        assert_eq!(legal.last(), Some(&6400));
        assert!(is_legal_size(&s, 8192));
    }

    #[test]
    fn negative_granularity_gives_powers_of_two() {
        let s = sizes(48, 2048, 256, -1);
        assert_eq!(legal_buffer_sizes(&s), vec![64, 128, 256, 512, 1024, 2048]);
        assert!(is_legal_size(&s, 512));
        assert!(!is_legal_size(&s, 384));
    }

    #[test]
    fn illegal_request_falls_back_to_preferred() {
        let s = sizes(64, 4096, 256, 64);
        assert_eq!(negotiate_block_size(&s, 100, false), 256);
        assert_eq!(negotiate_block_size(&s, 128, false), 128);
        assert_eq!(negotiate_block_size(&s, 8192, false), 256);
    }

    #[test]
    fn forced_preferred_ignores_request() {
        let s = sizes(64, 4096, 256, 64);
        assert_eq!(negotiate_block_size(&s, 512, true), 256);
    }

    #[test]
    fn request_outside_protocol_bounds_uses_preferred() {
        let s = sizes(1, 65536, 256, -1);
        assert_eq!(negotiate_block_size(&s, 4, false), 256);
        assert_eq!(negotiate_block_size(&s, 65536, false), 256);
    }

    #[test]
    fn power_of_two_drivers_get_a_power_of_two_fallback() {
        assert_eq!(clamped_preferred(&sizes(64, 2048, 100, -1)), 64);
        assert_eq!(negotiate_block_size(&sizes(64, 2048, 100, -1), 100, false), 64);
        assert_eq!(clamped_preferred(&sizes(100, 2048, 100, -1)), 128);
        assert_eq!(clamped_preferred(&sizes(100, 120, 110, -1)), 110);
        assert_eq!(clamped_preferred(&sizes(64, 4096, 100, 64)), 100);
    }

    #[test]
    fn negotiated_size_is_always_in_range() {
        let drivers = [
            sizes(64, 4096, 256, 64),
            sizes(64, 4096, 8000, 64),
            sizes(128, 1024, 16, -1),
            sizes(64, 2048, 100, -1),
            sizes(100, 4096, 3000, -1),
            sizes(32, 2048, 96, 0),
            sizes(100, 100, 100, 0),
        ];
        for s in drivers {
            for requested in [0, 1, 8, 31, 64, 100, 128, 500, 1000, 1024, 5000, 40000] {
                let size = negotiate_block_size(&s, requested, false);
                assert!(size >= s.min && size <= s.max, "{:?} {} -> {}", s, requested, size);
                if s.granularity < 0 {
                    assert!(size.is_power_of_two());
                }
            }
        }
    }

    #[test]
    fn sample_rate_selection() {
        let supported = [44100.0, 48000.0, 96000.0];
        assert_eq!(choose_sample_rate(96000.0, &supported, 48000.0), 96000.0);
        assert_eq!(choose_sample_rate(22050.0, &supported, 48000.0), 44100.0);
        assert_eq!(choose_sample_rate(0.0, &supported, 48000.0), 44100.0);
        assert_eq!(choose_sample_rate(0.0, &[], 48000.0), 48000.0);
        assert_eq!(choose_sample_rate(32000.0, &[], 48000.0), 32000.0);
    }
}
