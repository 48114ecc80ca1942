use crate::util::constants::*;
use crate::util::Address;

/* Alignment */

pub fn page_align_down(address: Address) -> Address {
    address.align_down(BYTES_IN_PAGE)
}

pub fn is_page_aligned(address: Address) -> bool {
    address.is_aligned_to(BYTES_IN_PAGE)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub fn pages_to_bytes(pages: usize) -> usize {
    pages << LOG_BYTES_IN_PAGE
}

pub fn bytes_to_pages_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_PAGE - 1) >> LOG_BYTES_IN_PAGE
}

/// Round a byte size up to whole pages, in bytes.
pub fn page_align_up_size(bytes: usize) -> usize {
    raw_align_up(bytes, BYTES_IN_PAGE)
}

/// Number of `unit`-sized pieces needed to hold `bytes`. `unit` must be a power of two.
pub fn size_to_units_up(bytes: usize, unit: usize) -> usize {
    debug_assert!(unit.is_power_of_two());
    raw_align_up(bytes, unit) / unit
}

/// Format a byte size as a human readable string, e.g. `32.0 MiB`.
pub fn bytes_to_formatted_string(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut i = 0;
    let mut num = bytes as f64;
    while num >= 1024.0 && i < UNITS.len() - 1 {
        num /= 1024.0;
        i += 1;
    }
    if i == 0 {
        format!("{} {}", bytes, UNITS[i])
    } else {
        format!("{:.1} {}", num, UNITS[i])
    }
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;
    use crate::util::Address;

    #[test]
    fn test_page_align() {
        let addr = unsafe { Address::from_usize(0x123456789) };
        assert_eq!(page_align_down(addr), unsafe {
            Address::from_usize(0x123456000)
        });
        assert!(!is_page_aligned(addr));
        assert!(is_page_aligned(page_align_down(addr)));
    }

    #[test]
    fn test_units() {
        assert_eq!(size_to_units_up(0, 64), 0);
        assert_eq!(size_to_units_up(1, 64), 1);
        assert_eq!(size_to_units_up(64, 64), 1);
        assert_eq!(size_to_units_up(65, 64), 2);
        assert_eq!(bytes_to_pages_up(1), 1);
        assert_eq!(pages_to_bytes(2), 2 * BYTES_IN_PAGE);
        assert_eq!(page_align_up_size(BYTES_IN_PAGE + 1), 2 * BYTES_IN_PAGE);
    }

    #[test]
    fn test_formatted_size() {
        assert_eq!(bytes_to_formatted_string(100), "100 B");
        assert_eq!(bytes_to_formatted_string(160 * 1024), "160.0 KiB");
        assert_eq!(bytes_to_formatted_string(32 << 20), "32.0 MiB");
    }
}
