/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// Alignment of code sections inside a blob.
pub const CODE_ENTRY_ALIGNMENT: usize = 32;

/// The entry bci of a normal (non-OSR) compiled method.
pub const INVOCATION_ENTRY_BCI: i32 = -1;
/// The entry bci of an OSR method whose entry has been invalidated.
pub const INVALID_OSR_ENTRY_BCI: i32 = -2;

/// Number of entries in the per-nmethod pc-descriptor ring cache.
pub const PC_DESC_CACHE_SIZE: usize = 4;

/// Largest pc offset a pc descriptor lookup will consider.
pub const PC_DESC_UPPER_OFFSET_LIMIT: usize = (u32::MAX >> 1) as usize;
