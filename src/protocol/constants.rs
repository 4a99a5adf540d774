//! RESP2 protocol constants

/// Frame type prefixes
pub mod prefix {
    /// Simple string (`+OK`)
    pub const SIMPLE_STRING: u8 = b'+';

    /// Error reply (`-ERR ...`)
    pub const ERROR: u8 = b'-';

    /// Integer reply (`:1`)
    pub const INTEGER: u8 = b':';

    /// Bulk string (`$3\r\nfoo`)
    pub const BULK_STRING: u8 = b'$';

    /// Array (`*2\r\n...`)
    pub const ARRAY: u8 = b'*';
}

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Largest bulk string accepted (512 MiB, the server's own `proto-max-bulk-len`)
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

/// Largest array accepted before allocating its element vector
pub const MAX_ARRAY_LENGTH: usize = 1024 * 1024;

/// Deepest array nesting accepted
pub const MAX_NESTING_DEPTH: usize = 64;

/// Longest header line (type byte, length digits, CRLF) accepted
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
