//! Protocol message types

use bytes::Bytes;

/// Reply frame (server → client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string (`+OK`)
    Simple(String),

    /// Error reply (`-ERR unknown command`)
    Error(String),

    /// Integer reply
    Integer(i64),

    /// Bulk string
    Bulk(Bytes),

    /// Null bulk string (`$-1`)
    Null,

    /// Array of frames
    Array(Vec<Frame>),

    /// Null array (`*-1`)
    NullArray,
}

impl Frame {
    /// Check whether this is a null reply of either kind
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }

    /// Short type name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk string",
            Frame::Null => "null",
            Frame::Array(_) => "array",
            Frame::NullArray => "null array",
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{}", s),
            Frame::Error(e) => write!(f, "(error) {}", e),
            Frame::Integer(n) => write!(f, "(integer) {}", n),
            Frame::Bulk(b) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Frame::Null | Frame::NullArray => write!(f, "(nil)"),
            Frame::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Command (client → server)
///
/// Commands go over the wire as an array of bulk strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with its name
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        for arg in args {
            self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        }
        self
    }

    /// Command name, uppercased
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// All parts, name included
    pub fn parts(&self) -> &[Bytes] {
        &self.args
    }
}
