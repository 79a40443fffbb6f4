//! Parser options for controlling strictness, loading and decryption.

/// Parser options, applied before parsing begins.
///
/// # Example
///
/// ```
/// use pdf_xref::parser_config::ParserOptions;
///
/// // Lenient (the default): recovery fallbacks enabled, broken objects skipped
/// let lenient = ParserOptions::lenient();
/// assert!(!lenient.strict);
///
/// // Strict: no recovery, exact %%EOF, malformed EOLs rejected
/// let strict = ParserOptions::strict();
/// assert!(strict.strict);
///
/// // Builder style
/// let opts = ParserOptions::default()
///     .with_password("secret")
///     .with_load_on_demand(true)
///     .dont_ignore_broken_objects();
/// assert!(opts.load_on_demand);
/// assert!(!opts.ignore_broken_objects);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Defer object materialization until first access
    pub load_on_demand: bool,

    /// Disable every recovery fallback and the lenient `%%EOF` search
    ///
    /// In strict mode a `startxref` past the end of the file, an illegal EOL in
    /// a classic XRef entry, an unknown XRef stream record type and a missing
    /// stream `/Length` are all errors.
    pub strict: bool,

    /// Log and free objects that cannot be parsed instead of failing
    pub ignore_broken_objects: bool,

    /// Password tried against the security handler (empty by default)
    pub password: String,

    /// Maximum decoded stream size in bytes (0 = unlimited)
    ///
    /// Guards XRef and object stream decoding against decompression bombs.
    pub max_decompressed_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParserOptions {
    /// Lenient options: recovery enabled, broken objects skipped.
    pub fn lenient() -> Self {
        Self {
            load_on_demand: false,
            strict: false,
            ignore_broken_objects: true,
            password: String::new(),
            max_decompressed_size: 256 * 1024 * 1024,
        }
    }

    /// Strict options: no recovery fallbacks.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::lenient()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_load_on_demand(mut self, on_demand: bool) -> Self {
        self.load_on_demand = on_demand;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Treat XRef entries pointing at unparsable objects as hard errors.
    pub fn dont_ignore_broken_objects(mut self) -> Self {
        self.ignore_broken_objects = false;
        self
    }

    pub fn with_max_decompressed_size(mut self, bytes: usize) -> Self {
        self.max_decompressed_size = bytes;
        self
    }
}
