/// Custom Result type for butlr operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the butlr library, encompassing all possible error
/// cases that can occur while encoding or decoding BUTLR files.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to the file header and directories
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Errors that occur during write operations
    #[error("Error writing file: {0}")]
    WriteError(#[from] WriteError),

    /// Errors that occur during read operations
    #[error("Error reading file: {0}")]
    ReadError(#[from] ReadError),

    /// Errors raised while resolving a user query against a file
    #[error("Error resolving query: {0}")]
    QueryError(#[from] QueryError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Errors specific to parsing and validating BUTLR headers and directories
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The version string does not fit the fixed 16-byte field
    #[error("Version string too long for 16 byte field: {0:?}")]
    VersionTooLong(String),

    /// A string field is not NUL-terminated within the header region
    #[error("Unterminated string in header at byte offset {0}")]
    UnterminatedString(usize),

    /// A string field contains a byte outside 7-bit ASCII
    #[error("Non-ASCII byte in header string at byte offset {0}")]
    NonAsciiString(usize),

    /// A directory offset points outside the header region
    #[error("Impossible directory offset {offset} (header size {header_size})")]
    ImpossibleOffset { offset: u32, header_size: u32 },

    /// A directory entry extends past the end of its directory region
    #[error("Truncated directory entry at byte offset {0}")]
    TruncatedDirectory(usize),

    /// A pair entry key does not contain exactly one tab separator
    #[error("Malformed pair key in directory: {0:?}")]
    MalformedPairKey(String),

    /// A pair entry is stored in a non-canonical orientation
    #[error("Pair {row:?}/{col:?} stored in non-canonical orientation")]
    NonCanonicalPair { row: String, col: String },
}

/// Errors that can occur while reading BUTLR data
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being read is not a regular file
    #[error("File is not regular")]
    IncompatibleFile,

    /// A read reached past the end of the file
    #[error("Read past end of file at byte offset {0} - possibly truncated")]
    Truncated(usize),

    /// The file is too small to contain the fixed header prefix
    #[error("File too small for a BUTLR header: {0} bytes")]
    TooSmall(usize),

    /// A row index beyond the end of a matrix row-offset table was requested
    #[error("Row {requested} out of range for matrix with {rows} rows")]
    RowOutOfRange { requested: u32, rows: u32 },

    /// A row-offset table violates the format invariants
    #[error("Invalid row-offset table entry at row {row}: {reason}")]
    InvalidRowOffset { row: u32, reason: &'static str },
}

/// Errors that can occur while writing BUTLR data
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A chromosome named by the manifest is missing from the genome table
    #[error("Unknown chromosome referenced: {0:?}")]
    UnknownChromosome(String),

    /// A bin index derived from a source coordinate is out of range
    #[error("Bin {bin} out of range for {chrom:?} with {bins} bins")]
    BinOutOfRange { chrom: String, bin: u32, bins: u32 },

    /// Duplicate sparse cell within one matrix
    #[error("Duplicate cell at (row {row}, col {col})")]
    DuplicateCell { row: u32, col: u32 },

    /// A dense source matrix has fewer columns than the bin count requires
    #[error("Dense matrix row {row} has {got} data columns, expected at least {expected}")]
    TooFewColumns {
        row: usize,
        got: usize,
        expected: usize,
    },

    /// A dense source matrix has fewer rows than the bin count requires
    #[error("Dense matrix has {got} data rows, expected at least {expected}")]
    TooFewRows { got: usize, expected: usize },

    /// A manifest line does not have two or three tab-separated fields
    #[error("Malformed manifest line {line}: {content:?}")]
    MalformedManifestLine { line: usize, content: String },

    /// The same matrix key appears twice in a manifest
    #[error("Duplicate manifest entry for {0:?}")]
    DuplicateManifestEntry(String),

    /// A coordinate-list line is missing one of the configured columns
    #[error("Coordinate line {line} of {path:?} is missing column {column}")]
    MissingColumn {
        path: String,
        line: usize,
        column: usize,
    },

    /// A coordinate-list position failed to parse as a base-pair offset
    #[error("Malformed coordinate on line {line} of {path:?}: {token:?}")]
    MalformedCoordinate {
        path: String,
        line: usize,
        token: String,
    },

    /// A genome size file entry failed to parse
    #[error("Malformed genome size entry on line {line}: {content:?}")]
    MalformedGenomeEntry { line: usize, content: String },

    /// A whole-genome dense matrix region label failed to parse
    #[error("Malformed region label on line {line}: {content:?}")]
    MalformedRegionLabel { line: usize, content: String },

    /// Matrices were handed to the writer out of directory order
    #[error("Matrix {got:?} written out of order, expected {expected:?}")]
    OutOfOrder { expected: String, got: String },

    /// The writer was closed before every directory entry was written
    #[error("Writer finished with {0} directory entries still unwritten")]
    MissingBodies(usize),

    /// An invalid resolution string was supplied
    #[error("Invalid resolution: {0:?}")]
    InvalidResolution(String),
}

/// Errors raised while resolving a user query against a BUTLR file
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The requested chromosome is not present in the file directory
    #[error("Chromosome {0:?} not present in file")]
    UnknownChromosome(String),

    /// The requested pair is not present in the inter directory
    #[error("Pair {0:?}/{1:?} not present in file")]
    UnknownPair(String, String),

    /// The requested range is inverted
    #[error("Invalid range: start {start} is greater than end {end}")]
    InvalidRange { start: u64, end: u64 },

    /// A requested bin is outside the chromosome
    #[error("Bin {bin} out of range for {chrom:?} with {bins} bins")]
    BinOutOfRange { chrom: String, bin: u32, bins: u32 },

    /// A location string failed to parse
    #[error("Malformed location: {0:?}")]
    MalformedLocation(String),
}
