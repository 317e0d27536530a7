mod header;
mod reader;
pub mod writer;

pub use header::{
    ChromEntry, Directory, FileHeader, PairEntry, DEFAULT_MCV, FORMAT_VERSION, OFFSET_ASSEMBLY,
    OFFSET_HEADER_SIZE, OFFSET_INTER_DIR, OFFSET_INTRA_DIR, SIZE_VERSION_FIELD,
};
pub use reader::{BinRange, ButlrReader, CoordinateUnit, DenseMatrix};
pub use writer::{encode_manifest, ButlrWriter, ButlrWriterBuilder, EncodeOptions};
