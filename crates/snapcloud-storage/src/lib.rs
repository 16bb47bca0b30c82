// Snap!Cloud Storage - versioned project blobs and document parsing

pub mod blob;
pub mod document;
pub mod error;

pub use blob::{ArtifactKind, BlobStore, Slot, SlotInfo};
pub use document::{
    decode_data_url, encode_data_url, DocumentParser, ParsedDocument, XmlDocumentParser,
};
pub use error::{StorageError, StorageResult};
