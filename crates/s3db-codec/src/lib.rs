//! s3db-codec - The Codec Stack (spec §4.2).
//!
//! Turns a validated JSON record into the metadata/body pair an S3
//! object actually stores, and back. Field encryption, compression and
//! the overflow-behavior decision all live here, one layer above the
//! [`s3db_schema`] attribute model and one layer below [`s3db_blob`]'s
//! object operations.

pub mod codec;
pub mod compress;
pub mod crypto;
pub mod flatten;

pub use codec::{decode, encode, expand_metadata, reserved, Behavior, DecodedRecord, EncodedRecord};
pub use crypto::CryptoError;
pub use flatten::{flatten, unflatten};
