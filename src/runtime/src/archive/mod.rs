//! Appliance archive access.
//!
//! ```text
//! location ──► ByteSource ──► (local file | RemoteFetch) ──► TapeArchive
//!                                                              │
//!                                        open("*.ovf") ◄───────┘
//!                                        ArchiveEntry (bounded reader)
//! ```

mod http;
mod source;
mod tape;

pub use http::HttpFetcher;
pub use source::{ByteSource, ByteStream, Location, RemoteFetch};
pub use tape::{ArchiveEntry, MemberInfo, TapeArchive};
