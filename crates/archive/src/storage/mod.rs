//! On-disk archive layout
//!
//! Messages are stored as individual files in maildir directories, either a
//! single maildir at the archive root or one maildir per calendar partition.

mod maildir;

pub use maildir::{Archive, MAILDIR_SUFFIX, Maildir, filename_for, parse_id, write_atomically};
