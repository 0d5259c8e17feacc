//! Write-Ahead Log (WAL) for BraidDB.
//!
//! Provides durability by logging every mutation before it is applied in
//! memory. Supports crash recovery through forward log replay with
//! per-record CRC verification.

pub mod constants;
pub mod reader;
pub mod record;
pub mod writer;

pub use reader::WalReader;
pub use record::{WalRecord, WalRecordType};
pub use writer::WalWriter;
