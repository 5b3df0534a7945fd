//! 24-hex-digit identifiers: 4 bytes of Unix seconds, 5 bytes of per-process
//! randomness, 3 bytes of a wrapping counter. Time sits in the high bits so
//! identifiers sort roughly chronologically.

use crate::error::{MdfError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use time::OffsetDateTime;

const COUNTER_MASK: u32 = 0x00ff_ffff;

static GLOBAL: OnceLock<IdMinter> = OnceLock::new();

#[derive(Debug)]
pub struct IdMinter {
    process: [u8; 5],
    counter: AtomicU32,
}

impl IdMinter {
    /// Seed a new minter from the OS entropy source.
    pub fn new() -> Result<Self> {
        let mut seed = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| MdfError::Entropy(e.to_string()))?;
        let mut process = [0u8; 5];
        process.copy_from_slice(&seed[..5]);
        let start = u32::from_be_bytes([0, seed[5], seed[6], seed[7]]);
        Ok(Self { process, counter: AtomicU32::new(start) })
    }

    /// The process-wide minter, created on first use.
    pub fn global() -> Result<&'static IdMinter> {
        if let Some(m) = GLOBAL.get() {
            return Ok(m);
        }
        let minter = IdMinter::new()?;
        Ok(GLOBAL.get_or_init(|| minter))
    }

    pub fn next_id(&self) -> String {
        let secs = OffsetDateTime::now_utc().unix_timestamp().clamp(0, u32::MAX as i64) as u32;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);

        let mut out = String::with_capacity(24);
        for b in bytes {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

/// Time component of an identifier, if it is well-formed.
pub fn id_timestamp(id: &str) -> Option<OffsetDateTime> {
    if id.len() != 24 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let secs = u32::from_str_radix(&id[..8], 16).ok()?;
    OffsetDateTime::from_unix_timestamp(secs as i64).ok()
}
