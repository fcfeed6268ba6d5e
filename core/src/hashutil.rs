//! Incremental digest for deriving stable, content-addressed identifiers.
//!
//! Writes are length-prefixed or presence-tagged so that adjacent fields
//! cannot alias one another. The digest must be identical across reloads and
//! across processes; only fixed-width little-endian encodings are used.

use xxhash_rust::xxh3::Xxh3;

/// A streaming xxh3 digest with field-framing helpers.
#[derive(Default)]
pub struct Digest(Xxh3);

// === impl Digest ===

impl Digest {
    pub fn new() -> Self {
        Self(Xxh3::new())
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn write_str_with_len(&mut self, s: &str) {
        self.0.update(&(s.len() as u64).to_le_bytes());
        self.0.update(s.as_bytes());
    }

    pub fn write_opt_str_with_len(&mut self, s: Option<&str>) {
        match s {
            None => self.0.update(&[0]),
            Some(s) => {
                self.0.update(&[1]);
                self.write_str_with_len(s);
            }
        }
    }

    pub fn write_bool(&mut self, v: bool) {
        self.0.update(&[v as u8]);
    }

    pub fn write_opt_bool(&mut self, v: Option<bool>) {
        match v {
            None => self.0.update(&[0]),
            Some(v) => {
                self.0.update(&[1]);
                self.write_bool(v);
            }
        }
    }

    pub fn write_i32(&mut self, v: i32) {
        self.0.update(&v.to_le_bytes());
    }

    pub fn write_opt_i32(&mut self, v: Option<i32>) {
        match v {
            None => self.0.update(&[0]),
            Some(v) => {
                self.0.update(&[1]);
                self.write_i32(v);
            }
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        self.0.update(&v.to_le_bytes());
    }

    pub fn write_opt_u32(&mut self, v: Option<u32>) {
        match v {
            None => self.0.update(&[0]),
            Some(v) => {
                self.0.update(&[1]);
                self.write_u32(v);
            }
        }
    }

    /// Finalizes the digest, returning the lowercase hex encoding of its
    /// 8-byte finalization.
    pub fn finish(&self) -> String {
        hex::encode(self.0.digest().to_be_bytes())
    }
}
