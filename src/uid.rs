//! Unique Identifier Generator
//!
//! Each execution context owns its own [`IdGenerator`]; nothing is locked.
//! An identifier is made of three 64-bit words rendered in reverse-nibble hex:
//!
//! - a sequence counter local to the generator
//! - the creation time of the generator (nanoseconds since the epoch)
//! - a context word taken from a process-wide atomic counter
//!
//! Each word is XORed with a random operand fixed for the process, so values
//! from different processes do not line up. The context word alone makes two
//! generators in the same process disjoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::config::{IdConfig, DEFAULT_HOST_SUFFIX};

/// Prefix of generated multipart boundaries
pub const BOUNDARY_PREFIX: &str = "MIMEBoundary_";

/// Longest boundary allowed by RFC 2046
pub const MAX_BOUNDARY_LEN: usize = 70;

struct Operands {
    context: u64,
    start_time: u64,
    seq: u64,
}

static OPERANDS: Lazy<Operands> = Lazy::new(|| Operands {
    context: rand::random(),
    start_time: rand::random(),
    seq: rand::random(),
});

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

/// Per-context identifier generator
#[derive(Debug)]
pub struct IdGenerator {
    context: u64,
    start_time: u64,
    seq: u64,
    host_suffix: String,
}

impl IdGenerator {
    /// Create a generator using the default content ID suffix
    pub fn new() -> Self {
        Self::with_host_suffix(DEFAULT_HOST_SUFFIX)
    }

    /// Create a generator from configuration
    pub fn from_config(config: &IdConfig) -> Self {
        Self::with_host_suffix(&config.host_suffix)
    }

    pub fn with_host_suffix(host_suffix: &str) -> Self {
        let operands = &*OPERANDS;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        IdGenerator {
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed) ^ operands.context,
            start_time: nanos ^ operands.start_time,
            seq: 0,
            host_suffix: host_suffix.to_string(),
        }
    }

    fn write_hex(&mut self, out: &mut String) {
        let seq = self.seq ^ OPERANDS.seq;
        self.seq = self.seq.wrapping_add(1);
        write_reverse_hex(seq, out);
        write_reverse_hex(self.start_time, out);
        write_reverse_hex(self.context, out);
    }

    /// Generate a content ID of the form `<hex>@<host-suffix>`
    pub fn generate_id(&mut self) -> String {
        let mut out = String::with_capacity(49 + self.host_suffix.len());
        self.write_hex(&mut out);
        out.push('@');
        out.push_str(&self.host_suffix);
        out
    }

    /// Generate a multipart boundary (at most 70 characters of `[A-Za-z0-9_]`)
    pub fn generate_boundary(&mut self) -> String {
        let mut out = String::with_capacity(BOUNDARY_PREFIX.len() + 48);
        out.push_str(BOUNDARY_PREFIX);
        self.write_hex(&mut out);
        debug_assert!(out.len() <= MAX_BOUNDARY_LEN);
        out
    }

    /// Generate a bare 48 character hex identifier
    pub fn generate_uid(&mut self) -> String {
        let mut out = String::with_capacity(48);
        self.write_hex(&mut out);
        out
    }

    /// Generate a random `urn:uuid:` URN
    pub fn generate_urn(&self) -> String {
        format!("urn:uuid:{}", uuid::Uuid::new_v4())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn write_reverse_hex(value: u64, out: &mut String) {
    for i in 0..16 {
        let n = ((value >> (4 * i)) & 0xF) as u8;
        out.push(if n < 10 { (b'0' + n) as char } else { (b'a' + n - 10) as char });
    }
}

/// Generators keyed by worker id, for schedulers where a logical task is
/// not tied to one thread
#[derive(Debug, Default)]
pub struct IdGeneratorPool {
    generators: Vec<IdGenerator>,
    host_suffix: Option<String>,
}

impl IdGeneratorPool {
    pub fn new(workers: usize) -> Self {
        IdGeneratorPool {
            generators: (0..workers).map(|_| IdGenerator::new()).collect(),
            host_suffix: None,
        }
    }

    pub fn from_config(workers: usize, config: &IdConfig) -> Self {
        IdGeneratorPool {
            generators: (0..workers).map(|_| IdGenerator::from_config(config)).collect(),
            host_suffix: Some(config.host_suffix.clone()),
        }
    }

    /// Generator owned by `worker`, created on first use
    pub fn generator(&mut self, worker: usize) -> &mut IdGenerator {
        while self.generators.len() <= worker {
            let generator = match &self.host_suffix {
                Some(suffix) => IdGenerator::with_host_suffix(suffix),
                None => IdGenerator::new(),
            };
            self.generators.push(generator);
        }
        &mut self.generators[worker]
    }

    /// Split into one generator per worker, e.g. to move them into tasks
    pub fn into_generators(self) -> Vec<IdGenerator> {
        self.generators
    }
}
