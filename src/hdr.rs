// NETBENCH HDR LOG READER
// THE BENCHMARK BINARIES WRITE HdrHistogram INTERVAL LOGS (*.hdr): CSV LINES
// WHOSE LAST FIELD IS A BASE64 "HIST..." V2-DEFLATE TOKEN. DECODING AND BUCKET
// MATH BELONG TO THE hdrhistogram CRATE; THIS FILE ONLY FINDS THE TOKENS.
//
// VALUES ARE IN THE UNIT THE PRODUCER RECORDED (NANOSECONDS FOR NETBENCH).

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hdrhistogram::serialization::Deserializer;

use crate::error::{Error, Result};

pub type Histogram = hdrhistogram::Histogram<u64>;

// THE HISTOGRAM TOKEN ON ONE LOG LINE, IF ANY. COMMENT AND HEADER LINES YIELD None.
pub fn extract_token(line: &str) -> Option<&str> {
    let s = line.trim();
    if s.is_empty() || s.starts_with('#') {
        return None;
    }
    let field = s
        .split(',')
        .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\''))
        .find(|t| t.starts_with("HIST"));
    match field {
        Some(t) => Some(t),
        None => s.find("HIST").map(|i| s[i..].trim().trim_end_matches(',')),
    }
}

pub fn decode_token(token: &str) -> Result<Histogram> {
    let raw = STANDARD
        .decode(token.trim())
        .map_err(|e| Error::Histogram(format!("bad base64: {}", e)))?;
    Deserializer::new()
        .deserialize(&mut raw.as_slice())
        .map_err(|e| Error::Histogram(e.to_string()))
}

// ADDS `other` INTO `into`, GROWING `into` WHEN `other` TRACKS LARGER VALUES
pub fn merge(into: &mut Histogram, other: &Histogram) -> Result<()> {
    into.auto(true);
    into.add(other).map_err(|e| Error::Histogram(e.to_string()))
}

// LAST DECODABLE HISTOGRAM IN A LOG FILE. UNDECODABLE TOKENS ARE SKIPPED.
pub fn read_last(path: &Path) -> Result<Option<Histogram>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let mut last = None;
    for token in text.lines().filter_map(extract_token) {
        match decode_token(token) {
            Ok(h) => last = Some(h),
            Err(e) => tracing::debug!(path = %path.display(), "skipping token: {}", e),
        }
    }
    Ok(last)
}
