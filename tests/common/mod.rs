use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Encodes one line of the object body: base64(gzip(json)).
pub fn encode_line(json: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    let gz = encoder.finish().unwrap();
    BASE64.encode(gz)
}

pub fn object_body(bundles_json: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for json in bundles_json {
        out.push_str(&encode_line(json));
        out.push('\n');
    }
    out.into_bytes()
}
