//! Reversible scrambling for stored records.
//!
//! This is NOT encryption. The key is a compile-time constant and the
//! transform is a repeating XOR followed by base64, so anyone with this
//! source can reverse it. It only keeps records from being trivially
//! readable or hand-edited in a storage inspector. It gives no
//! confidentiality and no integrity guarantee.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const KEY: &[u8] = b"pixshop-session-v1";

#[derive(Debug, thiserror::Error)]
pub enum UnscrambleError {
    #[error("record is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("record is not valid UTF-8 after unscrambling")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn scramble(plain: &str) -> String {
    STANDARD.encode(xor(plain.as_bytes()))
}

pub fn unscramble(scrambled: &str) -> Result<String, UnscrambleError> {
    let bytes = STANDARD.decode(scrambled.trim())?;
    Ok(String::from_utf8(xor(&bytes))?)
}

fn xor(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .zip(KEY.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}
