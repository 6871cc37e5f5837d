//! Minimal contract-call encoding.
//!
//! Calls are encoded as a 4-byte Keccak-256 selector followed by 32-byte
//! words. Dynamic values (`bytes`, arrays) go into a tail section and are
//! referenced from the head by byte offset.

use arbiter_types::{Address, Hash};
use sha3::{Digest, Keccak256};

/// One 32-byte ABI word.
pub type Word = [u8; 32];

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Function selector for a canonical signature such as `"approveHash(bytes32)"`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// A value to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A static value occupying one word.
    Word(Word),
    /// Dynamic byte string.
    Bytes(Vec<u8>),
    /// Dynamic array. Elements may themselves be dynamic.
    Array(Vec<Token>),
}

impl Token {
    pub fn address(addr: &Address) -> Self {
        Token::Word(addr.to_word())
    }

    pub fn hash(hash: &Hash) -> Self {
        Token::Word(hash.to_bytes())
    }

    pub fn uint(value: u128) -> Self {
        Token::Word(uint_word(value))
    }

    pub fn bool(value: bool) -> Self {
        Token::uint(value as u128)
    }

    fn is_dynamic(&self) -> bool {
        !matches!(self, Token::Word(_))
    }

    fn tail(&self) -> Vec<u8> {
        match self {
            Token::Word(word) => word.to_vec(),
            Token::Bytes(bytes) => {
                let mut out = uint_word(bytes.len() as u128).to_vec();
                out.extend_from_slice(bytes);
                out.resize(32 + padded_len(bytes.len()), 0);
                out
            }
            Token::Array(items) => {
                let mut out = uint_word(items.len() as u128).to_vec();
                out.extend_from_slice(&encode_tokens(items));
                out
            }
        }
    }
}

/// Big-endian left-padded unsigned integer word.
pub fn uint_word(value: u128) -> Word {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(32) * 32
}

/// Encode `tokens` behind the selector for `signature`.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode_tokens(tokens));
    out
}

/// Head/tail encoding of a token list (no selector).
pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            tail.extend_from_slice(&token.tail());
        } else {
            head.extend_from_slice(&token.tail());
        }
    }

    head.extend_from_slice(&tail);
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256) is the canonical ERC-20 example.
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_static_tokens_are_inline() {
        let encoded = encode_tokens(&[Token::uint(1), Token::bool(true)]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 1);
        assert_eq!(encoded[63], 1);
    }

    #[test]
    fn test_dynamic_bytes_offset_and_padding() {
        let encoded = encode_tokens(&[Token::uint(7), Token::Bytes(vec![0xAA; 33])]);
        // head: 2 words, tail: length word + 64 bytes of padded data
        assert_eq!(encoded.len(), 64 + 32 + 64);
        assert_eq!(encoded[32..64], uint_word(64));
        assert_eq!(encoded[64..96], uint_word(33));
        assert_eq!(encoded[96 + 32], 0xAA);
        assert_eq!(encoded[96 + 33], 0);
    }

    #[test]
    fn test_two_dynamic_tokens() {
        let encoded = encode_tokens(&[
            Token::Bytes(vec![1, 2, 3]),
            Token::Array(vec![Token::uint(5), Token::uint(6)]),
        ]);
        assert_eq!(encoded[0..32], uint_word(64));
        // first tail entry: length word + one padded word
        assert_eq!(encoded[32..64], uint_word(128));
        assert_eq!(encoded[128..160], uint_word(2));
        assert_eq!(encoded[160..192], uint_word(5));
    }

    #[test]
    fn test_array_of_bytes() {
        let encoded = encode_tokens(&[Token::Array(vec![
            Token::Bytes(vec![1]),
            Token::Bytes(vec![2]),
        ])]);
        // offset, length, two element offsets, two (length, data) pairs
        assert_eq!(encoded.len(), 32 * 8);
        assert_eq!(encoded[32..64], uint_word(2));
        assert_eq!(encoded[64..96], uint_word(64));
        assert_eq!(encoded[96..128], uint_word(128));
    }
}
