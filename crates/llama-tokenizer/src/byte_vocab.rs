//! Byte-level reference vocabulary.
//!
//! - Ids `0..=255` are raw bytes
//! - `256` is `<s>` (begin), `257` is `</s>` (end / stop)
//! - Lossless: any UTF-8 text round-trips through its byte tokens
//! - Deterministic, no training data required

use llama_engine::{TokenId, Vocab};

const BOS_TEXT: &str = "<s>";
const EOS_TEXT: &str = "</s>";

/// Vocabulary of 256 byte tokens plus begin / end markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteVocab;

impl ByteVocab {
    pub const BOS: TokenId = 256;
    pub const EOS: TokenId = 257;
    pub const SIZE: usize = 258;

    pub fn new() -> Self {
        Self
    }

    fn encode(text: &str, add_special: bool, parse_special: bool) -> Vec<TokenId> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special {
            ids.push(Self::BOS);
        }

        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if parse_special {
                let rest = &bytes[i..];
                if rest.starts_with(BOS_TEXT.as_bytes()) {
                    ids.push(Self::BOS);
                    i += BOS_TEXT.len();
                    continue;
                }
                if rest.starts_with(EOS_TEXT.as_bytes()) {
                    ids.push(Self::EOS);
                    i += EOS_TEXT.len();
                    continue;
                }
            }
            ids.push(TokenId::from(bytes[i]));
            i += 1;
        }
        ids
    }
}

impl Vocab for ByteVocab {
    fn n_tokens(&self) -> usize {
        Self::SIZE
    }

    fn bos(&self) -> TokenId {
        Self::BOS
    }

    fn eos(&self) -> TokenId {
        Self::EOS
    }

    fn tokenize(
        &self,
        text: &str,
        tokens: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32 {
        let ids = Self::encode(text, add_special, parse_special);
        let Ok(n) = i32::try_from(ids.len()) else {
            return i32::MIN;
        };
        if ids.len() > tokens.len() {
            return -n;
        }
        tokens[..ids.len()].copy_from_slice(&ids);
        n
    }

    fn token_to_piece(&self, token: TokenId, buf: &mut [u8], special: bool) -> i32 {
        let piece: &[u8] = match token {
            Self::BOS if special => BOS_TEXT.as_bytes(),
            Self::EOS if special => EOS_TEXT.as_bytes(),
            Self::BOS | Self::EOS => &[],
            0..=255 => {
                if buf.is_empty() {
                    return -1;
                }
                buf[0] = token as u8;
                return 1;
            }
            _ => &[],
        };
        if piece.len() > buf.len() {
            return -(piece.len() as i32);
        }
        buf[..piece.len()].copy_from_slice(piece);
        piece.len() as i32
    }
}
