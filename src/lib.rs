//! # wot - grammar-based compression
//!
//! An online Sequitur grammar engine paired with a canonical Huffman coder,
//! producing a compact self-describing artifact:
//!
//! - **Sequitur** ([`Grammar`]): incremental context-free grammar induction,
//!   maintaining digram uniqueness and rule utility on every byte appended.
//! - **Huffman coding**: the grammar's rule bodies are packed with a
//!   canonical, deterministically tie-broken code so encoder and decoder
//!   always agree on the tree without transmitting it.
//! - **Container format**: [`encode`]/[`decode`] serialize a grammar to and
//!   from the wire format described in the crate's design notes.
//!
//! ## Example
//!
//! ```
//! use wot::Grammar;
//!
//! let mut grammar = wot::new_grammar();
//! grammar.append(b"abracadabraabracadabra");
//!
//! let artifact = wot::encode(&grammar);
//! let decoded = wot::decode(&artifact).unwrap();
//! assert_eq!(decoded, b"abracadabraabracadabra");
//! ```

mod codec;
mod digram;
mod error;
mod expand;
mod grammar;
mod huffman;
mod rule;
mod symbol;

#[cfg(test)]
mod tests;

pub use codec::{decode, decode_from_reader, encode, encode_to_writer};
pub use error::Error;
pub use grammar::Grammar;
pub use symbol::SymbolValue;

/// Constructs an empty grammar. Equivalent to `Grammar::new()`.
pub fn new_grammar() -> Grammar {
    Grammar::new()
}
