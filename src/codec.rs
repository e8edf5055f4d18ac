use crate::error::Error;
use crate::expand::expand_rule_zero;
use crate::grammar::Grammar;
use crate::huffman::{self, Node};
use crate::symbol::SymbolValue;
use ahash::AHashMap as HashMap;
use bit_vec::BitVec;
use std::io::{Read, Write};

const MAGIC: [u8; 4] = [b'W', b'O', b'T', 0x00];

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Builds the unigram histogram (terminal counts and nonterminal usage
/// counts) over every live rule's body, guards excluded.
///
/// Grounded on `wot/codec.py`'s `unigram` pass over the grammar before
/// building the Huffman tree.
fn unigram(grammar: &Grammar) -> HashMap<SymbolValue, u64> {
    let mut hist: HashMap<SymbolValue, u64> = HashMap::default();
    for (_, body) in grammar.rules() {
        for symbol in body {
            *hist.entry(symbol).or_insert(0) += 1;
        }
    }
    hist
}

/// Serializes a grammar to the container format of spec §4.6.
pub fn encode(grammar: &Grammar) -> Vec<u8> {
    let hist = unigram(grammar);
    let max_symbol = grammar.rules().map(|(n, _)| n).max().unwrap_or(0);

    let tree_hist: HashMap<SymbolValue, u64> = hist
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(&k, &v)| (k, v))
        .collect();
    let tree = huffman::build_tree(&tree_hist);
    let code = tree.as_ref().map(huffman::build_code_table).unwrap_or_default();

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    write_u32(&mut out, max_symbol);

    for byte in 0u32..=255 {
        let count = hist.get(&SymbolValue::Terminal(byte as u8)).copied().unwrap_or(0);
        write_u32(&mut out, count as u32);
    }
    for n in 0..=max_symbol {
        let count = hist.get(&SymbolValue::NonTerminal(n)).copied().unwrap_or(0);
        write_u32(&mut out, count as u32);
    }

    let bodies: Vec<(u32, Vec<SymbolValue>)> = grammar.rules().collect();
    let offset_count = bodies.len().saturating_sub(1) as u32;
    write_u32(&mut out, offset_count);

    let mut packed_bodies: Vec<BitVec> = Vec::with_capacity(bodies.len());
    for (_, body) in &bodies {
        let bits = huffman::encode_symbols(body, &code).expect("every body symbol is in the alphabet");
        packed_bodies.push(bits);
    }

    for bits in packed_bodies.iter().take(packed_bodies.len().saturating_sub(1)) {
        let byte_len = (bits.len() + 7) / 8;
        write_u32(&mut out, byte_len as u32);
    }

    for ((_, body), bits) in bodies.iter().zip(packed_bodies.iter()) {
        write_u32(&mut out, body.len() as u32);
        let mut padded = bits.clone();
        while padded.len() % 8 != 0 {
            padded.push(false);
        }
        out.extend_from_slice(&padded.to_bytes());
    }

    out
}

/// Reads one little-endian `u32`, advancing `cursor`.
fn read_u32(bytes: &[u8], cursor: &mut usize, what: &str) -> Result<u32, Error> {
    let end = *cursor + 4;
    let chunk = bytes
        .get(*cursor..end)
        .ok_or_else(|| Error::MalformedArtifact(format!("truncated {what}")))?;
    *cursor = end;
    Ok(u32::from_le_bytes(chunk.try_into().unwrap()))
}

/// Deserializes a grammar from the container format and expands rule 0.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut cursor = 0usize;
    let magic = bytes
        .get(0..4)
        .ok_or_else(|| Error::MalformedArtifact("truncated magic".into()))?;
    if magic != MAGIC {
        log::warn!("rejecting artifact: bad magic bytes {magic:?}");
        return Err(Error::MalformedArtifact(format!("bad magic: {magic:?}")));
    }
    cursor += 4;

    let max_symbol = read_u32(bytes, &mut cursor, "max_symbol")?;

    let mut term_hist = [0u64; 256];
    for slot in term_hist.iter_mut() {
        *slot = read_u32(bytes, &mut cursor, "terminal histogram entry")? as u64;
    }

    let mut nonterm_hist: Vec<u64> = Vec::with_capacity(max_symbol as usize + 1);
    for _ in 0..=max_symbol {
        nonterm_hist.push(read_u32(bytes, &mut cursor, "nonterminal histogram entry")? as u64);
    }

    let offset_count = read_u32(bytes, &mut cursor, "offset_count")? as usize;

    // Only rule 0 may legally have a usage count of zero (P4); every other
    // live rule number appears here because something else in the artifact
    // referenced it.
    let mut live_numbers: Vec<u32> = vec![0];
    for (n, &count) in nonterm_hist.iter().enumerate() {
        let n = n as u32;
        if n != 0 && count > 0 {
            live_numbers.push(n);
        }
    }
    live_numbers.sort_unstable();
    if live_numbers.len() != offset_count + 1 {
        log::warn!(
            "rejecting artifact: offset_count {offset_count} vs. live rule count {}",
            live_numbers.len()
        );
        return Err(Error::HistogramInconsistency(format!(
            "offset_count {offset_count} does not match live rule count {}",
            live_numbers.len()
        )));
    }

    let mut offsets: Vec<u32> = Vec::with_capacity(offset_count);
    for _ in 0..offset_count {
        offsets.push(read_u32(bytes, &mut cursor, "rule offset")?);
    }

    let mut tree_hist: HashMap<SymbolValue, u64> = HashMap::default();
    for (b, &count) in term_hist.iter().enumerate() {
        if count > 0 {
            tree_hist.insert(SymbolValue::Terminal(b as u8), count);
        }
    }
    for (n, &count) in nonterm_hist.iter().enumerate() {
        if count > 0 {
            tree_hist.insert(SymbolValue::NonTerminal(n as u32), count);
        }
    }
    let tree = huffman::build_tree(&tree_hist);

    let mut rule_bodies: HashMap<u32, Vec<SymbolValue>> = HashMap::default();
    for (i, &rule_number) in live_numbers.iter().enumerate() {
        let symbol_count = read_u32(bytes, &mut cursor, "symbol_count")? as usize;
        let packed_len = if i + 1 < live_numbers.len() {
            offsets[i] as usize
        } else {
            bytes.len() - cursor
        };
        let chunk = bytes
            .get(cursor..cursor + packed_len)
            .ok_or_else(|| Error::MalformedArtifact("rule body offset exceeds remaining bytes".into()))?;
        cursor += packed_len;

        let body = if symbol_count == 0 {
            Vec::new()
        } else {
            let tree: &Node = tree
                .as_ref()
                .ok_or_else(|| Error::MalformedArtifact("nonempty body with an empty alphabet".into()))?;
            let bits = BitVec::from_bytes(chunk);
            huffman::decode_symbols(&bits, tree, symbol_count)?
        };

        for symbol in &body {
            if let SymbolValue::NonTerminal(n) = symbol {
                if live_numbers.binary_search(n).is_err() {
                    log::warn!("rejecting artifact: rule {rule_number} references undeclared rule {n}");
                    return Err(Error::UnknownSymbol(format!(
                        "rule {rule_number} references undeclared rule {n}"
                    )));
                }
            }
        }

        rule_bodies.insert(rule_number, body);
    }

    expand_rule_zero(&rule_bodies)
}

/// Buffering wrapper around [`encode`] for byte sinks.
pub fn encode_to_writer<W: Write>(grammar: &Grammar, writer: &mut W) -> Result<(), Error> {
    writer.write_all(&encode(grammar))?;
    Ok(())
}

/// Buffering wrapper around [`decode`] for byte sources.
///
/// Non-goals exclude streaming decode, so the whole artifact is read into
/// memory before decoding, matching `wot/codec.py`'s `decode(istream, ostream)`.
pub fn decode_from_reader<R: Read>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_repetitive_string() {
        let mut g = Grammar::new();
        g.append(b"abracadabraabracadabra");
        let bytes = encode(&g);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, b"abracadabraabracadabra");
    }

    #[test]
    fn roundtrips_empty_input() {
        let g = Grammar::new();
        let bytes = encode(&g);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, Vec::<u8>::new());
    }

    #[test]
    fn roundtrips_single_byte() {
        let mut g = Grammar::new();
        g.append_byte(b'x');
        let bytes = encode(&g);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, vec![b'x']);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut g = Grammar::new();
        g.append(b"aaaa bbbb aaaa");
        assert_eq!(encode(&g), encode(&g));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&Grammar::new());
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::MalformedArtifact(_))));
    }

    #[test]
    fn truncated_artifact_is_rejected() {
        let bytes = encode(&{
            let mut g = Grammar::new();
            g.append(b"aaaa");
            g
        });
        let truncated = &bytes[..bytes.len() - 2];
        assert!(decode(truncated).is_err());
    }
}
