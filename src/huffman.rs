use crate::error::Error;
use crate::symbol::SymbolValue;
use ahash::AHashMap as HashMap;
use bit_vec::BitVec;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Deterministic tie-break key for Huffman tree construction.
///
/// Mirrors the histogram key ordering (`SymbolValue`'s derived `Ord`:
/// terminals before nonterminals, terminals by byte value, nonterminals by
/// number) and extends it to internal nodes by composing their childrens'
/// keys, so two subtrees with equal weight still compare deterministically
/// no matter how deep the merge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum OrderKey {
    Leaf(SymbolValue),
    Pair(Box<OrderKey>, Box<OrderKey>),
}

/// A node of the prefix-coding tree.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Leaf(SymbolValue),
    Internal(Box<Node>, Box<Node>),
}

/// Builds a canonical Huffman tree from a unigram histogram.
///
/// Returns `None` for an empty histogram (the empty-input case, spec
/// scenario 5). A histogram with a single distinct symbol is wrapped as one
/// `Internal` node with two identical leaves, so [`decode_symbols`]'s
/// tree-walk loop never needs a zero-length-code special case.
pub(crate) fn build_tree(hist: &HashMap<SymbolValue, u64>) -> Option<Node> {
    let mut nodes: Vec<Option<Node>> = Vec::new();
    let mut heap: BinaryHeap<Reverse<(u64, OrderKey, usize)>> = BinaryHeap::new();

    let mut entries: Vec<(SymbolValue, u64)> = hist.iter().map(|(&v, &c)| (v, c)).collect();
    entries.sort();
    for (value, count) in entries {
        let idx = nodes.len();
        nodes.push(Some(Node::Leaf(value)));
        heap.push(Reverse((count, OrderKey::Leaf(value), idx)));
    }

    if nodes.is_empty() {
        return None;
    }
    if nodes.len() == 1 {
        let leaf = nodes[0].take().unwrap();
        let value = match &leaf {
            Node::Leaf(v) => *v,
            Node::Internal(..) => unreachable!("freshly built leaves only"),
        };
        return Some(Node::Internal(Box::new(leaf), Box::new(Node::Leaf(value))));
    }

    while heap.len() > 1 {
        let Reverse((c1, o1, i1)) = heap.pop().expect("heap has at least two entries");
        let Reverse((c2, o2, i2)) = heap.pop().expect("heap has at least two entries");
        let left = nodes[i1].take().expect("each heap index is consumed once");
        let right = nodes[i2].take().expect("each heap index is consumed once");
        let idx = nodes.len();
        nodes.push(Some(Node::Internal(Box::new(left), Box::new(right))));
        heap.push(Reverse((c1 + c2, OrderKey::Pair(Box::new(o1), Box::new(o2)), idx)));
    }

    let Reverse((_, _, idx)) = heap.pop().expect("loop invariant: exactly one entry remains");
    nodes[idx].take()
}

/// Walks a tree to build the `symbol -> code` map used by the encoder.
pub(crate) fn build_code_table(tree: &Node) -> HashMap<SymbolValue, BitVec> {
    let mut table = HashMap::default();
    let mut path = BitVec::new();
    walk(tree, &mut path, &mut table);
    return table;

    fn walk(node: &Node, path: &mut BitVec, table: &mut HashMap<SymbolValue, BitVec>) {
        match node {
            Node::Leaf(v) => {
                table.insert(*v, path.clone());
            }
            Node::Internal(left, right) => {
                path.push(false);
                walk(left, path, table);
                path.pop();
                path.push(true);
                walk(right, path, table);
                path.pop();
            }
        }
    }
}

/// Encodes a sequence of symbols as a packed bit stream using `code`.
pub(crate) fn encode_symbols(
    symbols: &[SymbolValue],
    code: &HashMap<SymbolValue, BitVec>,
) -> Result<BitVec, Error> {
    let mut out = BitVec::new();
    for sym in symbols {
        let bits = code
            .get(sym)
            .ok_or_else(|| Error::UnknownSymbol(format!("{sym:?}")))?;
        for bit in bits.iter() {
            out.push(bit);
        }
    }
    Ok(out)
}

/// Decodes exactly `count` symbols from `bits` by walking `tree`.
pub(crate) fn decode_symbols(bits: &BitVec, tree: &Node, count: usize) -> Result<Vec<SymbolValue>, Error> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = 0usize;
    while out.len() < count {
        let mut node = tree;
        loop {
            match node {
                Node::Leaf(v) => {
                    out.push(*v);
                    break;
                }
                Node::Internal(left, right) => {
                    let bit = bits.get(cursor).ok_or_else(|| {
                        Error::MalformedArtifact(
                            "bit stream ended before the declared symbol count was reached".into(),
                        )
                    })?;
                    cursor += 1;
                    node = if bit { right } else { left };
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(pairs: &[(SymbolValue, u64)]) -> HashMap<SymbolValue, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_histogram_has_no_tree() {
        assert!(build_tree(&HashMap::default()).is_none());
    }

    #[test]
    fn single_symbol_gets_a_usable_one_bit_code() {
        let h = hist(&[(SymbolValue::Terminal(b'a'), 5)]);
        let tree = build_tree(&h).unwrap();
        let code = build_code_table(&tree);
        let encoded = encode_symbols(&[SymbolValue::Terminal(b'a'); 3], &code).unwrap();
        let decoded = decode_symbols(&encoded, &tree, 3).unwrap();
        assert_eq!(decoded, vec![SymbolValue::Terminal(b'a'); 3]);
    }

    #[test]
    fn roundtrip_preserves_symbol_order() {
        let symbols = vec![
            SymbolValue::Terminal(b'a'),
            SymbolValue::Terminal(b'b'),
            SymbolValue::NonTerminal(1),
            SymbolValue::Terminal(b'a'),
            SymbolValue::NonTerminal(1),
        ];
        let mut h: HashMap<SymbolValue, u64> = HashMap::default();
        for s in &symbols {
            *h.entry(*s).or_insert(0) += 1;
        }
        let tree = build_tree(&h).unwrap();
        let code = build_code_table(&tree);
        let encoded = encode_symbols(&symbols, &code).unwrap();
        let decoded = decode_symbols(&encoded, &tree, symbols.len()).unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let h = hist(&[(SymbolValue::Terminal(b'a'), 1)]);
        let tree = build_tree(&h).unwrap();
        let code = build_code_table(&tree);
        let err = encode_symbols(&[SymbolValue::Terminal(b'z')], &code).unwrap_err();
        assert!(matches!(err, Error::UnknownSymbol(_)));
    }
}
