use crate::error::Error;
use crate::symbol::SymbolValue;
use ahash::AHashMap as HashMap;

/// Expands rule 0 of a decoded grammar (rule number -> body) to bytes.
///
/// Grounded on the teacher's `SequiturIter` (an explicit-stack walk of the
/// live symbol graph), adapted to walk a decoded rule table instead of the
/// engine's own arena, per spec §4.7. Every rule whose body is entirely
/// terminal is memoized into a precomputed byte string up front; mixed
/// bodies are expanded afresh on each visit.
pub(crate) fn expand_rule_zero(rule_bodies: &HashMap<u32, Vec<SymbolValue>>) -> Result<Vec<u8>, Error> {
    let mut terminal_memo: HashMap<u32, Vec<u8>> = HashMap::default();
    for (&number, body) in rule_bodies.iter() {
        if body.iter().all(|s| matches!(s, SymbolValue::Terminal(_))) {
            let bytes: Vec<u8> = body
                .iter()
                .map(|s| match s {
                    SymbolValue::Terminal(b) => *b,
                    SymbolValue::NonTerminal(_) => unreachable!("filtered to terminal-only bodies"),
                })
                .collect();
            terminal_memo.insert(number, bytes);
        }
    }

    let root = rule_bodies
        .get(&0)
        .ok_or_else(|| Error::UnknownSymbol("rule 0 missing from decoded artifact".into()))?;

    let mut out = Vec::new();
    let mut stack: Vec<SymbolValue> = root.iter().rev().copied().collect();
    while let Some(symbol) = stack.pop() {
        match symbol {
            SymbolValue::Terminal(b) => out.push(b),
            SymbolValue::NonTerminal(n) => {
                if let Some(bytes) = terminal_memo.get(&n) {
                    out.extend_from_slice(bytes);
                } else {
                    let body = rule_bodies
                        .get(&n)
                        .ok_or_else(|| Error::UnknownSymbol(format!("undeclared rule {n}")))?;
                    stack.extend(body.iter().rev().copied());
                }
            }
        }
    }
    Ok(out)
}
