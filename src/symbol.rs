use slotmap::DefaultKey;

/// Symbol types in the Sequitur grammar.
///
/// Replaces the original inheritance hierarchy (`Terminal`/`NonTerminal`/`Guard`)
/// with an enum for zero-cost abstraction. Unlike the teacher crate, a rule's
/// sentinel is a single circular `Guard` node rather than a head/tail pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    /// A terminal symbol: one byte of input.
    Terminal(u8),

    /// A reference to a rule (non-terminal).
    NonTerminal(u32),

    /// The circular sentinel marking a rule's start/end. Carries the rule's
    /// own number so a guard can be mapped back to its owning rule.
    Guard(u32),
}

impl Symbol {
    /// Returns this symbol's digram/histogram key, or `None` for a guard.
    ///
    /// Guards never participate in digram matching (invariant I4).
    #[inline]
    pub(crate) fn value(&self) -> Option<SymbolValue> {
        match *self {
            Symbol::Terminal(b) => Some(SymbolValue::Terminal(b)),
            Symbol::NonTerminal(n) => Some(SymbolValue::NonTerminal(n)),
            Symbol::Guard(_) => None,
        }
    }

    #[inline]
    pub(crate) fn is_guard(&self) -> bool {
        matches!(self, Symbol::Guard(_))
    }

    #[inline]
    pub(crate) fn as_nonterminal(&self) -> Option<u32> {
        match *self {
            Symbol::NonTerminal(n) => Some(n),
            _ => None,
        }
    }
}

/// A symbol value stripped of list-position information: what digram keys and
/// Huffman histogram keys are built from. Guards are intentionally
/// unrepresentable here.
///
/// Ordering matches the Huffman tie-break rule in spec §4.5: terminals sort
/// before nonterminals, terminals by byte value, nonterminals by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolValue {
    Terminal(u8),
    NonTerminal(u32),
}

/// A node in the doubly-linked list of symbols.
///
/// Replaces an intrusive linked list with safe SlotMap-based indices.
#[derive(Debug)]
pub(crate) struct SymbolNode {
    pub symbol: Symbol,
    pub prev: Option<DefaultKey>,
    pub next: Option<DefaultKey>,
}

impl SymbolNode {
    pub(crate) fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            prev: None,
            next: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_excludes_guard() {
        assert_eq!(Symbol::Terminal(b'a').value(), Some(SymbolValue::Terminal(b'a')));
        assert_eq!(Symbol::NonTerminal(3).value(), Some(SymbolValue::NonTerminal(3)));
        assert_eq!(Symbol::Guard(0).value(), None);
    }

    #[test]
    fn ordering_matches_tiebreak_rule() {
        assert!(SymbolValue::Terminal(255) < SymbolValue::NonTerminal(0));
        assert!(SymbolValue::Terminal(b'a') < SymbolValue::Terminal(b'b'));
        assert!(SymbolValue::NonTerminal(1) < SymbolValue::NonTerminal(2));
    }
}
