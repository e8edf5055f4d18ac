use crate::digram::DigramIndex;
use crate::rule::RuleTable;
use crate::symbol::{Symbol, SymbolNode, SymbolValue};
use ahash::AHashMap as HashMap;
use slotmap::{DefaultKey, SlotMap};
use std::collections::HashSet;

/// A Sequitur grammar: a digram-unique, rule-useful context-free grammar
/// induced incrementally from an input byte sequence.
///
/// Maintains two invariants as bytes are appended via [`Grammar::append`]:
/// 1. **Digram uniqueness**: no pair of adjacent symbols appears more than
///    once anywhere in the grammar.
/// 2. **Rule utility**: every rule other than rule 0 (the main sequence) is
///    referenced at least twice.
///
/// Grounded on the teacher crate's `Sequitur`/`GrammarFields` split, adapted
/// to a single circular guard sentinel per rule (see `src/symbol.rs`) instead
/// of the teacher's `RuleHead`/`RuleTail` pair, matching the reference
/// `wot` implementation this crate's container format is drawn from.
pub struct Grammar {
    pub(crate) symbols: SlotMap<DefaultKey, SymbolNode>,
    pub(crate) rules: RuleTable,
    digrams: DigramIndex,
    length: usize,
}

impl Grammar {
    /// Creates an empty grammar containing only rule 0 (the main sequence).
    pub fn new() -> Self {
        let mut symbols: SlotMap<DefaultKey, SymbolNode> = SlotMap::new();
        let guard = symbols.insert(SymbolNode::new(Symbol::Guard(0)));
        symbols[guard].prev = Some(guard);
        symbols[guard].next = Some(guard);

        let mut rules = RuleTable::new();
        let root = rules.insert(guard);
        debug_assert_eq!(root, 0, "rule 0 must be the first rule allocated");

        Self {
            symbols,
            rules,
            digrams: DigramIndex::new(),
            length: 0,
        }
    }

    /// Appends a single byte to the main sequence, running the Sequitur
    /// algorithm to maintain digram uniqueness and rule utility.
    pub fn append_byte(&mut self, byte: u8) {
        let guard = self.rules.get(0).expect("rule 0 always exists").guard;
        let last = self.symbols[guard].prev.expect("guard is always linked");

        let new_key = self.symbols.insert(SymbolNode::new(Symbol::Terminal(byte)));
        self.insert_after(last, new_key);
        self.length += 1;

        if !self.symbols[last].symbol.is_guard() {
            self.check(last);
        }
    }

    /// Appends a slice of bytes, equivalent to calling [`Grammar::append_byte`]
    /// for each one in order.
    pub fn append(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.append_byte(b);
        }
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Rule number of the main sequence. Always `0`.
    pub fn root_number(&self) -> u32 {
        0
    }

    /// Number of live rules (including rule 0).
    pub fn rule_count(&self) -> usize {
        self.rules.live_count()
    }

    /// Iterates live rules as `(rule_number, body)` pairs, in ascending
    /// rule-number order. `body` is the sequence of symbol values between
    /// the rule's guard and itself, i.e. the rule's right-hand side.
    pub fn rules(&self) -> impl Iterator<Item = (u32, Vec<SymbolValue>)> + '_ {
        self.rules.iter().map(move |(number, _)| (number, self.body_of(number)))
    }

    pub(crate) fn body_of(&self, rule_number: u32) -> Vec<SymbolValue> {
        let guard = self.rules.get(rule_number).expect("rule must exist").guard;
        let mut out = Vec::new();
        let mut current = self.symbols[guard].next;
        while let Some(key) = current {
            if self.symbols[key].symbol.is_guard() {
                break;
            }
            out.push(self.symbols[key].symbol.value().expect("non-guard has a value"));
            current = self.symbols[key].next;
        }
        out
    }

    // ========================================================================
    // C1: symbol-graph primitives
    // ========================================================================

    /// Plain list relink: `left.next = right`, `right.prev = left`. Pure
    /// pointer surgery — digram bookkeeping is the caller's responsibility,
    /// mirroring the layering between the teacher's symbol-graph primitives
    /// and its engine logic.
    fn link(&mut self, left: DefaultKey, right: DefaultKey) {
        self.symbols[left].next = Some(right);
        self.symbols[right].prev = Some(left);
    }

    /// Inserts `new_key` immediately after `after` in the doubly-linked list.
    fn insert_after(&mut self, after: DefaultKey, new_key: DefaultKey) {
        let old_next = self.symbols[after].next.expect("insert_after: unlinked anchor");
        self.link(new_key, old_next);
        self.link(after, new_key);
    }

    /// Allocates a new rule with an empty (guard-only) body and returns its
    /// number.
    fn new_empty_rule(&mut self) -> u32 {
        let guard = self.symbols.insert(SymbolNode::new(Symbol::Guard(u32::MAX)));
        self.symbols[guard].prev = Some(guard);
        self.symbols[guard].next = Some(guard);
        let number = self.rules.insert(guard);
        self.symbols[guard].symbol = Symbol::Guard(number);
        number
    }

    /// Removes the digram entry keyed by `(value(loc), value(loc.next))`,
    /// but only if it still points at `loc` — a same-valued digram recorded
    /// elsewhere must survive.
    fn remove_outgoing_digram(&mut self, loc: DefaultKey) {
        if self.symbols[loc].symbol.is_guard() {
            return;
        }
        let Some(next) = self.symbols[loc].next else {
            return;
        };
        if self.symbols[next].symbol.is_guard() {
            return;
        }
        let key = (
            self.symbols[loc].symbol.value().expect("non-guard has a value"),
            self.symbols[next].symbol.value().expect("non-guard has a value"),
        );
        self.digrams.remove_if(key, loc);
    }

    /// Inlines a rule's body in place of its sole `NonTerminal` reference at
    /// `loc`, tombstones the rule, and rechecks the two new boundaries for
    /// fresh digram matches.
    ///
    /// The two `symbols.remove` calls happen only after both `link` calls
    /// complete — `link` reads `self.symbols[left].next`/`[right].prev` to
    /// relink around `loc`'s old position, so removing `loc`/`guard` first
    /// would leave those reads dereferencing a freed slotmap key.
    fn expand(&mut self, loc: DefaultKey) {
        let rule_number = self.symbols[loc]
            .symbol
            .as_nonterminal()
            .expect("expand called on a non-NonTerminal symbol");
        let left = self.symbols[loc].prev.expect("expand: missing predecessor");
        let right = self.symbols[loc].next.expect("expand: missing successor");

        self.remove_outgoing_digram(left);
        self.remove_outgoing_digram(loc);

        let rule = self.rules.remove(rule_number).expect("expand: rule must exist");
        let guard = rule.guard;
        let first = self.symbols[guard]
            .next
            .expect("a rule with refcount 1 has a non-empty body");
        let last = self.symbols[guard].prev.expect("a rule with refcount 1 has a non-empty body");

        self.link(left, first);
        self.link(last, right);

        self.symbols.remove(loc);
        self.symbols.remove(guard);

        if !self.symbols[left].symbol.is_guard() {
            self.check(left);
        }
        if !self.symbols[last].symbol.is_guard() {
            self.check(last);
        }
    }

    // ========================================================================
    // C4: engine
    // ========================================================================

    /// Checks the digram starting at `first` (i.e. `(first, first.next)`).
    ///
    /// Returns `true` whenever a prior occurrence of this digram was already
    /// indexed — including the overlap case where the "prior occurrence" is
    /// the immediately adjacent digram of a run of identical values and no
    /// substitution actually happens. This matches the reference `wot`
    /// implementation's `check()` contract (see DESIGN.md): the narrower
    /// reading ("returns true only when a substitution happened") breaks
    /// overlap handling for inputs like `"aaa"`.
    fn check(&mut self, first: DefaultKey) -> bool {
        let Some(second) = self.symbols[first].next else {
            return false;
        };
        if self.symbols[first].symbol.is_guard() || self.symbols[second].symbol.is_guard() {
            return false;
        }

        let key = (
            self.symbols[first].symbol.value().expect("non-guard has a value"),
            self.symbols[second].symbol.value().expect("non-guard has a value"),
        );

        match self.digrams.try_insert_or_get(key, first) {
            None => false,
            Some(existing) => {
                let existing_next = self.symbols[existing].next;
                // Overlapping occurrences (runs of identical values) share a
                // symbol with the digram just formed; no distinct match.
                if existing == first || existing == second || existing_next == Some(first) {
                    return true;
                }
                self.process_match(first, existing);
                true
            }
        }
    }

    /// A genuine (non-overlapping) digram match was found at `existing`,
    /// duplicating the digram starting at `first`. Creates or reuses a rule
    /// for the digram and substitutes the duplicate occurrence(s), then
    /// enforces rule utility on the rule just touched.
    fn process_match(&mut self, first: DefaultKey, existing: DefaultKey) {
        let existing_next = self.symbols[existing].next.expect("digram has a second element");
        let existing_prev = self.symbols[existing].prev.expect("every symbol has a predecessor");
        let existing_next_next = self.symbols[existing_next]
            .next
            .expect("every symbol has a successor");

        let rule_number = if self.symbols[existing_prev].symbol.is_guard()
            && self.symbols[existing_next_next].symbol.is_guard()
        {
            // The matched digram already IS a whole rule's body (`existing`
            // sits between that rule's own guard on both sides). That rule
            // needs no substitution — it already just is its own body — only
            // the newly-formed duplicate occurrence at `first` is replaced.
            self.symbols[existing_prev]
                .symbol
                .as_guard_rule_number()
                .expect("prev is a guard")
        } else {
            let rule_number = self.create_rule_from_digram(existing, existing_next);
            self.substitute(existing, rule_number);
            rule_number
        };

        self.substitute(first, rule_number);

        self.enforce_rule_utility(rule_number);
    }

    /// Allocates a new rule whose body is a clone of the digram at
    /// `(loc_first, loc_second)`, registers the rule's own internal digram
    /// so future matches against it are found, and returns the new rule's
    /// number.
    fn create_rule_from_digram(&mut self, loc_first: DefaultKey, loc_second: DefaultKey) -> u32 {
        let sym_first = self.symbols[loc_first].symbol;
        let sym_second = self.symbols[loc_second].symbol;

        let rule_number = self.new_empty_rule();
        let guard = self.rules.get(rule_number).expect("just created").guard;

        let body_first = self.symbols.insert(SymbolNode::new(sym_first));
        let body_second = self.symbols.insert(SymbolNode::new(sym_second));
        self.insert_after(guard, body_first);
        self.insert_after(body_first, body_second);

        if let Some(n) = sym_first.as_nonterminal() {
            self.rules.increment(n);
        }
        if let Some(n) = sym_second.as_nonterminal() {
            self.rules.increment(n);
        }

        let key = (
            sym_first.value().expect("digram operand has a value"),
            sym_second.value().expect("digram operand has a value"),
        );
        self.digrams.insert(key, body_first);

        rule_number
    }

    /// Replaces the digram starting at `loc_first` with a single
    /// `NonTerminal(rule_number)`, then recurses into `check` at the new
    /// boundary exactly as the reference implementation's
    /// `if not prev.check(): prev.next.check()` does.
    fn substitute(&mut self, loc_first: DefaultKey, rule_number: u32) {
        let loc_second = self.symbols[loc_first].next.expect("digram has a second element");
        let before = self.symbols[loc_first]
            .prev
            .expect("every symbol has a predecessor (at least a guard)");
        let after = self.symbols[loc_second]
            .next
            .expect("every symbol has a successor (at least a guard)");

        self.remove_outgoing_digram(before);
        self.remove_outgoing_digram(loc_second);

        if let Some(n) = self.symbols[loc_first].symbol.as_nonterminal() {
            self.rules.decrement(n);
        }
        if let Some(n) = self.symbols[loc_second].symbol.as_nonterminal() {
            self.rules.decrement(n);
        }

        let new_key = self
            .symbols
            .insert(SymbolNode::new(Symbol::NonTerminal(rule_number)));
        self.link(before, new_key);
        self.link(new_key, after);

        self.symbols.remove(loc_first);
        self.symbols.remove(loc_second);

        self.rules.increment(rule_number);

        if !self.check(before) {
            self.check(new_key);
        }
    }

    /// If `rule_number`'s first or second body symbol is itself a
    /// `NonTerminal` whose rule is now down to a single reference, inlines
    /// it. Checking both positions is a defensive superset of the reference
    /// implementation (which only checks the newly-created rule's first
    /// symbol): a substitution's refcount decrements can only ever land on
    /// the digram's two cloned operands, which are exactly this rule's first
    /// and second body symbols.
    fn enforce_rule_utility(&mut self, rule_number: u32) {
        let Some(rule) = self.rules.get(rule_number) else {
            return;
        };
        let guard = rule.guard;
        let Some(body_first) = self.symbols[guard].next else {
            return;
        };
        if self.symbols[body_first].symbol.is_guard() {
            return;
        }
        let body_second = self.symbols[body_first].next;

        self.try_expand(body_first);
        if let Some(second) = body_second {
            if self.symbols.contains_key(second) && !self.symbols[second].symbol.is_guard() {
                self.try_expand(second);
            }
        }
    }

    fn try_expand(&mut self, loc: DefaultKey) {
        let Some(n) = self.symbols[loc].symbol.as_nonterminal() else {
            return;
        };
        let Some(rule) = self.rules.get(n) else {
            return;
        };
        if rule.refcount != 1 {
            return;
        }
        self.expand(loc);
    }

    // ========================================================================
    // C8: join primitive (optional)
    // ========================================================================

    /// Merges `other`'s grammar into `self`, reusing any rule whose body is
    /// structurally identical (modulo the renumbering this merge performs)
    /// and otherwise copying `other`'s remaining rules in, with their
    /// internal references translated to numbers in `self`.
    ///
    /// Returns the rule number in `self` that now corresponds to `other`'s
    /// root rule. Grounded on `wot`'s `Grammar.join`/`Grammar.map_common_rules`
    /// (`examples/original_source/wot/mrwot.py`): a two-phase fixed-point
    /// closure (terminal-only bodies first, then bodies fully rewritable in
    /// terms of already-matched rules) lets two independently-built grammars
    /// converge even when shared structure sits at different rule numbers.
    pub fn join(&mut self, other: &Grammar) -> u32 {
        let mut final_mapping = self.map_common_rules(other);

        let to_insert: Vec<u32> = other
            .rules
            .iter()
            .map(|(n, _)| n)
            .filter(|n| !final_mapping.contains_key(n))
            .collect();

        for &other_number in &to_insert {
            let new_number = self.new_empty_rule();
            final_mapping.insert(other_number, new_number);
        }

        for &other_number in &to_insert {
            let new_number = final_mapping[&other_number];
            let guard = self.rules.get(new_number).expect("just created").guard;
            let mut insertion_point = guard;
            for value in other.body_of(other_number) {
                let symbol = match value {
                    SymbolValue::Terminal(b) => Symbol::Terminal(b),
                    SymbolValue::NonTerminal(n) => Symbol::NonTerminal(final_mapping[&n]),
                };
                let new_key = self.symbols.insert(SymbolNode::new(symbol));
                self.insert_after(insertion_point, new_key);
                if let Some(n) = symbol.as_nonterminal() {
                    self.rules.increment(n);
                }
                self.check(insertion_point);
                insertion_point = new_key;
            }
        }

        final_mapping[&other.root_number()]
    }

    fn map_common_rules(&self, other: &Grammar) -> HashMap<u32, u32> {
        let my_vec_map: HashMap<Vec<SymbolValue>, u32> =
            self.rules.iter().map(|(n, _)| (self.body_of(n), n)).collect();
        let mut other_vec_map: HashMap<Vec<SymbolValue>, u32> =
            other.rules.iter().map(|(n, _)| (other.body_of(n), n)).collect();

        let mut my_remaining: HashSet<Vec<SymbolValue>> = my_vec_map.keys().cloned().collect();
        let mut ret: HashMap<u32, u32> = HashMap::default();

        fn is_terminal_only(body: &[SymbolValue]) -> bool {
            body.iter().all(|s| matches!(s, SymbolValue::Terminal(_)))
        }

        let my_terminal_only: HashSet<Vec<SymbolValue>> =
            my_remaining.iter().filter(|v| is_terminal_only(v)).cloned().collect();
        let other_terminal_only: HashSet<Vec<SymbolValue>> = other_vec_map
            .keys()
            .filter(|v| is_terminal_only(v))
            .cloned()
            .collect();

        let mut changed = handle_common_vectors(
            &mut my_remaining,
            &other_terminal_only,
            &other_vec_map,
            &my_vec_map,
            &mut ret,
        );

        if changed {
            for v in &my_terminal_only {
                my_remaining.remove(v);
            }
            for v in &other_terminal_only {
                other_vec_map.remove(v);
            }
        }

        while changed {
            let mut rewritten: HashMap<Vec<SymbolValue>, u32> = HashMap::default();
            for (body, &other_number) in other_vec_map.iter() {
                let fully_rewritable = body.iter().all(|s| match s {
                    SymbolValue::Terminal(_) => true,
                    SymbolValue::NonTerminal(n) => ret.contains_key(n),
                });
                if !fully_rewritable {
                    continue;
                }
                let rewritten_body: Vec<SymbolValue> = body
                    .iter()
                    .map(|s| match s {
                        SymbolValue::Terminal(b) => SymbolValue::Terminal(*b),
                        SymbolValue::NonTerminal(n) => {
                            SymbolValue::NonTerminal(*ret.get(n).unwrap_or(n))
                        }
                    })
                    .collect();
                rewritten.insert(rewritten_body, other_number);
            }
            let rewritten_set: HashSet<Vec<SymbolValue>> = rewritten.keys().cloned().collect();
            changed = handle_common_vectors(&mut my_remaining, &rewritten_set, &rewritten, &my_vec_map, &mut ret);
        }

        ret
    }
}

fn handle_common_vectors(
    my_remaining: &mut HashSet<Vec<SymbolValue>>,
    other_candidates: &HashSet<Vec<SymbolValue>>,
    other_vec_map: &HashMap<Vec<SymbolValue>, u32>,
    my_vec_map: &HashMap<Vec<SymbolValue>, u32>,
    ret: &mut HashMap<u32, u32>,
) -> bool {
    let common: Vec<Vec<SymbolValue>> = my_remaining.intersection(other_candidates).cloned().collect();
    for vec in &common {
        ret.insert(other_vec_map[vec], my_vec_map[vec]);
        my_remaining.remove(vec);
    }
    !common.is_empty()
}

impl Symbol {
    fn as_guard_rule_number(&self) -> Option<u32> {
        match *self {
            Symbol::Guard(n) => Some(n),
            _ => None,
        }
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Grammar {
    /// Human-readable rule dump used by scenario tests, in the spirit of the
    /// reference implementation's `Rule.get_rules` — never part of the
    /// public API.
    pub(crate) fn describe(&self) -> String {
        let mut out = String::new();
        for (number, body) in self.rules() {
            let rule = self.rules.get(number).expect("live rule");
            out.push_str(&format!("R{} (used {}x) ->", number, rule.refcount));
            for sym in body {
                match sym {
                    SymbolValue::Terminal(b) if b.is_ascii_graphic() || b == b' ' => {
                        out.push(' ');
                        out.push(b as char);
                    }
                    SymbolValue::Terminal(b) => out.push_str(&format!(" \\x{:02x}", b)),
                    SymbolValue::NonTerminal(n) => out.push_str(&format!(" R{}", n)),
                }
            }
            out.push('\n');
        }
        out
    }

    /// Optional self-check hook (§4.4's failure model): verifies digram
    /// uniqueness (I1) by scanning the live symbol graph directly, ignoring
    /// the digram index entirely.
    pub(crate) fn check_digram_uniqueness(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        for (_, rule) in self.rules.iter() {
            for key in self.live_digrams(rule.guard) {
                if !seen.insert(key) {
                    return false;
                }
            }
        }
        true
    }

    /// Verifies rule utility (I2): every rule but rule 0 has refcount >= 2.
    pub(crate) fn check_rule_utility(&self) -> bool {
        self.rules.iter().all(|(n, rule)| n == 0 || rule.refcount >= 2)
    }

    /// Verifies the digram index agrees with a direct graph scan: every
    /// digram actually present has an index entry pointing at a real
    /// occurrence of it.
    pub(crate) fn check_digram_index_consistency(&self) -> bool {
        let mut actual = std::collections::HashSet::new();
        for (_, rule) in self.rules.iter() {
            actual.extend(self.live_digrams(rule.guard));
        }
        for key in &actual {
            let Some(loc) = self.digrams.get(*key) else {
                return false;
            };
            let Some(node) = self.symbols.get(loc) else {
                return false;
            };
            let Some(next) = node.next.and_then(|n| self.symbols.get(n)) else {
                return false;
            };
            if node.symbol.value() != Some(key.0) || next.symbol.value() != Some(key.1) {
                return false;
            }
        }
        true
    }

    /// Recounts every nonterminal occurrence in the live graph and compares
    /// it to each rule's stored refcount (P6).
    pub(crate) fn check_refcount_consistency(&self) -> bool {
        let mut actual: HashMap<u32, u32> = HashMap::default();
        for (_, rule) in self.rules.iter() {
            let mut cursor = self.symbols[rule.guard].next.expect("guard always links somewhere");
            loop {
                let node = &self.symbols[cursor];
                if node.symbol.is_guard() {
                    break;
                }
                if let Some(n) = node.symbol.as_nonterminal() {
                    *actual.entry(n).or_insert(0) += 1;
                }
                cursor = node.next.expect("non-guard node always has a next");
            }
        }
        self.rules
            .iter()
            .all(|(n, rule)| actual.get(&n).copied().unwrap_or(0) == rule.refcount)
    }

    /// Yields every non-guard digram key found by walking one rule's body.
    fn live_digrams(&self, guard: DefaultKey) -> Vec<(SymbolValue, SymbolValue)> {
        let mut out = Vec::new();
        let Some(mut cursor) = self.symbols[guard].next else {
            return out;
        };
        loop {
            let node = &self.symbols[cursor];
            if node.symbol.is_guard() {
                break;
            }
            let next = node.next.expect("non-guard node always has a next");
            let next_node = &self.symbols[next];
            if !next_node.symbol.is_guard() {
                out.push((node.symbol.value().unwrap(), next_node.symbol.value().unwrap()));
            }
            cursor = next;
        }
        out
    }
}
