use crate::symbol::SymbolValue;
use crate::{decode, encode, Grammar};
use proptest::prelude::*;

fn built(input: &[u8]) -> Grammar {
    let mut g = Grammar::new();
    g.append(input);
    g
}

proptest! {
    /// P1: round-trip fidelity through the full codec.
    #[test]
    fn prop_roundtrip(input: Vec<u8>) {
        let g = built(&input);
        let decoded = decode(&encode(&g)).expect("a freshly encoded artifact always decodes");
        prop_assert_eq!(decoded, input);
    }

    /// P2: grammar soundness — expanding rule 0 of the live engine (not a
    /// decoded artifact) reproduces the input exactly.
    #[test]
    fn prop_grammar_soundness(input: Vec<u8>) {
        let g = built(&input);
        let bodies: ahash::AHashMap<u32, Vec<SymbolValue>> = g.rules().collect();
        let expanded = crate::expand::expand_rule_zero(&bodies).expect("live grammar always expands");
        prop_assert_eq!(expanded, input);
    }

    /// P3: digram uniqueness holds after every append, not just at the end.
    #[test]
    fn prop_digram_uniqueness_incremental(input: Vec<u8>) {
        let mut g = Grammar::new();
        for &b in &input {
            g.append_byte(b);
            prop_assert!(g.check_digram_uniqueness());
        }
    }

    /// P4: rule utility holds after every append.
    #[test]
    fn prop_rule_utility_incremental(input: Vec<u8>) {
        let mut g = Grammar::new();
        for &b in &input {
            g.append_byte(b);
            prop_assert!(g.check_rule_utility());
        }
    }

    /// P5: the digram index agrees with a direct scan after every append.
    #[test]
    fn prop_digram_index_consistency_incremental(input: Vec<u8>) {
        let mut g = Grammar::new();
        for &b in &input {
            g.append_byte(b);
            prop_assert!(g.check_digram_index_consistency());
        }
    }

    /// P6: every rule's stored refcount matches a direct recount of the
    /// nonterminals referencing it.
    #[test]
    fn prop_refcount_consistency_incremental(input: Vec<u8>) {
        let mut g = Grammar::new();
        for &b in &input {
            g.append_byte(b);
            prop_assert!(g.check_refcount_consistency());
        }
    }

    /// P7: encoding the same grammar twice yields byte-identical artifacts.
    #[test]
    fn prop_codec_determinism(input: Vec<u8>) {
        let g = built(&input);
        prop_assert_eq!(encode(&g), encode(&g));
    }

    /// P8: the encoded histograms equal a direct scan of the grammar bodies.
    #[test]
    fn prop_histogram_exactness(input: Vec<u8>) {
        let g = built(&input);
        let artifact = encode(&g);

        let mut scanned: ahash::AHashMap<SymbolValue, u64> = ahash::AHashMap::default();
        for (_, body) in g.rules() {
            for sym in body {
                *scanned.entry(sym).or_insert(0) += 1;
            }
        }

        // max_symbol is the u32 right after the 4-byte magic.
        let max_symbol = u32::from_le_bytes(artifact[4..8].try_into().unwrap());
        let mut cursor = 8usize;
        for byte in 0u32..=255 {
            let count = u32::from_le_bytes(artifact[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            let expected = scanned.get(&SymbolValue::Terminal(byte as u8)).copied().unwrap_or(0);
            prop_assert_eq!(count as u64, expected);
        }
        for n in 0..=max_symbol {
            let count = u32::from_le_bytes(artifact[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            let expected = scanned.get(&SymbolValue::NonTerminal(n)).copied().unwrap_or(0);
            prop_assert_eq!(count as u64, expected);
        }
    }
}

/// Bolero fuzz test: no panics on arbitrary input, across the whole pipeline.
#[cfg(test)]
#[test]
fn fuzz_no_panic() {
    bolero::check!().with_type::<Vec<u8>>().for_each(|input| {
        let g = built(input);
        let artifact = encode(&g);
        let decoded = decode(&artifact).expect("a freshly encoded artifact always decodes");
        assert_eq!(&decoded, input);
    });
}

/// Bolero fuzz test: invariants hold after every single append, not merely
/// at the end of the input.
#[cfg(test)]
#[test]
fn fuzz_invariants_hold_incrementally() {
    bolero::check!().with_type::<Vec<u8>>().for_each(|input| {
        let mut g = Grammar::new();
        for &b in input.iter() {
            g.append_byte(b);
            assert!(g.check_digram_uniqueness());
            assert!(g.check_rule_utility());
            assert!(g.check_refcount_consistency());
        }
    });
}

#[cfg(test)]
mod scenarios {
    use super::*;

    fn usage_of(g: &Grammar, rule_number: u32) -> u32 {
        g.describe()
            .lines()
            .find(|line| line.starts_with(&format!("R{rule_number} ")))
            .and_then(|line| line.split("used ").nth(1))
            .and_then(|rest| rest.split('x').next())
            .and_then(|n| n.parse().ok())
            .expect("rule must appear in the pretty-print")
    }

    #[test]
    fn scenario_1_abracadabra_doubled() {
        let g = built(b"abracadabraabracadabra");
        assert_eq!(g.rule_count(), 3);
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded, b"abracadabraabracadabra");
        assert_eq!(usage_of(&g, 1), 2);
        assert_eq!(usage_of(&g, 2), 2);
    }

    #[test]
    fn scenario_2_run_of_ones_with_a_two() {
        let g = built(b"11111211111");
        assert_eq!(g.rule_count(), 3);
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded, b"11111211111");
        assert_eq!(usage_of(&g, 1), 3);
        assert_eq!(usage_of(&g, 2), 2);
    }

    #[test]
    fn scenario_3_quadruple_a() {
        let g = built(b"aaaa");
        assert_eq!(g.rule_count(), 2);
        let bodies: std::collections::HashMap<u32, Vec<SymbolValue>> = g.rules().collect();
        assert_eq!(
            bodies[&1],
            vec![SymbolValue::Terminal(b'a'), SymbolValue::Terminal(b'a')]
        );
        assert_eq!(usage_of(&g, 1), 2);
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded, b"aaaa");
    }

    #[test]
    fn scenario_4_single_byte() {
        let g = built(b"x");
        assert_eq!(g.rule_count(), 1);
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded, b"x");
    }

    #[test]
    fn scenario_5_empty_input() {
        let g = Grammar::new();
        assert_eq!(g.rule_count(), 1);
        let artifact = encode(&g);
        assert!(artifact.starts_with(b"WOT\0"));
        let decoded = decode(&artifact).unwrap();
        assert_eq!(decoded, Vec::<u8>::new());
    }

    #[test]
    fn scenario_6_no_repeats() {
        let input = b"abcdefghijklmnopqrstuv";
        let g = built(input);
        assert_eq!(g.rule_count(), 1);
        let decoded = decode(&encode(&g)).unwrap();
        assert_eq!(decoded, input);
    }
}

#[cfg(test)]
mod boundary {
    use super::*;
    use crate::Error;

    #[test]
    fn missing_magic_is_malformed() {
        let artifact = encode(&built(b"hello"));
        let truncated = &artifact[..2];
        assert!(matches!(decode(truncated), Err(Error::MalformedArtifact(_))));
    }

    #[test]
    fn wrong_magic_is_malformed() {
        let mut artifact = encode(&built(b"hello"));
        artifact[3] = b'!';
        assert!(matches!(decode(&artifact), Err(Error::MalformedArtifact(_))));
    }

    #[test]
    fn offset_overrunning_the_stream_is_rejected() {
        let artifact = encode(&built(b"abracadabraabracadabra"));
        let truncated = &artifact[..artifact.len() - 1];
        assert!(decode(truncated).is_err());
    }
}
