use super::*;
extern crate alloc;

#[test]
fn logic_packet_length_must_be_multiple_of_unit_size() {
    let ok = Packet::Logic {
        data: alloc::vec![0u8; 4],
        unit_size: 2,
    };
    assert!(ok.is_length_valid());

    let bad = Packet::Logic {
        data: alloc::vec![0u8; 3],
        unit_size: 2,
    };
    assert!(!bad.is_length_valid());
}

#[test]
fn non_logic_packets_are_always_length_valid() {
    assert!(Packet::Header.is_length_valid());
    assert!(Packet::End.is_length_valid());
    assert!(Packet::Trigger { payload: None }.is_length_valid());
}

#[test]
fn test_checker_seeds_on_first_sample() {
    let mut checker = TestModeChecker::new();
    assert!(checker.check(41));
    assert_eq!(checker.mismatches, 0);
}

#[test]
fn test_checker_follows_arithmetic_sequence_mod_65001() {
    let mut checker = TestModeChecker::new();
    assert!(checker.check(65000));
    // 65000 + 1 wraps to 0 modulo 65001.
    assert!(checker.check(0));
    assert!(checker.check(1));
    assert_eq!(checker.mismatches, 0);
}

#[test]
fn test_checker_counts_mismatch_and_resyncs() {
    let mut checker = TestModeChecker::new();
    checker.check(10);
    assert!(!checker.check(999));
    assert_eq!(checker.mismatches, 1);
    // Resynchronises on the mismatching value, not the old expectation.
    assert!(checker.check(1000));
    assert_eq!(checker.mismatches, 1);
}

#[test]
fn external_stop_on_mismatch_halts_the_scan() {
    let mut checker = TestModeChecker::new();
    // seed=0, expect 1,2,3,...; third sample breaks the sequence.
    let data: Vec<u8> = [0u16, 1, 99, 3]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    checker.check_buffer(&data, true);
    assert_eq!(checker.mismatches, 1);
}

#[test]
fn internal_keeps_scanning_past_mismatch() {
    let mut checker = TestModeChecker::new();
    let data: Vec<u8> = [0u16, 1, 99, 200]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    checker.check_buffer(&data, false);
    // Mismatches at both sample index 2 (expected 2, got 99) and
    // index 3 (expected 100, got 200).
    assert_eq!(checker.mismatches, 2);
}
