use super::constants::MAX_HASH_POWER;

pub(crate) fn ensure_hash_powers_or_panic(hash_power: u8, max_hash_power: u8) {
    assert!(hash_power >= 1, "hash_power must be at least 1");
    assert!(
        max_hash_power <= MAX_HASH_POWER,
        "max_hash_power must not exceed {MAX_HASH_POWER}"
    );
    assert!(
        hash_power <= max_hash_power,
        "hash_power ({hash_power}) is larger than max_hash_power ({max_hash_power})"
    );
}
