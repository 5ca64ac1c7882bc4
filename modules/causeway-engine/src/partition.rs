//! Key → shard mapping.

/// djb2 over the key's UTF-16 code units, wrapping at 32 bits.
pub fn djb2(key: &str) -> u32 {
    key.encode_utf16()
        .fold(5381u32, |hash, unit| hash.wrapping_mul(33).wrapping_add(u32::from(unit)))
}

/// The shard in `[0, num_partitions)` that owns `key`.
///
/// Stable for as long as `num_partitions` is: every event with the same
/// routing key lands on the same worker, which is what keeps a stream ordered.
pub fn partition(key: &str, num_partitions: usize) -> usize {
    if num_partitions <= 1 {
        return 0;
    }
    (u64::from(djb2(key)) % num_partitions as u64) as usize
}
