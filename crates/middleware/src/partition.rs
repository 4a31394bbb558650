/// Partition for a key: first four bytes of md5(key), big-endian, modulo
/// the partition count. Stable across processes and restarts.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = md5::compute(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partitions
}
