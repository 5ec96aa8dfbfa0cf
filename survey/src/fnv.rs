const OFFSET_BASIS: u32 = 0x811c9dc5;
const PRIME: u32 = 0x01000193;

/// 32-bit FNV-1a over the UTF-8 bytes of `text`.
///
/// Seeds derived with this have to agree with every other tool that builds
/// survey banks, so this must stay the standard FNV-1a digest.
pub fn fnv1a32<T: AsRef<str>>(text: T) -> u32 {
    text.as_ref()
        .bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ byte as u32).wrapping_mul(PRIME))
}
