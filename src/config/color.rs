/// 53-bit string hash (cyrb53) over UTF-16 code units.
pub fn cyrb53(input: &str, seed: u32) -> u64 {
    let mut h1: u32 = 0xdead_beef ^ seed;
    let mut h2: u32 = 0x41c6_ce57 ^ seed;

    for unit in input.encode_utf16() {
        let ch = u32::from(unit);
        h1 = (h1 ^ ch).wrapping_mul(2_654_435_761);
        h2 = (h2 ^ ch).wrapping_mul(1_597_334_677);
    }

    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(2_246_822_507);
    h1 ^= (h2 ^ (h2 >> 13)).wrapping_mul(3_266_489_909);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(2_246_822_507);
    h2 ^= (h1 ^ (h1 >> 13)).wrapping_mul(3_266_489_909);

    4_294_967_296u64 * u64::from(2_097_151 & h2) + u64::from(h1)
}

/// Stable hue in `0..360` for an entity id
pub fn hue_for(entity_id: &str) -> u32 {
    (cyrb53(entity_id, 0) % 360) as u32
}

/// Stable, distinct marker color for an entity id
pub fn color_for(entity_id: &str) -> String {
    format!("hsl({}, 95%, 35%)", hue_for(entity_id))
}
