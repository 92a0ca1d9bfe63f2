//! Sequence Shaper
//!
//! Forces a token sequence to the engine's fixed input length.

/// Return exactly `target_length` ids: pad at the end with `padding_id`, or
/// keep only the first `target_length` ids. The dropped suffix is lost.
pub fn shape(tokens: &[u32], target_length: usize, padding_id: u32) -> Vec<u32> {
    let mut shaped: Vec<u32> = tokens.iter().copied().take(target_length).collect();
    shaped.resize(target_length, padding_id);
    shaped
}
