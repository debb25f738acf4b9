#![no_main]
use blockvfs::core::block::Block;
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must decode to a block or an error, never a panic
fuzz_target!(|data: &[u8]| {
    if let Ok(block) = Block::decode(data) {
        // Whatever decoded must encode back into the same block size
        let encoded = block.encode(data.len()).expect("decoded block re-encodes");
        assert_eq!(Block::decode(&encoded).ok(), Some(block));
    }
});
