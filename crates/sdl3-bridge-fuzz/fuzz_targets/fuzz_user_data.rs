#![no_main]
use libfuzzer_sys::fuzz_target;
use sdl3_bridge_membrane::{Token, UserDataStore};

// Interleaves registrations, lookups, and removals; raw input words are also
// replayed as forged tokens, which must never resolve to a value they were
// not issued for.
fuzz_target!(|data: &[u8]| {
    let store = UserDataStore::new();
    let mut issued: Vec<(Token, u64)> = Vec::new();

    for chunk in data.chunks_exact(9) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&chunk[1..9]);
        let word = u64::from_le_bytes(bytes);
        match chunk[0] % 5 {
            0 => issued.push((store.add(word), word)),
            1 if !issued.is_empty() => {
                let (token, _) = issued.swap_remove(word as usize % issued.len());
                assert!(store.remove(token));
                assert!(!store.remove(token));
                assert!(store.get::<u64>(token).is_none());
            }
            2 if !issued.is_empty() => {
                let (token, value) = issued[word as usize % issued.len()];
                assert_eq!(store.get::<u64>(token).as_deref(), Some(&value));
                assert!(store.get::<u32>(token).is_none());
            }
            3 => {
                if let Some(found) = Token::from_raw(word as usize).and_then(|t| store.get::<u64>(t)) {
                    let forged = Token::from_raw(word as usize);
                    assert!(issued.iter().any(|&(t, v)| Some(t) == forged && v == *found));
                }
            }
            _ => {}
        }
        assert_eq!(store.len(), issued.len());
    }
});
