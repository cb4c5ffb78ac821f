use rand::RngCore;

/// Generates an opaque, unguessable, URL-safe token — used for session
/// transaction ids, internal function-invocation tokens, and anywhere else
/// the spec calls for an "opaque token (random, unguessable)".
pub fn opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tokens_are_unique_and_fixed_length() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let t = opaque_token();
            assert_eq!(t.len(), 64);
            assert!(seen.insert(t), "token collision");
        }
    }
}
