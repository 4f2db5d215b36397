use chrono::Utc;

const SUFFIX_LEN: usize = 9;
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// New session id: `session_<unix-millis>_<9 base36 chars>`
pub fn generate_session_id() -> String {
    let mut entropy = uuid::Uuid::new_v4().as_u128();
    let mut suffix = String::with_capacity(SUFFIX_LEN);

    for _ in 0..SUFFIX_LEN {
        suffix.push(ALPHABET[(entropy % 36) as usize] as char);
        entropy /= 36;
    }

    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Whether `id` has the shape produced by `generate_session_id`
pub fn is_valid_session_id(id: &str) -> bool {
    let mut parts = id.splitn(3, '_');
    let prefix = parts.next();
    let millis = parts.next();
    let suffix = parts.next();

    matches!(prefix, Some("session"))
        && millis.map_or(false, |m| !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()))
        && suffix.map_or(false, |s| {
            s.len() == SUFFIX_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
        })
}
