use rand::Rng;

pub const REFERENCE_CODE_PREFIX: &str = "ORD-";

/// Crockford's base32: no I, L, O or U, so codes survive being read out over the phone.
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const CODE_LENGTH: usize = 8;

/// A fresh customer-facing reference code, e.g. `ORD-7K3QX9MD`.
///
/// Codes are random, not sequential. Uniqueness is enforced by the database; callers retry on a collision.
pub fn new_reference_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix = (0..CODE_LENGTH).map(|_| CROCKFORD[rng.gen_range(0..CROCKFORD.len())] as char).collect::<String>();
    format!("{REFERENCE_CODE_PREFIX}{suffix}")
}

pub fn is_reference_code(s: &str) -> bool {
    s.strip_prefix(REFERENCE_CODE_PREFIX)
        .map(|suffix| suffix.len() == CODE_LENGTH && suffix.bytes().all(|b| CROCKFORD.contains(&b)))
        .unwrap_or(false)
}
