mod reference_code;

pub use reference_code::{is_reference_code, new_reference_code, REFERENCE_CODE_PREFIX};
