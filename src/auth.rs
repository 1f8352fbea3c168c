//! Bearer-token check guarding the one privileged route (force-finalize).
//! End-user authentication/authorization is out of scope; `user_id` on
//! every other route arrives as a plain request field the caller asserts,
//! the same trust boundary the teacher's CLI used for its peer identity.

use crate::error::ApiError;

/// Byte-for-byte comparison that always walks the full length of the
/// longer input, so a timing side channel can't shorten a brute-force
/// search for the token one byte at a time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn check_admin_token(configured: &Option<String>, presented: Option<&str>) -> Result<(), ApiError> {
    let Some(configured) = configured else {
        return Err(ApiError::Forbidden);
    };
    let Some(presented) = presented else {
        return Err(ApiError::Unauthorized);
    };
    if constant_time_eq(configured.as_bytes(), presented.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
