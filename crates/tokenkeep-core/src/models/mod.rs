//! Data models returned by and sent to the auth API.
//!
//! - `Profile`: the signed-in user's record, cached in memory only
//! - `ProfileUpdate`: partial update payload for the profile endpoint

pub mod profile;

pub use profile::{Profile, ProfileUpdate};
