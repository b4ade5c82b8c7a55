//! Registered users and their blacklists

pub mod directory;
pub mod lookup;
pub mod user;

pub use directory::UserDirectory;
pub use lookup::UserLookup;
pub use user::UserRecord;
