// Entity Models - Parties and Staff
//
// Each entity has a stable UUID identity and a case-insensitive unique name.
// The ledger reaches them only through the `Registry` trait, so parsing and
// validation never need a live store.

pub mod party;
pub mod staff;

pub use party::{normalize_name, validate_party_name, Party};
pub use staff::Staff;

use rusqlite::Connection;
use rust_decimal::Decimal;

/// Name → id resolution for parties (lookup or create) and staff (lookup only)
pub trait Registry {
    fn find_party(&self, name: &str) -> rusqlite::Result<Option<Party>>;

    /// Resolve a party, creating it with a zero balance when absent.
    /// The flag is true when the party was created by this call.
    fn find_or_create_party(&self, name: &str) -> rusqlite::Result<(Party, bool)>;

    fn find_staff(&self, name: &str) -> rusqlite::Result<Option<Staff>>;
}

impl Registry for Connection {
    fn find_party(&self, name: &str) -> rusqlite::Result<Option<Party>> {
        party::find_party_by_name(self, name)
    }

    fn find_or_create_party(&self, name: &str) -> rusqlite::Result<(Party, bool)> {
        match party::find_party_by_name(self, name)? {
            Some(existing) => Ok((existing, false)),
            None => Ok((party::insert_party(self, name, Decimal::ZERO)?, true)),
        }
    }

    fn find_staff(&self, name: &str) -> rusqlite::Result<Option<Staff>> {
        staff::find_staff_by_name(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    #[test]
    fn test_registry_creates_parties_lazily_but_never_staff() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(conn.find_party("Maa").unwrap().is_none());

        let (first, created) = conn.find_or_create_party("Maa").unwrap();
        assert!(created);
        let (second, created_again) = conn.find_or_create_party("MAA").unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);

        assert!(conn.find_staff("Ramesh").unwrap().is_none());
    }
}
