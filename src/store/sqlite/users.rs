use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{
    SqliteStore, collect, format_datetime, get_currency, get_datetime, get_enum,
    get_opt_datetime,
};
use crate::error::{Error, Result};
use crate::store::UserStore;
use crate::types::*;

const USER_COLUMNS: &str =
    "id, email, name, phone, password_hash, role, status, email_verified, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        password_hash: row.get(4)?,
        role: get_enum(row, 5, Role::parse)?,
        status: get_enum(row, 6, UserStatus::parse)?,
        email_verified: row.get(7)?,
        created_at: get_datetime(row, 8)?,
        updated_at: get_datetime(row, 9)?,
    })
}

const SESSION_COLUMNS: &str = "id, user_id, token_hash, token_lookup, ip_address, user_agent, \
                               created_at, expires_at, last_used_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        token_lookup: row.get(3)?,
        ip_address: row.get(4)?,
        user_agent: row.get(5)?,
        created_at: get_datetime(row, 6)?,
        expires_at: get_datetime(row, 7)?,
        last_used_at: get_opt_datetime(row, 8)?,
    })
}

fn verification_from_row(row: &Row<'_>) -> rusqlite::Result<Verification> {
    Ok(Verification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: get_enum(row, 2, VerificationKind::parse)?,
        token_digest: row.get(3)?,
        created_at: get_datetime(row, 4)?,
        expires_at: get_datetime(row, 5)?,
        consumed_at: get_opt_datetime(row, 6)?,
    })
}

const ADDRESS_COLUMNS: &str = "id, user_id, label, full_name, phone, line1, line2, city, region, \
                               postal_code, country, is_default, created_at, updated_at";

fn address_from_row(row: &Row<'_>) -> rusqlite::Result<Address> {
    Ok(Address {
        id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        full_name: row.get(3)?,
        phone: row.get(4)?,
        line1: row.get(5)?,
        line2: row.get(6)?,
        city: row.get(7)?,
        region: row.get(8)?,
        postal_code: row.get(9)?,
        country: row.get(10)?,
        is_default: row.get(11)?,
        created_at: get_datetime(row, 12)?,
        updated_at: get_datetime(row, 13)?,
    })
}

fn favorite_from_row(row: &Row<'_>) -> rusqlite::Result<Favorite> {
    Ok(Favorite {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        variant_id: row.get(3)?,
        created_at: get_datetime(row, 4)?,
    })
}

impl UserStore for SqliteStore {
    fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, email, name, phone, password_hash, role, status,
                                email_verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id,
                user.email,
                user.name,
                user.phone,
                user.password_hash,
                user.role.as_str(),
                user.status.as_str(),
                user.email_verified,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"),
            params![email],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;
        collect(rows)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET email = ?1, name = ?2, phone = ?3, role = ?4, status = ?5,
                              email_verified = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                user.email,
                user.name,
                user.phone,
                user.role.as_str(),
                user.status.as_str(),
                user.email_verified,
                format_datetime(&Utc::now()),
                user.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn set_password(
        &self,
        user_id: &str,
        password_hash: &str,
        revoke_sessions: bool,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![password_hash, format_datetime(&Utc::now()), user_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        if revoke_sessions {
            tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        }

        tx.commit()?;
        Ok(())
    }

    fn mark_email_verified(&self, user_id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET email_verified = 1,
                              status = CASE WHEN status = 'pending_verification'
                                            THEN 'active' ELSE status END,
                              updated_at = ?1
             WHERE id = ?2",
            params![format_datetime(&Utc::now()), user_id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Sessions

    fn create_session(&self, session: &Session) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO sessions (id, user_id, token_hash, token_lookup, ip_address, user_agent,
                                   created_at, expires_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id,
                session.user_id,
                session.token_hash,
                session.token_lookup,
                session.ip_address,
                session.user_agent,
                format_datetime(&session.created_at),
                format_datetime(&session.expires_at),
                session.last_used_at.as_ref().map(format_datetime),
            ],
        );

        match result.map_err(Error::from) {
            Ok(_) => Ok(()),
            // Session ids are fresh uuids, so a unique violation is the lookup index.
            Err(Error::AlreadyExists(_)) => Err(Error::TokenLookupCollision),
            Err(e) => Err(e),
        }
    }

    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_lookup = ?1"),
            params![lookup],
            session_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], session_from_row)?;
        collect(rows)
    }

    fn touch_session(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_expired_sessions(&self) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![format_datetime(&Utc::now())],
        )?;
        Ok(rows)
    }

    // One-time verification tokens

    fn create_verification(&self, verification: &Verification) -> Result<()> {
        self.conn().execute(
            "INSERT INTO verifications (id, user_id, kind, token_digest, created_at, expires_at,
                                        consumed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                verification.id,
                verification.user_id,
                verification.kind.as_str(),
                verification.token_digest,
                format_datetime(&verification.created_at),
                format_datetime(&verification.expires_at),
                verification.consumed_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn consume_verification(
        &self,
        token_digest: &str,
        kind: VerificationKind,
    ) -> Result<Option<Verification>> {
        let now = format_datetime(&Utc::now());
        let conn = self.conn();
        conn.query_row(
            "UPDATE verifications SET consumed_at = ?1
             WHERE token_digest = ?2 AND kind = ?3 AND consumed_at IS NULL AND expires_at > ?1
             RETURNING id, user_id, kind, token_digest, created_at, expires_at, consumed_at",
            params![now, token_digest, kind.as_str()],
            verification_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_verifications(&self, user_id: &str, kind: VerificationKind) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM verifications WHERE user_id = ?1 AND kind = ?2",
            params![user_id, kind.as_str()],
        )?;
        Ok(rows)
    }

    // Address book

    fn create_address(&self, address: &Address) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if address.is_default {
            tx.execute(
                "UPDATE addresses SET is_default = 0 WHERE user_id = ?1",
                params![address.user_id],
            )?;
        }
        tx.execute(
            "INSERT INTO addresses (id, user_id, label, full_name, phone, line1, line2, city,
                                    region, postal_code, country, is_default, created_at,
                                    updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                address.id,
                address.user_id,
                address.label,
                address.full_name,
                address.phone,
                address.line1,
                address.line2,
                address.city,
                address.region,
                address.postal_code,
                address.country,
                address.is_default,
                format_datetime(&address.created_at),
                format_datetime(&address.updated_at),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_address(&self, id: &str) -> Result<Option<Address>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE id = ?1"),
            params![id],
            address_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_addresses(&self, user_id: &str) -> Result<Vec<Address>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = ?1
             ORDER BY is_default DESC, created_at"
        ))?;
        let rows = stmt.query_map(params![user_id], address_from_row)?;
        collect(rows)
    }

    fn update_address(&self, address: &Address) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if address.is_default {
            tx.execute(
                "UPDATE addresses SET is_default = 0 WHERE user_id = ?1 AND id != ?2",
                params![address.user_id, address.id],
            )?;
        }
        let rows = tx.execute(
            "UPDATE addresses SET label = ?1, full_name = ?2, phone = ?3, line1 = ?4, line2 = ?5,
                                  city = ?6, region = ?7, postal_code = ?8, country = ?9,
                                  is_default = ?10, updated_at = ?11
             WHERE id = ?12 AND user_id = ?13",
            params![
                address.label,
                address.full_name,
                address.phone,
                address.line1,
                address.line2,
                address.city,
                address.region,
                address.postal_code,
                address.country,
                address.is_default,
                format_datetime(&Utc::now()),
                address.id,
                address.user_id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_address(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM addresses WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Preferences

    fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id, currency, locale, marketing_opt_in, updated_at
             FROM user_preferences WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(Preferences {
                    user_id: row.get(0)?,
                    currency: get_currency(row, 1)?,
                    locale: row.get(2)?,
                    marketing_opt_in: row.get(3)?,
                    updated_at: get_datetime(row, 4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn upsert_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_preferences (user_id, currency, locale, marketing_opt_in, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 currency = excluded.currency,
                 locale = excluded.locale,
                 marketing_opt_in = excluded.marketing_opt_in,
                 updated_at = excluded.updated_at",
            params![
                prefs.user_id,
                prefs.currency.code(),
                prefs.locale,
                prefs.marketing_opt_in,
                format_datetime(&prefs.updated_at),
            ],
        )?;
        Ok(())
    }

    // Favorites

    fn add_favorite(&self, favorite: &Favorite) -> Result<()> {
        self.conn().execute(
            "INSERT INTO favorites (id, user_id, product_id, variant_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                favorite.id,
                favorite.user_id,
                favorite.product_id,
                favorite.variant_id,
                format_datetime(&favorite.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_favorites(&self, user_id: &str) -> Result<Vec<Favorite>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, product_id, variant_id, created_at
             FROM favorites WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], favorite_from_row)?;
        collect(rows)
    }

    fn delete_favorite(&self, user_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM favorites WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::tests::{test_store, user};
    use super::*;

    fn session(id: &str, user_id: &str, expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            token_hash: "hash".to_string(),
            token_lookup: format!("lookup{id}"),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            created_at: now,
            expires_at: now + expires_in,
            last_used_at: None,
        }
    }

    fn address(id: &str, user_id: &str, is_default: bool) -> Address {
        let now = Utc::now();
        Address {
            id: id.to_string(),
            user_id: user_id.to_string(),
            label: Some("Home".to_string()),
            full_name: "Test User".to_string(),
            phone: None,
            line1: "1 Rasheed St".to_string(),
            line2: None,
            city: "Baghdad".to_string(),
            region: None,
            postal_code: None,
            country: "IQ".to_string(),
            is_default,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();

        let err = store.create_user(&user("u2", "a@example.com")).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_get_user_by_email_ignores_case() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();

        let found = store.get_user_by_email("A@Example.com").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert_eq!(found.status, UserStatus::PendingVerification);
    }

    #[test]
    fn test_mark_email_verified_activates_pending_user() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();

        store.mark_email_verified("u1").unwrap();

        let found = store.get_user("u1").unwrap().unwrap();
        assert!(found.email_verified);
        assert_eq!(found.status, UserStatus::Active);
        assert!(matches!(store.mark_email_verified("nope"), Err(Error::NotFound)));
    }

    #[test]
    fn test_set_password_revokes_sessions() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        store.create_session(&session("s1", "u1", Duration::hours(1))).unwrap();
        store.create_session(&session("s2", "u1", Duration::hours(1))).unwrap();

        store.set_password("u1", "new-hash", false).unwrap();
        assert_eq!(store.list_user_sessions("u1").unwrap().len(), 2);

        store.set_password("u1", "newer-hash", true).unwrap();
        assert!(store.list_user_sessions("u1").unwrap().is_empty());
        assert_eq!(store.get_user("u1").unwrap().unwrap().password_hash, "newer-hash");
    }

    #[test]
    fn test_delete_expired_sessions() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        store.create_session(&session("live", "u1", Duration::hours(1))).unwrap();
        store.create_session(&session("dead", "u1", Duration::hours(-1))).unwrap();

        assert_eq!(store.delete_expired_sessions().unwrap(), 1);
        assert!(store.get_session_by_lookup("lookuplive").unwrap().is_some());
        assert!(store.get_session_by_lookup("lookupdead").unwrap().is_none());
    }

    #[test]
    fn test_verification_consumed_once() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        let now = Utc::now();
        store
            .create_verification(&Verification {
                id: "v1".to_string(),
                user_id: "u1".to_string(),
                kind: VerificationKind::PasswordReset,
                token_digest: "digest".to_string(),
                created_at: now,
                expires_at: now + Duration::hours(1),
                consumed_at: None,
            })
            .unwrap();

        assert!(store
            .consume_verification("digest", VerificationKind::EmailVerification)
            .unwrap()
            .is_none());

        let consumed = store
            .consume_verification("digest", VerificationKind::PasswordReset)
            .unwrap()
            .unwrap();
        assert_eq!(consumed.user_id, "u1");
        assert!(consumed.consumed_at.is_some());

        assert!(store
            .consume_verification("digest", VerificationKind::PasswordReset)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_expired_verification_not_consumed() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        let now = Utc::now();
        store
            .create_verification(&Verification {
                id: "v1".to_string(),
                user_id: "u1".to_string(),
                kind: VerificationKind::EmailVerification,
                token_digest: "digest".to_string(),
                created_at: now - Duration::hours(25),
                expires_at: now - Duration::hours(1),
                consumed_at: None,
            })
            .unwrap();

        assert!(store
            .consume_verification("digest", VerificationKind::EmailVerification)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_single_default_address() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        store.create_address(&address("a1", "u1", true)).unwrap();
        store.create_address(&address("a2", "u1", true)).unwrap();

        let addresses = store.list_addresses("u1").unwrap();
        let defaults: Vec<_> = addresses.iter().filter(|a| a.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, "a2");
    }

    #[test]
    fn test_preferences_upsert() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        let mut prefs = Preferences {
            user_id: "u1".to_string(),
            currency: Currency::Iqd,
            locale: "ar-IQ".to_string(),
            marketing_opt_in: false,
            updated_at: Utc::now(),
        };
        store.upsert_preferences(&prefs).unwrap();

        prefs.currency = Currency::Usd;
        prefs.marketing_opt_in = true;
        store.upsert_preferences(&prefs).unwrap();

        let found = store.get_preferences("u1").unwrap().unwrap();
        assert_eq!(found.currency, Currency::Usd);
        assert!(found.marketing_opt_in);
    }

    #[test]
    fn test_delete_user_cascades() {
        let (_temp, store) = test_store();
        store.create_user(&user("u1", "a@example.com")).unwrap();
        store.create_address(&address("a1", "u1", false)).unwrap();
        store.create_session(&session("s1", "u1", Duration::hours(1))).unwrap();

        assert!(store.delete_user("u1").unwrap());
        assert!(store.get_address("a1").unwrap().is_none());
        assert!(store.get_session_by_lookup("lookups1").unwrap().is_none());
        assert!(!store.delete_user("u1").unwrap());
    }
}
