//! Contact queries. Name and route are sealed per row; the public key and
//! safety number stay in the clear so inbound messages can be matched.

use hv_crypto::{PublicKeyBytes, SafetyNumber};
use hv_proto::RouteHandle;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::{from_millis, to_millis, Contact, MAX_TRUST_LEVEL};

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    name_enc: String,
    route_enc: String,
    public_key: String,
    safety_number: String,
    verified: bool,
    trust_level: i64,
    created_at: i64,
    updated_at: i64,
}

const SELECT_CONTACT: &str = "SELECT id, name_enc, route_enc, public_key, safety_number, verified, \
     trust_level, created_at, updated_at FROM contacts";

impl Store {
    pub async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        self.write_contact(contact, "INSERT INTO").await.map(|_| ())
    }

    /// Insert unless a contact with the same id already exists. Returns
    /// whether a row was written.
    pub async fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, StoreError> {
        self.write_contact(contact, "INSERT OR IGNORE INTO").await
    }

    async fn write_contact(&self, contact: &Contact, verb: &str) -> Result<bool, StoreError> {
        check_trust(contact.trust_level)?;
        let name_enc = self.encrypt_value(&name_ctx(&contact.id), contact.name.as_bytes())?;
        let route_enc = self.encrypt_value(&route_ctx(&contact.id), &contact.route.0)?;

        let sql = format!(
            "{verb} contacts (id, name_enc, route_enc, public_key, safety_number, verified, \
             trust_level, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(&contact.id)
            .bind(name_enc)
            .bind(route_enc)
            .bind(contact.public_key.to_b64())
            .bind(contact.safety_number.as_str())
            .bind(contact.verified)
            .bind(i64::from(contact.trust_level))
            .bind(to_millis(contact.created_at))
            .bind(to_millis(contact.updated_at))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist mutable fields (name, route, verified, trust, updated_at).
    pub async fn update_contact(&self, contact: &Contact) -> Result<bool, StoreError> {
        check_trust(contact.trust_level)?;
        let name_enc = self.encrypt_value(&name_ctx(&contact.id), contact.name.as_bytes())?;
        let route_enc = self.encrypt_value(&route_ctx(&contact.id), &contact.route.0)?;

        let result = sqlx::query(
            "UPDATE contacts SET name_enc = ?, route_enc = ?, verified = ?, trust_level = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(name_enc)
        .bind(route_enc)
        .bind(contact.verified)
        .bind(i64::from(contact.trust_level))
        .bind(to_millis(contact.updated_at))
        .bind(&contact.id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_contact(&self, id: &str) -> Result<Option<Contact>, StoreError> {
        let row: Option<ContactRow> = sqlx::query_as(&format!("{SELECT_CONTACT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| self.contact_from_row(r)).transpose()
    }

    pub async fn find_contact_by_public_key(
        &self,
        public_key: &PublicKeyBytes,
    ) -> Result<Option<Contact>, StoreError> {
        let row: Option<ContactRow> =
            sqlx::query_as(&format!("{SELECT_CONTACT} WHERE public_key = ?"))
                .bind(public_key.to_b64())
                .fetch_optional(self.pool())
                .await?;
        row.map(|r| self.contact_from_row(r)).transpose()
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let rows: Vec<ContactRow> =
            sqlx::query_as(&format!("{SELECT_CONTACT} ORDER BY created_at ASC, id ASC"))
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(|r| self.contact_from_row(r)).collect()
    }

    /// Delete a contact; its messages go with it (`ON DELETE CASCADE`).
    pub async fn delete_contact(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn contact_from_row(&self, row: ContactRow) -> Result<Contact, StoreError> {
        let name = self.decrypt_string(&name_ctx(&row.id), &row.name_enc)?;
        let route = self.decrypt_value(&route_ctx(&row.id), &row.route_enc)?;
        let public_key = PublicKeyBytes::from_b64(&row.public_key)?;
        let safety_number = SafetyNumber::parse(&row.safety_number)
            .ok_or_else(|| StoreError::Corrupt(format!("contact {}: safety number", row.id)))?;
        let trust_level = u8::try_from(row.trust_level)
            .ok()
            .filter(|t| *t <= MAX_TRUST_LEVEL)
            .ok_or_else(|| StoreError::Corrupt(format!("contact {}: trust level", row.id)))?;

        Ok(Contact {
            name,
            route: RouteHandle(route.to_vec()),
            public_key,
            safety_number,
            verified: row.verified,
            trust_level,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            id: row.id,
        })
    }
}

fn check_trust(level: u8) -> Result<(), StoreError> {
    if level > MAX_TRUST_LEVEL {
        return Err(StoreError::Invalid(format!(
            "trust level {level} outside 0..={MAX_TRUST_LEVEL}"
        )));
    }
    Ok(())
}

fn name_ctx(id: &str) -> String {
    format!("contacts.name:{id}")
}

fn route_ctx(id: &str) -> String {
    format!("contacts.route:{id}")
}
