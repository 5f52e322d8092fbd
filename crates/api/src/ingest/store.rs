//! Persistence for ingested records
//!
//! Writes are the authoritative side effect of ingestion; realtime
//! broadcasts only happen after the store has accepted the records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use smsdash_shared::{PhoneStatus, SmsMessage};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Rows per multi-row INSERT
pub const MESSAGE_BATCH_SIZE: usize = 50;

/// Record persistence used by the control routes
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert messages, returning how many rows were written.
    /// Messages whose ID already exists are skipped.
    async fn insert_messages(&self, messages: &[SmsMessage]) -> Result<u64, sqlx::Error>;

    /// Upsert phone statuses, filling in missing numbers from ICCID mappings.
    /// Returns the phones as stored.
    async fn upsert_phones(&self, phones: Vec<PhoneStatus>) -> Result<Vec<PhoneStatus>, sqlx::Error>;

    /// Connectivity check for health probes
    async fn ping(&self) -> Result<(), sqlx::Error>;
}

/// Postgres-backed record store
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_messages(&self, messages: &[SmsMessage]) -> Result<u64, sqlx::Error> {
        let mut written = 0;

        for batch in messages.chunks(MESSAGE_BATCH_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO messages (id, phone_id, phone_number, content, source, timestamp, type, verification_code) ",
            );
            builder.push_values(batch, |mut row, msg| {
                row.push_bind(&msg.id)
                    .push_bind(&msg.phone_id)
                    .push_bind(&msg.phone_number)
                    .push_bind(&msg.content)
                    .push_bind(&msg.source)
                    .push_bind(msg.timestamp)
                    .push_bind(msg.kind.as_str())
                    .push_bind(&msg.verification_code);
            });
            builder.push(" ON CONFLICT (id) DO NOTHING");

            let result = builder.build().execute(&self.pool).await?;
            written += result.rows_affected();

            tracing::debug!(batch_size = batch.len(), rows = result.rows_affected(), "Inserted message batch");
        }

        Ok(written)
    }

    async fn upsert_phones(&self, phones: Vec<PhoneStatus>) -> Result<Vec<PhoneStatus>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(phones.len());

        for mut phone in phones {
            if let (Some(iccid), None) = (&phone.iccid, &phone.number) {
                let mapped: Option<String> = sqlx::query_scalar(
                    "SELECT phone_number FROM iccid_mappings WHERE iccid = $1 AND is_active = TRUE",
                )
                .bind(iccid)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(number) = mapped {
                    tracing::debug!(phone_id = %phone.id, iccid = %iccid, "Resolved phone number from ICCID mapping");
                    phone.number = Some(number);
                }
            }

            sqlx::query(
                r#"
                INSERT INTO phones (id, number, country, flag, carrier, status, signal, iccid, rssi, rsrq, rsrp, snr)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (id) DO UPDATE SET
                  status = EXCLUDED.status,
                  signal = EXCLUDED.signal,
                  iccid = EXCLUDED.iccid,
                  rssi = EXCLUDED.rssi,
                  rsrq = EXCLUDED.rsrq,
                  rsrp = EXCLUDED.rsrp,
                  snr = EXCLUDED.snr,
                  updated_at = NOW()
                "#,
            )
            .bind(&phone.id)
            .bind(&phone.number)
            .bind(&phone.country)
            .bind(&phone.flag)
            .bind(&phone.carrier)
            .bind(&phone.status)
            .bind(phone.signal)
            .bind(&phone.iccid)
            .bind(phone.rssi)
            .bind(phone.rsrq)
            .bind(phone.rsrp)
            .bind(phone.snr)
            .execute(&mut *tx)
            .await?;

            stored.push(phone);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}

/// In-process record store for local development and tests
#[derive(Default)]
pub struct MemoryRecordStore {
    messages: RwLock<Vec<SmsMessage>>,
    phones: RwLock<HashMap<String, PhoneStatus>>,
    iccid_mappings: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a SIM ICCID to a phone number
    pub fn map_iccid(&self, iccid: &str, phone_number: &str) {
        if let Ok(mut mappings) = self.iccid_mappings.write() {
            mappings.insert(iccid.to_string(), phone_number.to_string());
        }
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<SmsMessage> {
        self.messages.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn phone(&self, id: &str) -> Option<PhoneStatus> {
        self.phones.read().ok().and_then(|p| p.get(id).cloned())
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.failing.load(Ordering::SeqCst) {
            Err(sqlx::Error::Protocol("record store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_messages(&self, messages: &[SmsMessage]) -> Result<u64, sqlx::Error> {
        self.check()?;
        let mut stored = self
            .messages
            .write()
            .map_err(|_| sqlx::Error::Protocol("poisoned lock".to_string()))?;

        let mut written = 0;
        for msg in messages {
            if stored.iter().all(|m| m.id != msg.id) {
                stored.push(msg.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn upsert_phones(&self, phones: Vec<PhoneStatus>) -> Result<Vec<PhoneStatus>, sqlx::Error> {
        self.check()?;
        let mappings = self
            .iccid_mappings
            .read()
            .map_err(|_| sqlx::Error::Protocol("poisoned lock".to_string()))?
            .clone();
        let mut table = self
            .phones
            .write()
            .map_err(|_| sqlx::Error::Protocol("poisoned lock".to_string()))?;

        let mut stored = Vec::with_capacity(phones.len());
        for mut phone in phones {
            if phone.number.is_none() {
                if let Some(number) = phone.iccid.as_ref().and_then(|i| mappings.get(i)) {
                    phone.number = Some(number.clone());
                }
            }
            table.insert(phone.id.clone(), phone.clone());
            stored.push(phone);
        }
        Ok(stored)
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        self.check()
    }
}
