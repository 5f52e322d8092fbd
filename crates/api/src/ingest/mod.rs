//! Control server ingestion
//!
//! Normalizes uploads from the control server into stored records. Routes
//! persist first and publish realtime events second.

pub mod store;
pub mod verification;

pub use store::{MemoryRecordStore, PgRecordStore, RecordStore, MESSAGE_BATCH_SIZE};
pub use verification::extract_verification_code;

use smsdash_shared::{IncomingMessage, MessageKind, SmsMessage};
use time::OffsetDateTime;
use uuid::Uuid;

/// Fill in IDs, timestamps and verification codes for uploaded messages
pub fn prepare_messages(incoming: Vec<IncomingMessage>) -> Vec<SmsMessage> {
    let now = OffsetDateTime::now_utc();

    incoming
        .into_iter()
        .map(|msg| {
            let verification_code = extract_verification_code(&msg.content);
            SmsMessage {
                id: msg
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("msg-{}", Uuid::new_v4())),
                phone_id: msg.phone_id,
                phone_number: msg.phone_number,
                content: msg.content,
                source: msg.source,
                timestamp: msg.timestamp.unwrap_or(now),
                kind: MessageKind::Received,
                verification_code,
            }
        })
        .collect()
}
